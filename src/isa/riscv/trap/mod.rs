use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::{config::arch_config::WordType, device::MemError};

pub mod trap_controller;
pub mod transformed_insn;

/// Trap Cause
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    Interrupt(Interrupt),
    Exception(Exception),
}

/// Interrupt, identified by its major interrupt number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    /// Legacy or AIA local interrupt.
    Local(u32),
    /// CLIC-delivered interrupt with its target mode and level.
    Clic { irq: u32, mode: u8, level: u8 },
}

/// Exception
#[repr(u64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Exception {
    InstructionMisaligned = 0,
    InstructionFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadMisaligned = 4,
    LoadFault = 5,
    StoreMisaligned = 6,
    StoreFault = 7,
    UserEnvCall = 8,
    SupervisorEnvCall = 9,
    VirtualSupervisorEnvCall = 10,
    MachineEnvCall = 11,
    InstructionPageFault = 12,
    LoadPageFault = 13,
    StorePageFault = 15,
    DoubleTrap = 16,
    SoftwareCheck = 18,
    HardwareError = 19,
    InstructionGuestPageFault = 20,
    LoadGuestPageFault = 21,
    VirtualInstruction = 22,
    StoreGuestPageFault = 23,
    /// Semihosting request, serviced by the execution layer without a trap.
    Semihost = 0x3f,
}

/// `*tval` sub-codes of [`Exception::SoftwareCheck`].
pub mod sw_check_code {
    /// Forward-edge (landing pad) violation.
    pub const FCFI: u64 = 2;
    /// Backward-edge (shadow stack) violation.
    pub const BCFI: u64 = 3;
}

/// Interrupt numbers.
#[rustfmt::skip]
pub mod irq {
    pub const S_SOFT    : u32 = 1;
    pub const VS_SOFT   : u32 = 2;
    pub const M_SOFT    : u32 = 3;
    pub const S_TIMER   : u32 = 5;
    pub const VS_TIMER  : u32 = 6;
    pub const M_TIMER   : u32 = 7;
    pub const S_EXT     : u32 = 9;
    pub const VS_EXT    : u32 = 10;
    pub const M_EXT     : u32 = 11;
    pub const S_GEXT    : u32 = 12;
    pub const PMU_OVF   : u32 = 13;
}

impl Exception {
    pub fn from(nr: u64) -> Option<Self> {
        Self::try_from(nr).ok()
    }

    pub fn from_memory_err(err: MemError) -> Self {
        match err {
            MemError::LoadMisaligned => Exception::LoadMisaligned,
            MemError::LoadFault => Exception::LoadFault,
            MemError::StoreMisaligned => Exception::StoreMisaligned,
            MemError::StoreFault | MemError::AtomicUnsupported => Exception::StoreFault,
        }
    }

    pub fn from_instr_fetch_err(err: MemError) -> Self {
        match err {
            MemError::LoadMisaligned | MemError::StoreMisaligned => {
                Exception::InstructionMisaligned
            }
            _ => Exception::InstructionFault,
        }
    }

    #[inline]
    pub fn code(self) -> WordType {
        self.into()
    }
}

impl Interrupt {
    pub fn irq(self) -> u32 {
        match self {
            Interrupt::Local(irq) | Interrupt::Clic { irq, .. } => irq,
        }
    }
}

/// Host-side failure while delivering a trap. The guest cannot observe these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrapError {
    #[error("M-mode double trap while delivering cause {cause:#x}")]
    MachineDoubleTrap { cause: WordType },
    #[error("failed to load CLIC vector table entry at {addr:#x}")]
    VectorFetch { addr: WordType },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exception_codes() {
        assert_eq!(Exception::from(2), Some(Exception::IllegalInstruction));
        assert_eq!(Exception::from(14), None);
        assert_eq!(Exception::StoreGuestPageFault.code(), 23);
        assert_eq!(Exception::DoubleTrap.code(), 16);
    }

    #[test]
    fn test_memory_error_mapping() {
        assert_eq!(
            Exception::from_memory_err(MemError::LoadFault),
            Exception::LoadFault
        );
        assert_eq!(
            Exception::from_instr_fetch_err(MemError::LoadFault),
            Exception::InstructionFault
        );
    }
}
