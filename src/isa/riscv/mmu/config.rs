use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    config::{arch_config::WordType, mmu_config::PAGE_SHIFT},
    isa::riscv::{csr_reg::fields::satp, mmu::TranslateError},
    utils::get_field,
};

/// `satp.MODE` / `hgatp.MODE` encodings.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum VirtualMemoryMode {
    Bare = 0,
    Sv32 = 1,
    Sv39 = 8,
    Sv48 = 9,
    Sv57 = 10,
}

/// Shape of one page table format.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WalkGeometry {
    pub levels: u32,
    pub idx_bits: u32,
    pub pte_size: usize,
}

impl VirtualMemoryMode {
    /// Decode the mode field of an `*atp` register.
    pub fn from_atp(atp: WordType, rv32: bool) -> Result<Self, TranslateError> {
        let mode = if rv32 {
            get_field(atp, satp::MODE32)
        } else {
            get_field(atp, satp::MODE64)
        } as u8;
        Self::try_from(mode).map_err(|_| TranslateError::VmMode(mode))
    }

    pub fn geometry(self) -> Option<WalkGeometry> {
        let (levels, idx_bits, pte_size) = match self {
            Self::Bare => return None,
            Self::Sv32 => (2, 10, 4),
            Self::Sv39 => (3, 9, 8),
            Self::Sv48 => (4, 9, 8),
            Self::Sv57 => (5, 9, 8),
        };
        Some(WalkGeometry {
            levels,
            idx_bits,
            pte_size,
        })
    }
}

impl WalkGeometry {
    /// Width of the translated address. `widened` is 2 for the G-stage.
    #[inline]
    pub fn va_bits(&self, widened: u32) -> u32 {
        PAGE_SHIFT + self.levels * self.idx_bits + widened
    }
}

/// Root page number held in an `*atp` register.
pub fn atp_root(atp: WordType, rv32: bool) -> WordType {
    let ppn = if rv32 { atp & satp::PPN32 } else { atp & satp::PPN64 };
    ppn << PAGE_SHIFT
}
