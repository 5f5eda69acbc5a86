//! Architectural register file of one hart.
//!
//! Plain storage only. Legality rules live in `csr_reg`, trap sequencing in
//! `trap::trap_controller`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    config::arch_config::WordType,
    isa::riscv::{
        csr_reg::{PrivilegeLevel, fields::mip},
        mmu::pmp::PmpTable,
        trap::{Trap, irq},
    },
};

/// Supervisor trap registers that exist once for HS and once for VS.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorBank {
    pub tvec: WordType,
    pub scratch: WordType,
    pub epc: WordType,
    pub cause: WordType,
    pub tval: WordType,
    pub atp: WordType,
}

/// The HS and VS copies of the supervisor registers.
///
/// `live` always backs the architectural `s*` names. While V=0 it holds the
/// HS copy and `parked` holds the VS copy; [`HypervisorBank::swap`] flips the
/// two on every virtualization change. `parked_status` holds the
/// `sstatus` fields of the context that is not running.
#[derive(Debug, Default, Clone, Copy)]
pub struct HypervisorBank {
    pub live: SupervisorBank,
    pub parked: SupervisorBank,
    pub parked_status: WordType,
}

impl HypervisorBank {
    pub fn swap(&mut self, mstatus: &mut WordType, mask: WordType) {
        let outgoing = *mstatus & mask;
        *mstatus = (*mstatus & !mask) | (self.parked_status & mask);
        self.parked_status = outgoing;
        std::mem::swap(&mut self.live, &mut self.parked);
    }

    #[inline]
    pub fn vs(&self, virt: bool) -> &SupervisorBank {
        if virt { &self.live } else { &self.parked }
    }

    #[inline]
    pub fn vs_mut(&mut self, virt: bool) -> &mut SupervisorBank {
        if virt { &mut self.live } else { &mut self.parked }
    }

    #[inline]
    pub fn hs(&self, virt: bool) -> &SupervisorBank {
        if virt { &self.parked } else { &self.live }
    }

    #[inline]
    pub fn hs_mut(&mut self, virt: bool) -> &mut SupervisorBank {
        if virt { &mut self.parked } else { &mut self.live }
    }
}

/// Interrupt-line state shared between a hart and its device collaborators.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineState {
    pub mip: WordType,
    pub hgeip: WordType,
    pub hgeie: WordType,
    pub external_seip: bool,
    pub software_seip: bool,
    /// VS-level timer raised by the hypervisor timer collaborator.
    pub vstime_irq: bool,
}

/// `mip` and the guest external interrupt lines behind one lock.
///
/// Devices raise and lower lines from their own threads; every
/// read-modify-write of `mip` goes through [`IrqLines::update`].
#[derive(Debug, Default)]
pub struct IrqLines {
    state: Mutex<LineState>,
}

impl IrqLines {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> LineState {
        *self.lock()
    }

    #[inline]
    pub fn mip(&self) -> WordType {
        self.lock().mip
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut LineState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Drive a major interrupt line from a device.
    pub fn set_irq(&self, irq: u32, level: bool) {
        if irq >= 64 {
            log::warn!("Ignoring level change on nonexistent irq {irq}");
            return;
        }
        self.update(|s| {
            if irq == irq::S_EXT {
                s.external_seip = level;
                let seip = s.external_seip || s.software_seip;
                s.mip = (s.mip & !mip::SEIP) | if seip { mip::SEIP } else { 0 };
            } else if level {
                s.mip |= 1 << irq;
            } else {
                s.mip &= !(1 << irq);
            }
        });
    }

    /// Drive guest external interrupt line `gein` (1..=GEILEN).
    pub fn set_guest_external(&self, gein: u32, level: bool) {
        if gein == 0 || gein >= 64 {
            return;
        }
        self.update(|s| {
            if level {
                s.hgeip |= 1 << gein;
            } else {
                s.hgeip &= !(1 << gein);
            }
            Self::refresh_sgeip(s);
        });
    }

    pub fn set_vstimer(&self, level: bool) {
        self.update(|s| s.vstime_irq = level);
    }

    pub fn set_hgeie(&self, hgeie: WordType) {
        self.update(|s| {
            s.hgeie = hgeie;
            Self::refresh_sgeip(s);
        });
    }

    fn refresh_sgeip(s: &mut LineState) {
        if s.hgeie & s.hgeip != 0 {
            s.mip |= mip::SGEIP;
        } else {
            s.mip &= !mip::SGEIP;
        }
    }
}

/// Control transfer record buffer and its control registers.
#[derive(Debug, Clone)]
pub struct CtrState {
    pub mctrctl: WordType,
    pub vsctrctl: WordType,
    pub depth: WordType,
    pub status: WordType,
    pub src: Vec<WordType>,
    pub dst: Vec<WordType>,
    pub data: Vec<WordType>,
}

pub const CTR_MAX_ENTRIES: usize = 256;

impl CtrState {
    /// Logical buffer size selected by `sctrdepth`.
    #[inline]
    pub fn entries(&self) -> WordType {
        16 << self.depth
    }
}

impl Default for CtrState {
    fn default() -> Self {
        Self {
            mctrctl: 0,
            vsctrctl: 0,
            depth: 0,
            status: 0,
            src: vec![0; CTR_MAX_ENTRIES],
            dst: vec![0; CTR_MAX_ENTRIES],
            data: vec![0; CTR_MAX_ENTRIES],
        }
    }
}

/// One performance counter, anchored to the clock reading `prev` at the
/// moment it held `val`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PmuCounter {
    pub val: u64,
    pub prev: u64,
}

/// Hart clocks and the counters that follow them. Index `n` is counter `n`.
#[derive(Debug, Clone, Default)]
pub struct PmuState {
    pub cycles: u64,
    pub instret: u64,
    pub counters: [PmuCounter; 32],
    pub events: [WordType; 32],
    pub mcountinhibit: WordType,
}

#[derive(Debug, Clone)]
pub struct HartState {
    pub pc: WordType,
    pub gpr: [WordType; 32],
    pub priv_level: PrivilegeLevel,
    pub virt: bool,

    /// Live `misa` extension letters, a subset of the configured ones.
    pub misa_ext: WordType,

    // Machine
    pub mstatus: WordType,
    pub medeleg: WordType,
    pub mideleg: WordType,
    pub mie: WordType,
    pub mtvec: WordType,
    pub mcounteren: WordType,
    pub mscratch: WordType,
    pub mepc: WordType,
    pub mcause: WordType,
    pub mtval: WordType,
    pub mtinst: WordType,
    pub mtval2: WordType,
    pub menvcfg: WordType,
    pub mseccfg: WordType,
    pub mvien: WordType,
    pub mvip: WordType,
    /// Independent `sie` bits for interrupts injected through `mvien`.
    pub sie_shadow: WordType,

    // Supervisor
    pub scounteren: WordType,
    pub senvcfg: WordType,
    pub bank: HypervisorBank,

    // Hypervisor
    pub hstatus: WordType,
    pub hedeleg: WordType,
    pub hideleg: WordType,
    pub hcounteren: WordType,
    pub henvcfg: WordType,
    pub htval: WordType,
    pub htinst: WordType,
    pub hgatp: WordType,
    pub htimedelta: WordType,
    pub hvien: WordType,
    pub hvip: WordType,
    pub hvictl: WordType,
    /// Independent `vsie` bits for interrupts injected through `hvien`.
    pub vsie_shadow: WordType,

    // AIA
    pub miselect: WordType,
    pub siselect: WordType,
    pub vsiselect: WordType,
    pub miprio: [u8; 64],
    pub siprio: [u8; 64],
    pub hviprio: [u8; 64],

    // CLIC
    pub mintstatus: WordType,
    pub mintthresh: WordType,
    pub sintthresh: WordType,
    pub mtvt: WordType,
    pub stvt: WordType,
    /// Encoded interrupt offered by the CLIC: `irq | mode << 12 | level << 14`.
    pub clic_exccode: Option<u32>,

    pub pmp: PmpTable,
    pub mtt_mode: u8,
    pub sdid: WordType,
    pub mtt_ppn: WordType,

    // Floating point control
    pub fflags: WordType,
    pub frm: WordType,

    // Control-flow integrity
    pub ssp: WordType,
    /// A landing pad is expected at the next instruction.
    pub elp: bool,

    pub ctr: CtrState,
    pub pmu: PmuState,

    // Trap bookkeeping filled by the execution layer and the translator.
    pub badaddr: WordType,
    pub bins: WordType,
    pub guest_phys_fault_addr: WordType,
    pub two_stage_lookup: bool,
    pub two_stage_indirect_lookup: bool,
    pub sw_check_code: WordType,
    pub pending_trap: Option<Trap>,
}

impl HartState {
    pub fn new(reset_pc: WordType) -> Self {
        Self {
            pc: reset_pc,
            gpr: [0; 32],
            priv_level: PrivilegeLevel::M,
            virt: false,
            misa_ext: 0,
            mstatus: 0,
            medeleg: 0,
            mideleg: 0,
            mie: 0,
            mtvec: 0,
            mcounteren: 0,
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,
            mtinst: 0,
            mtval2: 0,
            menvcfg: 0,
            mseccfg: 0,
            mvien: 0,
            mvip: 0,
            sie_shadow: 0,
            scounteren: 0,
            senvcfg: 0,
            bank: HypervisorBank::default(),
            hstatus: 0,
            hedeleg: 0,
            hideleg: 0,
            hcounteren: 0,
            henvcfg: 0,
            htval: 0,
            htinst: 0,
            hgatp: 0,
            htimedelta: 0,
            hvien: 0,
            hvip: 0,
            hvictl: 0,
            vsie_shadow: 0,
            miselect: 0,
            siselect: 0,
            vsiselect: 0,
            miprio: [0; 64],
            siprio: [0; 64],
            hviprio: [0; 64],
            mintstatus: 0,
            mintthresh: 0,
            sintthresh: 0,
            mtvt: 0,
            stvt: 0,
            clic_exccode: None,
            pmp: PmpTable::default(),
            mtt_mode: 0,
            sdid: 0,
            mtt_ppn: 0,
            fflags: 0,
            frm: 0,
            ssp: 0,
            elp: false,
            ctr: CtrState::default(),
            pmu: PmuState::default(),
            badaddr: 0,
            bins: 0,
            guest_phys_fault_addr: 0,
            two_stage_lookup: false,
            two_stage_indirect_lookup: false,
            sw_check_code: 0,
            pending_trap: None,
        }
    }

    /// `sstatus` fields of the VS context, wherever they currently live.
    #[inline]
    pub fn vsstatus(&self) -> WordType {
        if self.virt {
            self.mstatus
        } else {
            self.bank.parked_status
        }
    }

    /// `sstatus` fields of the HS context, wherever they currently live.
    #[inline]
    pub fn hs_status(&self) -> WordType {
        if self.virt {
            self.bank.parked_status
        } else {
            self.mstatus
        }
    }
}
