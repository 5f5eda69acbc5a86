//! Address translation: MMU indices, two-stage page walks, MTT and PMP
//! overlays, and the TLB fill path used by the execution layer.

pub mod config;
pub mod mtt;
pub mod page_table;
pub mod pmp;

use bitflags::bitflags;
use thiserror::Error;

use crate::{
    config::{arch_config::WordType, mmu_config::PAGE_SIZE},
    device::MemError,
    isa::riscv::{
        csr_reg::{PrivilegeLevel, fields::mstatus},
        hart::Hart,
        trap::Exception,
    },
    utils::get_field,
};

bitflags! {
    /// Page protection granted by a translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u8 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
}

impl AccessType {
    /// Permission the access needs.
    #[inline]
    pub fn required(self) -> Prot {
        match self {
            AccessType::Fetch => Prot::EXEC,
            AccessType::Load => Prot::READ,
            AccessType::Store => Prot::WRITE,
        }
    }
}

/// MMU index encoding: the effective privilege in the low two bits, with
/// the SUM-enabled supervisor view as its own value.
#[rustfmt::skip]
pub mod mmu_idx {
    use crate::isa::riscv::csr_reg::PrivilegeLevel;

    pub const U         : u32 = 0;
    pub const S         : u32 = 1;
    pub const S_SUM     : u32 = 2;
    pub const M         : u32 = 3;
    pub const TWO_STAGE : u32 = 1 << 2;
    pub const SS_ACCESS : u32 = 1 << 3;

    const PRIV_MASK     : u32 = 0b11;

    pub fn priv_level(idx: u32) -> PrivilegeLevel {
        match idx & PRIV_MASK {
            U => PrivilegeLevel::U,
            M => PrivilegeLevel::M,
            _ => PrivilegeLevel::S,
        }
    }

    #[inline]
    pub fn sum(idx: u32) -> bool {
        idx & PRIV_MASK == S_SUM
    }

    #[inline]
    pub fn two_stage(idx: u32) -> bool {
        idx & TWO_STAGE != 0
    }

    #[inline]
    pub fn shadow_stack(idx: u32) -> bool {
        idx & SS_ACCESS != 0
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TranslateError {
    #[error("unsupported translation mode {0}")]
    VmMode(u8),
    #[error("page table entry at {addr:#x} is unreachable: {source}")]
    PteAccess {
        addr: WordType,
        #[source]
        source: MemError,
    },
}

/// A successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub physical: WordType,
    pub prot: Prot,
}

/// Why a walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkFault {
    /// Page fault.
    Fail,
    /// PMP denied the access or a page table read.
    Pmp,
    /// A G-stage walk of a VS-stage page table address failed.
    /// `pte_addr` is already shifted for `htval`.
    GStage { pte_addr: WordType },
    /// The memory tracking table denied the access.
    Mtt,
}

pub type TranslateResult = Result<Mapping, WalkFault>;

/// Everything `raise_mmu_exception` needs to pick a cause.
#[derive(Debug, Clone, Copy)]
struct FillFault {
    access: AccessType,
    access_fault: bool,
    first_stage: bool,
    two_stage: bool,
    two_stage_indirect: bool,
}

impl Hart {
    /// MMU index of the current context. Data accesses honor `MPRV`.
    pub fn mmu_index(&self, ifetch: bool) -> u32 {
        let st = &self.state;
        let mut mode = st.priv_level;
        let mut virt = st.virt;

        if !ifetch {
            let mut status = st.mstatus;
            if mode == PrivilegeLevel::M && status & mstatus::MPRV != 0 {
                mode = PrivilegeLevel::from_bits(get_field(status, mstatus::MPP))
                    .unwrap_or(PrivilegeLevel::U);
                virt = status & mstatus::MPV != 0 && mode != PrivilegeLevel::M;
                if virt {
                    status = st.vsstatus();
                }
            }
            if mode == PrivilegeLevel::S && status & mstatus::SUM != 0 {
                return mmu_idx::S_SUM | if virt { mmu_idx::TWO_STAGE } else { 0 };
            }
        }

        mode.bits() as u32 | if virt { mmu_idx::TWO_STAGE } else { 0 }
    }

    /// PMP permissions of `mode` on `[addr, addr + size)`.
    pub(crate) fn pmp_prot(&self, addr: WordType, size: usize, mode: PrivilegeLevel) -> Prot {
        if self.cfg.pmp_regions == 0 {
            return Prot::all();
        }
        self.state
            .pmp
            .privileges(addr, size as WordType, mode, self.state.mseccfg)
    }

    fn pmp_check(
        &self,
        addr: WordType,
        size: usize,
        access: AccessType,
        mode: PrivilegeLevel,
    ) -> Result<Prot, WalkFault> {
        let prot = self.pmp_prot(addr, size, mode);
        if prot.contains(access.required()) {
            Ok(prot)
        } else {
            Err(WalkFault::Pmp)
        }
    }

    /// Translate `addr` for an access of `size` bytes through every stage
    /// selected by `idx`, then the MTT and PMP overlays.
    fn fill(
        &mut self,
        addr: WordType,
        size: usize,
        mut access: AccessType,
        idx: u32,
    ) -> Result<(Mapping, WordType), FillFault> {
        let two_stage = mmu_idx::two_stage(idx);
        let sstack = mmu_idx::shadow_stack(idx);
        let mode = mmu_idx::priv_level(idx);
        if sstack {
            access = AccessType::Store;
        }
        self.state.guest_phys_fault_addr = 0;

        let mut fault = FillFault {
            access,
            access_fault: false,
            first_stage: true,
            two_stage,
            two_stage_indirect: false,
        };

        log::trace!("tlb_fill {addr:#x} {access:?} mmu_idx {idx}");

        let mut result = self.translate(addr, access, idx, true, two_stage, false);
        if two_stage {
            match result {
                Err(WalkFault::GStage { pte_addr }) => {
                    self.state.guest_phys_fault_addr = pte_addr;
                    fault.first_stage = false;
                    fault.two_stage_indirect = true;
                }
                Ok(first) => {
                    let gpa = first.physical;
                    let mut second = self.translate(gpa, access, mmu_idx::U, false, true, false);
                    // Shadow stack accesses need a read-write G-stage mapping.
                    if sstack
                        && second.is_ok_and(|m| !m.prot.contains(Prot::READ | Prot::WRITE))
                    {
                        second = Err(WalkFault::GStage { pte_addr: 0 });
                    }
                    match second {
                        Ok(m) => {
                            result = Ok(Mapping {
                                physical: m.physical,
                                prot: first.prot & m.prot,
                            })
                        }
                        Err(e) => {
                            fault.first_stage = false;
                            if e != WalkFault::Pmp {
                                self.state.guest_phys_fault_addr =
                                    (gpa | (addr & (PAGE_SIZE - 1))) >> 2;
                            }
                            result = Err(e);
                        }
                    }
                }
                Err(_) => {}
            }
        }

        let mut tlb_size = PAGE_SIZE;
        let result = result.and_then(|m| {
            let mtt = self.mtt_check(m.physical, access, mode)?;
            let pmp = self.pmp_check(m.physical, size, access, mode)?;
            tlb_size = self.state.pmp.tlb_size(m.physical);
            Ok(Mapping {
                physical: m.physical,
                prot: m.prot & mtt & pmp,
            })
        });

        match result {
            Ok(m) => {
                let prot = if sstack { Prot::READ | Prot::WRITE } else { m.prot };
                let page_mask = !(tlb_size - 1);
                if let Some(tlb) = self.tlb.as_mut() {
                    tlb.insert(addr & page_mask, m.physical & page_mask, prot.bits(), idx, tlb_size);
                }
                Ok((m, tlb_size))
            }
            Err(e) => {
                fault.access_fault = matches!(e, WalkFault::Pmp | WalkFault::Mtt);
                log::trace!("tlb_fill {addr:#x} failed: {e:?}");
                Err(fault)
            }
        }
    }

    fn raise_mmu_exception(&mut self, addr: WordType, f: FillFault) -> Exception {
        let e = match f.access {
            AccessType::Fetch if f.access_fault => Exception::InstructionFault,
            AccessType::Fetch if self.state.virt && !f.first_stage => {
                Exception::InstructionGuestPageFault
            }
            AccessType::Fetch => Exception::InstructionPageFault,
            AccessType::Load if f.access_fault => Exception::LoadFault,
            AccessType::Load if f.two_stage && !f.first_stage => Exception::LoadGuestPageFault,
            AccessType::Load => Exception::LoadPageFault,
            AccessType::Store if f.access_fault => Exception::StoreFault,
            AccessType::Store if f.two_stage && !f.first_stage => Exception::StoreGuestPageFault,
            AccessType::Store => Exception::StorePageFault,
        };
        let st = &mut self.state;
        st.badaddr = addr;
        st.two_stage_lookup = f.two_stage;
        st.two_stage_indirect_lookup = f.two_stage_indirect;
        e
    }

    /// Resolve `addr` to a physical address and hand the page to the TLB.
    ///
    /// In probe mode a failed translation returns `Ok(None)` and leaves the
    /// fault registers untouched; otherwise the matching page or access
    /// fault is returned with `badaddr` recorded.
    pub fn tlb_fill(
        &mut self,
        addr: WordType,
        size: usize,
        access: AccessType,
        idx: u32,
        probe: bool,
    ) -> Result<Option<WordType>, Exception> {
        match self.fill(addr, size, access, idx) {
            Ok((m, _)) => Ok(Some(m.physical)),
            Err(_) if probe => Ok(None),
            Err(f) => Err(self.raise_mmu_exception(addr, f)),
        }
    }

    fn access_phys(
        &mut self,
        addr: WordType,
        size: usize,
        access: AccessType,
        idx: u32,
    ) -> Result<WordType, Exception> {
        if addr % size as WordType != 0 {
            self.state.badaddr = addr;
            self.state.two_stage_lookup = mmu_idx::two_stage(idx);
            self.state.two_stage_indirect_lookup = false;
            return Err(match access {
                AccessType::Fetch => Exception::InstructionMisaligned,
                AccessType::Load => Exception::LoadMisaligned,
                AccessType::Store => Exception::StoreMisaligned,
            });
        }
        match self.fill(addr, size, access, idx) {
            Ok((m, _)) => Ok(m.physical),
            Err(f) => Err(self.raise_mmu_exception(addr, f)),
        }
    }

    /// A bus error behind a successful translation.
    fn transaction_failed(&mut self, addr: WordType, access: AccessType, idx: u32) -> Exception {
        let st = &mut self.state;
        st.badaddr = addr;
        st.two_stage_lookup = mmu_idx::two_stage(idx);
        st.two_stage_indirect_lookup = false;
        match access {
            AccessType::Fetch => Exception::InstructionFault,
            AccessType::Load => Exception::LoadFault,
            AccessType::Store => Exception::StoreFault,
        }
    }

    /// Load `size` bytes from virtual address `addr` under MMU index `idx`.
    pub fn load_virt(
        &mut self,
        addr: WordType,
        size: usize,
        access: AccessType,
        idx: u32,
    ) -> Result<u64, Exception> {
        let pa = self.access_phys(addr, size, access, idx)?;
        self.mem.load(pa, size).map_err(|e| {
            log::debug!("Load from {pa:#x} failed: {e}");
            self.transaction_failed(addr, access, idx)
        })
    }

    /// Store `size` bytes of `value` to virtual address `addr` under MMU index `idx`.
    pub fn store_virt(
        &mut self,
        addr: WordType,
        size: usize,
        value: u64,
        idx: u32,
    ) -> Result<(), Exception> {
        let pa = self.access_phys(addr, size, AccessType::Store, idx)?;
        self.mem.store(pa, size, value).map_err(|e| {
            log::debug!("Store to {pa:#x} failed: {e}");
            self.transaction_failed(addr, AccessType::Store, idx)
        })
    }

    /// Page holding the physical address `addr` maps to in the current
    /// context. Walks both stages when virtualized and never updates PTEs.
    pub fn debug_phys_addr(&self, addr: WordType) -> Option<WordType> {
        let idx = self.mmu_index(false);
        let virt = self.state.virt;
        let mut m = self
            .translate(addr, AccessType::Load, idx, true, virt, true)
            .ok()?;
        if virt {
            m = self
                .translate(m.physical, AccessType::Load, mmu_idx::U, false, true, true)
                .ok()?;
        }
        Some(m.physical & !(PAGE_SIZE - 1))
    }
}
