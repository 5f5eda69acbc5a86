//! Page table entries and the Sv32/39/48/57 walker.

use bitflags::bitflags;

use crate::{
    config::{
        Extensions,
        arch_config::WordType,
        mmu_config::{PAGE_SHIFT, PAGE_SIZE, PTE_ATTR, PTE_N, PTE_PBMT, PTE_PPN_MASK, PTE_PPN_SHIFT, PTE_RESERVED},
    },
    isa::riscv::{
        csr_reg::{
            PrivilegeLevel,
            fields::{envcfg, mstatus},
        },
        hart::Hart,
        mmu::{
            AccessType, Mapping, Prot, TranslateError, TranslateResult, WalkFault,
            config::{VirtualMemoryMode, WalkGeometry, atp_root},
            mmu_idx,
        },
    },
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PTEFlags: u8 {
        const V = 1 << 0; // valid
        const R = 1 << 1; // read
        const W = 1 << 2; // write
        const X = 1 << 3; // execute
        const U = 1 << 4; // U-Mode
        const G = 1 << 5; // global mapping
        const A = 1 << 6; // accessed
        const D = 1 << 7; // dirty
    }
}

const RWX: PTEFlags = PTEFlags::R.union(PTEFlags::W).union(PTEFlags::X);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry {
    pub bits: WordType,
}

impl PageTableEntry {
    pub fn new(bits: WordType) -> Self {
        PageTableEntry { bits }
    }

    /// Build an entry pointing at physical address `pa`.
    pub fn from_pa(pa: WordType, flags: PTEFlags) -> Self {
        Self::new(((pa >> PAGE_SHIFT) << PTE_PPN_SHIFT) | flags.bits() as WordType)
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u8)
    }

    pub fn has(&self, flag: PTEFlags) -> bool {
        self.flags().contains(flag)
    }

    /// The R/W/X bits only.
    pub fn rwx(&self) -> PTEFlags {
        self.flags() & RWX
    }

    pub fn is_leaf(&self) -> bool {
        !self.rwx().is_empty()
    }

    pub fn ppn(&self, rv32: bool) -> WordType {
        if rv32 {
            self.bits >> PTE_PPN_SHIFT
        } else {
            (self.bits & PTE_PPN_MASK) >> PTE_PPN_SHIFT
        }
    }

    pub fn with(self, flags: PTEFlags) -> Self {
        Self::new(self.bits | flags.bits() as WordType)
    }
}

/// Leaf found by a walk.
struct Leaf {
    pte: PageTableEntry,
    pte_addr: WordType,
    ppn: WordType,
    level: u32,
    ptshift: u32,
    sstack_page: bool,
}

/// Stage-wide switches resolved once per translation.
struct StageParams {
    root: WordType,
    geo: WalkGeometry,
    widened: u32,
    pbmte: bool,
    adue: bool,
}

/// Shadow stack instructions may only touch shadow stack pages, except
/// that ordinary loads may read them.
fn legal_sstack_access(access: AccessType, sstack_inst: bool, sstack_page: bool) -> bool {
    sstack_inst == sstack_page || (access == AccessType::Load && sstack_page)
}

impl Hart {
    fn stage_params(&self, first_stage: bool, two_stage: bool) -> Result<Option<StageParams>, TranslateError> {
        let st = &self.state;
        let rv32 = self.cfg.is_rv32();
        let (atp, widened) = if first_stage {
            // M/HS forced two-stage accesses use the background vsatp.
            let atp = if two_stage { st.bank.vs(st.virt).atp } else { st.bank.live.atp };
            (atp, 0)
        } else {
            (st.hgatp, 2)
        };

        let Some(geo) = VirtualMemoryMode::from_atp(atp, rv32)?.geometry() else {
            return Ok(None);
        };

        let mut pbmte = st.menvcfg & envcfg::PBMTE != 0;
        let mut adue = if self.has(Extensions::SVADU) {
            st.menvcfg & envcfg::ADUE != 0
        } else {
            !self.has(Extensions::SVADE)
        };
        if first_stage && two_stage && st.virt {
            pbmte &= st.henvcfg & envcfg::PBMTE != 0;
            adue &= st.henvcfg & envcfg::ADUE != 0;
        }

        Ok(Some(StageParams {
            root: atp_root(atp, rv32),
            geo,
            widened,
            pbmte,
            adue,
        }))
    }

    fn read_pte(&self, addr: WordType, size: usize) -> Result<WordType, TranslateError> {
        self.mem
            .load(addr, size)
            .map_err(|source| TranslateError::PteAccess { addr, source })
    }

    /// Walk the tables down to a leaf entry.
    fn find_leaf(
        &self,
        addr: WordType,
        p: &StageParams,
        first_stage: bool,
        two_stage: bool,
        is_debug: bool,
    ) -> Result<Leaf, WalkFault> {
        let rv32 = self.cfg.is_rv32();
        let geo = p.geo;
        let mut base = p.root;
        let mut ptshift = (geo.levels - 1) * geo.idx_bits;

        for level in 0..geo.levels {
            let idx_bits = if level == 0 { geo.idx_bits + p.widened } else { geo.idx_bits };
            let idx = (addr >> (PAGE_SHIFT + ptshift)) & ((1 << idx_bits) - 1);
            let offset = idx * geo.pte_size as WordType;

            let pte_addr = if two_stage && first_stage {
                // The table itself lives in guest physical memory.
                match self.translate(base, AccessType::Load, mmu_idx::U, false, true, is_debug) {
                    Ok(m) => m.physical + offset,
                    Err(_) => {
                        return Err(WalkFault::GStage {
                            pte_addr: (base + offset) >> 2,
                        });
                    }
                }
            } else {
                base + offset
            };

            if !self
                .pmp_prot(pte_addr, geo.pte_size, PrivilegeLevel::S)
                .contains(Prot::READ)
            {
                return Err(WalkFault::Pmp);
            }
            self.mtt_check(pte_addr, AccessType::Load, PrivilegeLevel::S)?;

            let pte = self.read_pte(pte_addr, geo.pte_size).map_err(|e| {
                log::debug!("{e}");
                WalkFault::Fail
            })?;
            let pte = PageTableEntry::new(pte);

            if !rv32 {
                if pte.bits & PTE_RESERVED != 0 {
                    return Err(WalkFault::Fail);
                }
                let pbmt = pte.bits & PTE_PBMT;
                if (!p.pbmte && pbmt != 0) || (p.pbmte && pbmt == PTE_PBMT) {
                    return Err(WalkFault::Fail);
                }
                if !self.has(Extensions::SVNAPOT) && pte.bits & PTE_N != 0 {
                    return Err(WalkFault::Fail);
                }
            }
            let ppn = pte.ppn(rv32);

            let sstack_page = self.xsse() && first_stage && pte.rwx() == PTEFlags::W;

            if !pte.has(PTEFlags::V) {
                return Err(WalkFault::Fail);
            }
            if pte.is_leaf() {
                return Ok(Leaf {
                    pte,
                    pte_addr,
                    ppn,
                    level,
                    ptshift,
                    sstack_page,
                });
            }
            if pte.flags().intersects(PTEFlags::D | PTEFlags::A | PTEFlags::U) {
                return Err(WalkFault::Fail);
            }
            if pte.bits & PTE_ATTR != 0 {
                return Err(WalkFault::Fail);
            }
            base = ppn << PAGE_SHIFT;
            ptshift = ptshift.saturating_sub(geo.idx_bits);
        }

        // No leaf at any level.
        Err(WalkFault::Fail)
    }

    /// Translate one stage, or both when `two_stage` and `first_stage`
    /// are set: VS-stage page tables are then G-stage translated.
    ///
    /// `is_debug` walks without committing A/D updates.
    pub fn translate(
        &self,
        addr: WordType,
        access: AccessType,
        idx: u32,
        first_stage: bool,
        two_stage: bool,
        is_debug: bool,
    ) -> TranslateResult {
        let identity = Ok(Mapping {
            physical: addr,
            prot: Prot::all(),
        });
        let mode = mmu_idx::priv_level(idx);
        if mode == PrivilegeLevel::M || !self.cfg.mmu {
            return identity;
        }

        let p = match self.stage_params(first_stage, two_stage) {
            Ok(Some(p)) => p,
            Ok(None) => return identity,
            Err(e) => {
                log::error!("{e}");
                return Err(WalkFault::Fail);
            }
        };

        let va_bits = p.geo.va_bits(p.widened);
        if first_stage {
            let xlen = self.xlen();
            let mask: WordType = if xlen > va_bits - 1 {
                (1 << (xlen - (va_bits - 1))) - 1
            } else {
                0
            };
            let msbs = (addr >> (va_bits - 1)) & mask;
            if msbs != 0 && msbs != mask {
                return Err(WalkFault::Fail);
            }
        } else if p.geo.pte_size == 8 && addr >> va_bits != 0 {
            return Err(WalkFault::Fail);
        }

        let sstack_inst = mmu_idx::shadow_stack(idx);
        loop {
            let leaf = self.find_leaf(addr, &p, first_stage, two_stage, is_debug)?;
            let pte = leaf.pte;

            if leaf.ppn & ((1 << leaf.ptshift) - 1) != 0 {
                // Misaligned superpage
                return Err(WalkFault::Fail);
            }
            if !p.pbmte && pte.bits & PTE_PBMT != 0 {
                return Err(WalkFault::Fail);
            }
            match pte.rwx() {
                rwx if rwx == PTEFlags::W && !leaf.sstack_page => return Err(WalkFault::Fail),
                rwx if rwx == PTEFlags::W | PTEFlags::X => return Err(WalkFault::Fail),
                _ => {}
            }

            if !legal_sstack_access(access, sstack_inst, leaf.sstack_page) {
                if sstack_inst && pte.rwx() == PTEFlags::R {
                    return Err(WalkFault::Fail);
                }
                return Err(WalkFault::Pmp);
            }

            let prot = self.leaf_prot(pte, first_stage, two_stage);

            if pte.has(PTEFlags::U) {
                if mode != PrivilegeLevel::U && !mmu_idx::sum(idx) {
                    return Err(WalkFault::Fail);
                }
            } else if mode != PrivilegeLevel::S {
                return Err(WalkFault::Fail);
            }
            // SUM grants data access only.
            let prot = if pte.has(PTEFlags::U) && mode != PrivilegeLevel::U {
                prot & (Prot::READ | Prot::WRITE)
            } else {
                prot
            };

            if !prot.contains(access.required()) {
                return Err(WalkFault::Fail);
            }

            let mut updated = pte;
            if p.adue {
                updated = updated.with(PTEFlags::A);
                if access == AccessType::Store {
                    updated = updated.with(PTEFlags::D);
                }
            } else if !pte.has(PTEFlags::A) || (access == AccessType::Store && !pte.has(PTEFlags::D)) {
                return Err(WalkFault::Fail);
            }

            let mut pte = pte;
            if updated != pte && !is_debug {
                match self.mem.compare_exchange(
                    leaf.pte_addr,
                    p.geo.pte_size,
                    pte.bits,
                    updated.bits,
                ) {
                    Ok(Ok(_)) => pte = updated,
                    Ok(Err(now)) => {
                        log::trace!(
                            "PTE at {:#x} changed to {now:#x} during A/D update, rewalking",
                            leaf.pte_addr
                        );
                        continue;
                    }
                    Err(e) => {
                        // ROM or I/O: A/D cannot be set.
                        log::debug!("A/D update of PTE at {:#x} failed: {e}", leaf.pte_addr);
                        return Err(WalkFault::Fail);
                    }
                }
            }

            let vpn = addr >> PAGE_SHIFT;
            let mut napot_bits = 0;
            if self.has(Extensions::SVNAPOT) && pte.bits & PTE_N != 0 {
                napot_bits = leaf.ppn.trailing_zeros() + 1;
                if leaf.level != p.geo.levels - 1 || napot_bits != 4 {
                    return Err(WalkFault::Fail);
                }
            }
            let napot_mask: WordType = (1 << napot_bits) - 1;
            let ppn = (leaf.ppn & !napot_mask)
                | (vpn & napot_mask)
                | (vpn & ((1 << leaf.ptshift) - 1));
            let physical = (ppn << PAGE_SHIFT) | (addr & (PAGE_SIZE - 1));

            // Keep clean pages read-only so the first store walks again.
            let prot = if access != AccessType::Store && !pte.has(PTEFlags::D) {
                prot - Prot::WRITE
            } else {
                prot
            };
            return Ok(Mapping { physical, prot });
        }
    }

    /// Protection from the leaf's R/W/X with the applicable MXR overrides.
    fn leaf_prot(&self, pte: PageTableEntry, first_stage: bool, two_stage: bool) -> Prot {
        let st = &self.state;
        let mut prot = Prot::empty();
        if pte.has(PTEFlags::R) {
            prot |= Prot::READ;
        }
        if pte.has(PTEFlags::W) {
            prot |= Prot::WRITE;
        }
        if pte.has(PTEFlags::X) {
            let mut mxr = false;
            if first_stage || !st.virt {
                mxr = st.mstatus & mstatus::MXR != 0;
            }
            if first_stage && two_stage && !st.virt {
                mxr |= st.vsstatus() & mstatus::MXR != 0;
            }
            // HS-level MXR covers both stages.
            if st.virt {
                mxr |= st.hs_status() & mstatus::MXR != 0;
            }
            if mxr {
                prot |= Prot::READ;
            }
            prot |= Prot::EXEC;
        }
        prot
    }
}
