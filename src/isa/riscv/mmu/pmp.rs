//! Physical memory protection.

use crate::{
    config::{arch_config::WordType, mmu_config::PAGE_SIZE},
    isa::riscv::{
        csr_reg::{PrivilegeLevel, fields::mseccfg},
        mmu::Prot,
    },
};

pub const PMP_MAX_ENTRIES: usize = 64;

#[rustfmt::skip]
pub mod cfg {
    pub const R         : u8 = 1 << 0;
    pub const W         : u8 = 1 << 1;
    pub const X         : u8 = 1 << 2;
    pub const A         : u8 = 0b11 << 3;
    pub const L         : u8 = 1 << 7;
    pub const A_SHIFT   : u32 = 3;
    pub const WRITABLE  : u8 = R | W | X | A | L;
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMatch {
    Off = 0,
    Tor = 1,
    Na4 = 2,
    Napot = 3,
}

impl AddrMatch {
    fn of(cfg: u8) -> Self {
        match (cfg & cfg::A) >> cfg::A_SHIFT {
            0 => AddrMatch::Off,
            1 => AddrMatch::Tor,
            2 => AddrMatch::Na4,
            _ => AddrMatch::Napot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PmpTable {
    cfg: [u8; PMP_MAX_ENTRIES],
    addr: [WordType; PMP_MAX_ENTRIES],
    regions: usize,
}

impl Default for PmpTable {
    fn default() -> Self {
        Self {
            cfg: [0; PMP_MAX_ENTRIES],
            addr: [0; PMP_MAX_ENTRIES],
            regions: 0,
        }
    }
}

impl PmpTable {
    pub fn set_regions(&mut self, regions: u8) {
        self.regions = (regions as usize).min(PMP_MAX_ENTRIES);
    }

    #[inline]
    pub fn regions(&self) -> usize {
        self.regions
    }

    fn locked(&self, idx: usize) -> bool {
        self.cfg[idx] & cfg::L != 0
    }

    pub fn has_locked(&self) -> bool {
        (0..self.regions).any(|i| self.locked(i))
    }

    /// Some implemented entry is not `OFF`.
    pub fn has_rules(&self) -> bool {
        (0..self.regions).any(|i| AddrMatch::of(self.cfg[i]) != AddrMatch::Off)
    }

    /// Entries held by `pmpcfg{reg}`: 4 on RV32, 8 on RV64 (odd registers are absent there).
    fn cfg_entries(reg: usize, xlen: u32) -> std::ops::Range<usize> {
        let base = reg * 4;
        base..base + xlen as usize / 8
    }

    pub fn read_cfg(&self, reg: usize, xlen: u32) -> WordType {
        Self::cfg_entries(reg, xlen)
            .enumerate()
            .filter(|&(_, idx)| idx < self.regions)
            .fold(0, |acc, (byte, idx)| {
                acc | (self.cfg[idx] as WordType) << (byte * 8)
            })
    }

    /// Returns whether any entry changed.
    pub fn write_cfg(&mut self, reg: usize, value: WordType, xlen: u32, seccfg: WordType) -> bool {
        let rlb = seccfg & mseccfg::RLB != 0;
        let mml = seccfg & mseccfg::MML != 0;
        let mut changed = false;

        for (byte, idx) in Self::cfg_entries(reg, xlen).enumerate() {
            if idx >= self.regions {
                break;
            }
            if self.locked(idx) && !rlb {
                log::trace!("pmpcfg entry {idx} is locked, ignoring write");
                continue;
            }
            let mut new = (value >> (byte * 8)) as u8 & cfg::WRITABLE;
            // W without R is reserved outside MML.
            if !mml && new & cfg::W != 0 && new & cfg::R == 0 {
                new &= !(cfg::R | cfg::W);
            }
            if self.cfg[idx] != new {
                self.cfg[idx] = new;
                changed = true;
            }
        }
        changed
    }

    pub fn read_addr(&self, idx: usize) -> WordType {
        if idx < self.regions { self.addr[idx] } else { 0 }
    }

    pub fn write_addr(&mut self, idx: usize, value: WordType, seccfg: WordType) -> bool {
        if idx >= self.regions {
            return false;
        }
        let rlb = seccfg & mseccfg::RLB != 0;
        // A locked TOR entry also locks the address below it.
        let next_locks = idx + 1 < self.regions
            && self.locked(idx + 1)
            && AddrMatch::of(self.cfg[idx + 1]) == AddrMatch::Tor;
        if (self.locked(idx) || next_locks) && !rlb {
            log::trace!("pmpaddr{idx} is locked, ignoring write");
            return false;
        }
        let changed = self.addr[idx] != value;
        self.addr[idx] = value;
        changed
    }

    /// Byte range `[start, end)` covered by entry `idx`.
    fn range(&self, idx: usize) -> Option<(u128, u128)> {
        let addr = self.addr[idx] as u128;
        match AddrMatch::of(self.cfg[idx]) {
            AddrMatch::Off => None,
            AddrMatch::Tor => {
                let start = if idx == 0 { 0 } else { (self.addr[idx - 1] as u128) << 2 };
                Some((start, addr << 2))
            }
            AddrMatch::Na4 => Some((addr << 2, (addr << 2) + 4)),
            AddrMatch::Napot => {
                let ones = self.addr[idx].trailing_ones();
                let size = 1u128 << (ones + 3);
                let base = (addr & !((1u128 << ones) - 1)) << 2;
                Some((base, base + size))
            }
        }
    }

    /// Permissions `priv_level` holds on `[addr, addr + size)`.
    ///
    /// The lowest-numbered matching entry decides; an access straddling an
    /// entry boundary matches nothing and is denied.
    pub fn privileges(
        &self,
        addr: WordType,
        size: WordType,
        priv_level: PrivilegeLevel,
        seccfg: WordType,
    ) -> Prot {
        let mml = seccfg & mseccfg::MML != 0;
        let mmwp = seccfg & mseccfg::MMWP != 0;
        let is_m = priv_level == PrivilegeLevel::M;

        if !self.has_rules() {
            return if is_m && mmwp { Prot::empty() } else { Prot::all() };
        }

        let start = addr as u128;
        let end = start + size.max(1) as u128;
        for idx in 0..self.regions {
            let Some((lo, hi)) = self.range(idx) else {
                continue;
            };
            let inside = start >= lo && end <= hi;
            let overlaps = start < hi && end > lo;
            if inside {
                return self.entry_privileges(idx, is_m, mml);
            }
            if overlaps {
                log::trace!("Access {addr:#x}+{size} straddles pmp entry {idx}");
                return Prot::empty();
            }
        }

        match (is_m, mml, mmwp) {
            (true, _, true) => Prot::empty(),
            (true, true, false) => Prot::READ | Prot::WRITE,
            (true, false, false) => Prot::all(),
            (false, ..) => Prot::empty(),
        }
    }

    /// TLB granularity for the page holding `addr`: a whole page unless a
    /// rule covers only part of it, in which case nothing may be cached.
    pub fn tlb_size(&self, addr: WordType) -> WordType {
        let start = (addr & !(PAGE_SIZE - 1)) as u128;
        let end = start + PAGE_SIZE as u128;
        let partial = (0..self.regions)
            .filter_map(|idx| self.range(idx))
            .any(|(lo, hi)| lo < end && hi > start && (lo > start || hi < end));
        if partial { 1 } else { PAGE_SIZE }
    }

    fn entry_privileges(&self, idx: usize, is_m: bool, mml: bool) -> Prot {
        let cfg = self.cfg[idx];
        let granted = Prot::from_bits_truncate(cfg & (cfg::R | cfg::W | cfg::X));
        let locked = cfg & cfg::L != 0;
        if !mml {
            return if is_m && !locked { Prot::all() } else { granted };
        }

        const R: Prot = Prot::READ;
        const RW: Prot = Prot::READ.union(Prot::WRITE);
        const RX: Prot = Prot::READ.union(Prot::EXEC);
        const X: Prot = Prot::EXEC;
        let shared_w = cfg & (cfg::R | cfg::W) == cfg::W;
        let rwx = cfg & (cfg::R | cfg::W | cfg::X) == cfg::R | cfg::W | cfg::X;
        match (locked, is_m) {
            // Shared regions: W without R, and locked RWX.
            (false, true) if shared_w => RW,
            (false, false) if shared_w && cfg & cfg::X != 0 => RW,
            (false, false) if shared_w => R,
            (true, true) if shared_w && cfg & cfg::X != 0 => RX,
            (true, _) if shared_w => X,
            (true, _) if rwx => R,
            // Otherwise the L bit selects which side the entry applies to.
            (true, true) | (false, false) => granted,
            _ => Prot::empty(),
        }
    }
}
