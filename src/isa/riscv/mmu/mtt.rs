//! Memory tracking table (Smmtt): a physical-address radix tree granting
//! supervisor domains access to memory.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    config::{Extensions, arch_config::WordType, mmu_config::PAGE_SHIFT},
    isa::riscv::{
        csr_reg::{PrivilegeLevel, fields::mttp},
        hart::Hart,
        mmu::{AccessType, Prot, WalkFault},
    },
};

/// `mttp.MODE` after decoding. The `*Rw` forms carry separate read and
/// write permissions.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum MttMode {
    Bare = 0,
    Smmtt34 = 1,
    Smmtt34Rw = 2,
    Smmtt46 = 3,
    Smmtt46Rw = 4,
    Smmtt56 = 5,
    Smmtt56Rw = 6,
}

impl MttMode {
    fn is_rw(self) -> bool {
        matches!(self, Self::Smmtt34Rw | Self::Smmtt46Rw | Self::Smmtt56Rw)
    }

    fn has_l3(self) -> bool {
        matches!(self, Self::Smmtt56 | Self::Smmtt56Rw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MttAccess {
    Disallow,
    /// Read and execute.
    AllowR,
    AllowRw,
    Allow,
}

impl MttAccess {
    pub fn prot(self) -> Prot {
        match self {
            MttAccess::Disallow => Prot::empty(),
            MttAccess::AllowR => Prot::READ | Prot::EXEC,
            MttAccess::AllowRw | MttAccess::Allow => Prot::all(),
        }
    }
}

/// Field layout of one table format.
#[rustfmt::skip]
struct Layout {
    l3_index    : WordType,
    l2_index    : WordType,
    l2_type     : WordType,
    l1_index    : WordType,
    /// Bits selecting a 2 MiB page inside an `L2` page bitmap.
    l2_offset   : WordType,
    /// Bits selecting a 4 KiB page inside an `L1` entry.
    l1_offset   : WordType,
    /// Width of one `L1` permission code.
    code_bits   : u32,
}

#[rustfmt::skip]
const RW_LAYOUT: Layout = Layout {
    l3_index    : 0x00FF_C000_0000_0000,
    l2_index    : 0x0000_3FFF_FE00_0000,
    l2_type     : 0x0000_F000_0000_0000,
    l1_index    : 0x0000_0000_01FF_0000,
    l2_offset   : 0x0000_0000_01E0_0000,
    l1_offset   : 0x0000_0000_0000_F000,
    code_bits   : 4,
};

#[rustfmt::skip]
const LAYOUT: Layout = Layout {
    l3_index    : 0x00FF_C000_0000_0000,
    l2_index    : 0x0000_3FFF_FC00_0000,
    l2_type     : 0x0000_3000_0000_0000,
    l1_index    : 0x0000_0000_03FE_0000,
    l2_offset   : 0x0000_0000_03E0_0000,
    l1_offset   : 0x0000_0000_0001_F000,
    code_bits   : 2,
};

const L2_TYPE_SHIFT: u32 = 44;

/// What an `L2` entry describes.
#[derive(Debug, PartialEq, Eq)]
enum L2Entry {
    Leaf(MttAccess),
    /// Per-2 MiB permission bitmap.
    Pages,
    /// Points at an `L1` table.
    Dir,
}

fn decode_l2(mode: MttMode, ty: WordType) -> Option<L2Entry> {
    let entry = if mode.is_rw() {
        match ty {
            0b0000 => L2Entry::Leaf(MttAccess::Disallow),
            0b0001 => L2Entry::Leaf(MttAccess::AllowR),
            0b0011 => L2Entry::Leaf(MttAccess::AllowRw),
            0b0100 => L2Entry::Dir,
            0b0111 => L2Entry::Pages,
            _ => return None,
        }
    } else {
        match ty {
            0b00 => L2Entry::Leaf(MttAccess::Disallow),
            0b01 => L2Entry::Leaf(MttAccess::Allow),
            0b10 => L2Entry::Dir,
            _ => L2Entry::Pages,
        }
    };
    Some(entry)
}

/// Decode the permission of one 2 MiB page.
fn decode_page_code(mode: MttMode, code: WordType) -> Option<MttAccess> {
    match (mode.is_rw(), code) {
        (_, 0b00) => Some(MttAccess::Disallow),
        (true, 0b01) => Some(MttAccess::AllowR),
        (true, 0b11) => Some(MttAccess::AllowRw),
        (false, 0b01) => Some(MttAccess::Allow),
        _ => None,
    }
}

/// Decode a 4 KiB page code from an `L1` entry.
fn decode_l1_code(mode: MttMode, code: WordType) -> Option<MttAccess> {
    match (mode.is_rw(), code) {
        (_, 0b0000) => Some(MttAccess::Disallow),
        (true, 0b0001) => Some(MttAccess::AllowR),
        (true, 0b0011) => Some(MttAccess::AllowRw),
        (false, 0b01) => Some(MttAccess::Allow),
        _ => None,
    }
}

#[inline]
fn extract(addr: WordType, mask: WordType) -> WordType {
    (addr & mask) >> mask.trailing_zeros()
}

impl Hart {
    /// Table entries are read as implicit M-mode loads.
    fn mtt_read(&self, addr: WordType) -> Option<WordType> {
        if !self.pmp_prot(addr, 8, PrivilegeLevel::M).contains(Prot::READ) {
            return None;
        }
        match self.mem.load(addr, 8) {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("MTT read at {addr:#x} failed: {e}");
                None
            }
        }
    }

    /// Permission the memory tracking table grants on `addr`.
    pub fn mtt_lookup(&self, addr: WordType) -> MttAccess {
        let Ok(mode) = MttMode::try_from(self.state.mtt_mode) else {
            return MttAccess::Disallow;
        };
        if mode == MttMode::Bare {
            return MttAccess::Allow;
        }
        let layout = if mode.is_rw() { &RW_LAYOUT } else { &LAYOUT };
        self.mtt_walk(addr, mode, layout).unwrap_or(MttAccess::Disallow)
    }

    fn mtt_walk(&self, addr: WordType, mode: MttMode, l: &Layout) -> Option<MttAccess> {
        let mut base = self.state.mtt_ppn << PAGE_SHIFT;

        if mode.has_l3() {
            let l3 = self.mtt_read(base + (extract(addr, l.l3_index) << 3))?;
            base = (l3 & mttp::PPN_MASK_64) << PAGE_SHIFT;
        }

        let l2_addr = base + (extract(addr, l.l2_index) << 3);
        let l2 = self.mtt_read(l2_addr)?;
        let ty = (l2 & l.l2_type) >> L2_TYPE_SHIFT;
        let Some(kind) = decode_l2(mode, ty) else {
            log::warn!("Reserved MTT L2 type {ty:#x} at {l2_addr:#x}");
            return None;
        };

        match kind {
            L2Entry::Leaf(access) => return Some(access),
            L2Entry::Pages => {
                let index = extract(addr, l.l2_offset);
                // Two bits per 2 MiB page in the rw format, one otherwise.
                let (width, code_mask) = if mode.is_rw() { (2, 0b11) } else { (1, 0b1) };
                let code = (l2 >> (index * width)) & code_mask;
                let access = decode_page_code(mode, code);
                if access.is_none() {
                    log::warn!("Reserved MTT 2M code {code:#b} at {l2_addr:#x}");
                }
                return access;
            }
            L2Entry::Dir => {}
        }

        let base = (l2 & mttp::PPN_MASK_64) << PAGE_SHIFT;
        let l1_addr = base + (extract(addr, l.l1_index) << 3);
        let l1 = self.mtt_read(l1_addr)?;
        let index = extract(addr, l.l1_offset);
        let code = (l1 >> (index * l.code_bits as WordType)) & ((1 << l.code_bits) - 1);
        let access = decode_l1_code(mode, code);
        if access.is_none() {
            log::warn!("Reserved MTT L1 code {code:#b} at {l1_addr:#x}");
        }
        access
    }

    /// MTT overlay on a physical access by `mode`. M-mode is exempt.
    pub(crate) fn mtt_check(
        &self,
        addr: WordType,
        access: AccessType,
        mode: PrivilegeLevel,
    ) -> Result<Prot, WalkFault> {
        if !self.has(Extensions::SMMTT) || self.state.mtt_mode == 0 || mode == PrivilegeLevel::M {
            return Ok(Prot::all());
        }
        let prot = self.mtt_lookup(addr).prot();
        if prot.contains(access.required()) {
            Ok(prot)
        } else {
            Err(WalkFault::Mtt)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        device::Mem,
        isa::riscv::hart_tester::{TEST_RAM_BASE, TestHartBuilder},
    };

    const TABLE: WordType = TEST_RAM_BASE + 0x1_0000;
    const L1_TABLE: WordType = TEST_RAM_BASE + 0x2_0000;

    fn mtt_hart(mode: MttMode) -> Hart {
        let mut hart = TestHartBuilder::new().with(Extensions::SMMTT).build();
        hart.state.mtt_mode = mode.into();
        hart.state.mtt_ppn = TABLE >> PAGE_SHIFT;
        hart
    }

    fn l2_slot(addr: WordType, l: &Layout) -> WordType {
        TABLE + (extract(addr, l.l2_index) << 3)
    }

    #[test]
    fn test_bare_and_machine_mode_pass() {
        let hart = TestHartBuilder::new().with(Extensions::SMMTT).build();
        assert_eq!(
            hart.mtt_check(0x1000, AccessType::Store, PrivilegeLevel::S),
            Ok(Prot::all())
        );
        let hart = mtt_hart(MttMode::Smmtt46);
        assert_eq!(
            hart.mtt_check(0x1000, AccessType::Store, PrivilegeLevel::M),
            Ok(Prot::all())
        );
        // Empty table: every L2 entry is 1G_disallow.
        assert_eq!(
            hart.mtt_check(0x1000, AccessType::Load, PrivilegeLevel::S),
            Err(WalkFault::Mtt)
        );
    }

    #[test]
    fn test_gigabyte_leaf() {
        let hart = mtt_hart(MttMode::Smmtt46);
        let addr = 0x4000_0000;
        hart.mem.store(l2_slot(addr, &LAYOUT), 8, 0b01 << 44).unwrap();
        assert_eq!(hart.mtt_lookup(addr), MttAccess::Allow);
        // One L2 entry spans 64 MiB in this format.
        assert_eq!(hart.mtt_lookup(addr + 0x3FF_F000), MttAccess::Allow);
        assert_eq!(hart.mtt_lookup(addr + 0x400_0000), MttAccess::Disallow);
    }

    #[test]
    fn test_rw_2m_pages() {
        let hart = mtt_hart(MttMode::Smmtt46Rw);
        let addr = 0x8000_0000;
        // Page 0 read-only, page 1 read-write.
        let entry = (0b0111 << 44) | (0b11 << 2) | 0b01;
        hart.mem.store(l2_slot(addr, &RW_LAYOUT), 8, entry).unwrap();

        assert_eq!(hart.mtt_lookup(addr), MttAccess::AllowR);
        assert_eq!(hart.mtt_lookup(addr + 0x20_0000), MttAccess::AllowRw);
        assert_eq!(hart.mtt_lookup(addr + 0x40_0000), MttAccess::Disallow);
        assert_eq!(
            hart.mtt_check(addr, AccessType::Store, PrivilegeLevel::U),
            Err(WalkFault::Mtt)
        );
        assert!(hart.mtt_check(addr, AccessType::Fetch, PrivilegeLevel::U).is_ok());
    }

    #[test]
    fn test_l1_directory() {
        let hart = mtt_hart(MttMode::Smmtt46);
        let addr = 0x8000_3000;
        let l2 = (0b10 << 44) | (L1_TABLE >> PAGE_SHIFT);
        hart.mem.store(l2_slot(addr, &LAYOUT), 8, l2).unwrap();
        let l1_slot = L1_TABLE + (extract(addr, LAYOUT.l1_index) << 3);
        // 4 KiB page 3 of this 128 KiB block allowed.
        hart.mem.store(l1_slot, 8, 0b01 << 6).unwrap();

        assert_eq!(hart.mtt_lookup(addr), MttAccess::Allow);
        assert_eq!(hart.mtt_lookup(addr - 0x1000), MttAccess::Disallow);
    }

    #[test]
    fn test_reserved_encoding_denies() {
        let hart = mtt_hart(MttMode::Smmtt46Rw);
        let addr = 0x8000_0000;
        hart.mem.store(l2_slot(addr, &RW_LAYOUT), 8, 0b1111 << 44).unwrap();
        assert_eq!(hart.mtt_lookup(addr), MttAccess::Disallow);
    }
}
