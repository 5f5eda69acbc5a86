//! Control transfer records.
//!
//! The buffer is a ring indexed by `sctrstatus.WRPTR`; software sees it
//! through `*ireg*` with logical entry 0 being the newest record.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    config::arch_config::WordType,
    isa::riscv::{
        csr_reg::{PrivilegeLevel, fields::ctr},
        hart::Hart,
    },
    utils::{get_field, set_field},
};

/// Transfer type stored in `ctrdata.TYPE`.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum CtrType {
    None = 0,
    Exception = 1,
    Interrupt = 2,
    ExcepIntRet = 3,
    NontakenBranch = 4,
    TakenBranch = 5,
    IndirectCall = 8,
    DirectCall = 9,
    IndirectJump = 10,
    DirectJump = 11,
    CoRoutineSwap = 12,
    Return = 13,
    OtherIndirectJump = 14,
    OtherDirectJump = 15,
}

impl CtrType {
    /// The inhibit bit in `xctrctl` for this type. For not-taken branches it
    /// is an enable bit instead.
    #[inline]
    fn inhibit_bit(self) -> WordType {
        1 << (ctr::INH_START as u64 + u64::from(self))
    }

    #[inline]
    fn is_trap(self) -> bool {
        matches!(self, CtrType::Exception | CtrType::Interrupt)
    }

    /// Types that survive RAS emulation.
    #[inline]
    fn is_ras(self) -> bool {
        matches!(
            self,
            CtrType::IndirectCall | CtrType::DirectCall | CtrType::Return | CtrType::CoRoutineSwap
        )
    }
}

/// Classify `jalr rd, rs1`.
pub fn classify_jalr(rd: u8, rs1: u8) -> CtrType {
    let link = |r: u8| r == 1 || r == 5;
    if (rd == 1 && rs1 != 5) || (rd == 5 && rs1 != 1) {
        CtrType::IndirectCall
    } else if rd == 0 && !link(rs1) {
        CtrType::IndirectJump
    } else if link(rs1) && !link(rd) {
        CtrType::Return
    } else if (rs1 == 1 && rd == 5) || (rs1 == 5 && rd == 1) {
        CtrType::CoRoutineSwap
    } else {
        CtrType::OtherIndirectJump
    }
}

/// Classify `jal rd`.
pub fn classify_jal(rd: u8) -> CtrType {
    match rd {
        1 | 5 => CtrType::DirectCall,
        0 => CtrType::DirectJump,
        _ => CtrType::OtherDirectJump,
    }
}

impl Hart {
    /// Enable bit of `level` in the control register that governs it.
    /// `vsctrctl` reuses the S/U positions for VS/VU.
    fn ctr_mode_mask(level: PrivilegeLevel) -> WordType {
        match level {
            PrivilegeLevel::M => ctr::M_ENABLE,
            PrivilegeLevel::S => ctr::S_ENABLE,
            PrivilegeLevel::U => ctr::U_ENABLE,
        }
    }

    fn ctr_control(&self, level: PrivilegeLevel, virt: bool) -> WordType {
        if level != PrivilegeLevel::M && virt {
            self.state.ctr.vsctrctl
        } else {
            self.state.ctr.mctrctl
        }
    }

    /// Append a record for a transfer that left `(src_priv, src_virt)` and
    /// landed in the current mode.
    pub fn ctr_add_entry(
        &mut self,
        mut src: WordType,
        mut dst: WordType,
        ty: CtrType,
        src_priv: PrivilegeLevel,
        src_virt: bool,
    ) {
        let tgt_priv = self.state.priv_level;
        let tgt_virt = self.state.virt;
        let src_mask = Self::ctr_mode_mask(src_priv);
        let tgt_mask = Self::ctr_mode_mask(tgt_priv);
        let src_ctrl = self.ctr_control(src_priv, src_virt);
        let tgt_ctrl = self.ctr_control(tgt_priv, tgt_virt);
        let src_on = src_ctrl & src_mask != 0;
        let tgt_on = tgt_ctrl & tgt_mask != 0;
        let mut ext_trap = false;

        let st = &self.state.ctr;
        if st.status & ctr::SCTRSTATUS_FROZEN != 0 {
            return;
        }
        if st.mctrctl & ctr::RASEMU != 0 && !ty.is_ras() {
            return;
        }

        if ty.is_trap() {
            match (src_on, tgt_on) {
                (false, true) => src = 0,
                (true, false) => {
                    // External trap: recorded only when the target opted in.
                    let opted_in = match tgt_priv {
                        PrivilegeLevel::M => tgt_ctrl & ctr::MTE != 0,
                        PrivilegeLevel::S => tgt_ctrl & ctr::STE != 0,
                        PrivilegeLevel::U => true,
                    };
                    if !opted_in {
                        return;
                    }
                    ext_trap = true;
                    dst = 0;
                }
                (false, false) => return,
                (true, true) => {}
            }
        } else if ty == CtrType::ExcepIntRet {
            if !src_on {
                return;
            }
            if !tgt_on {
                dst = 0;
            }
        } else if !tgt_on {
            return;
        }

        if tgt_ctrl & ctr::RASEMU == 0 && !ext_trap {
            let bit = tgt_ctrl & ty.inhibit_bit() != 0;
            let filtered = if ty == CtrType::NontakenBranch { !bit } else { bit };
            if filtered {
                return;
            }
        }

        let depth = self.state.ctr.entries();
        let st = &mut self.state.ctr;
        let mut head = get_field(st.status, ctr::SCTRSTATUS_WRPTR);
        if tgt_ctrl & ctr::RASEMU != 0 {
            match ty {
                CtrType::Return => {
                    head = head.wrapping_sub(1) & (depth - 1);
                    st.src[head as usize] &= !ctr::SOURCE_VALID;
                    st.status = set_field(st.status, ctr::SCTRSTATUS_WRPTR, head);
                    return;
                }
                // A swap replaces the newest record.
                CtrType::CoRoutineSwap => head = head.wrapping_sub(1) & (depth - 1),
                _ => {}
            }
        }

        let slot = head as usize;
        st.src[slot] = src | ctr::SOURCE_VALID;
        st.dst[slot] = dst & !ctr::TARGET_MISP;
        st.data[slot] = set_field(0, ctr::DATA_TYPE_MASK, ty.into());
        head = (head + 1) & (depth - 1);
        st.status = set_field(st.status, ctr::SCTRSTATUS_WRPTR, head);
        log::trace!("CTR record {ty:?} {src:#x} -> {dst:#x}");
    }

    /// Freeze recording if any of `freeze_mask` (`BPFRZ`, `LCOFIFRZ`) is set
    /// in `mctrctl`.
    pub fn ctr_freeze(&mut self, freeze_mask: WordType) {
        debug_assert_eq!(freeze_mask & !(ctr::BPFRZ | ctr::LCOFIFRZ), 0);
        if self.state.ctr.mctrctl & freeze_mask != 0 {
            self.state.ctr.status |= ctr::SCTRSTATUS_FROZEN;
        }
    }

    /// `sctrclr`: drop every record.
    pub fn ctr_clear(&mut self) {
        let st = &mut self.state.ctr;
        st.src.fill(0);
        st.dst.fill(0);
        st.data.fill(0);
    }

    pub fn ctr_jalr(&mut self, src: WordType, dst: WordType, rd: u8, rs1: u8) {
        let (level, virt) = (self.state.priv_level, self.state.virt);
        self.ctr_add_entry(src, dst, classify_jalr(rd, rs1), level, virt);
    }

    pub fn ctr_jal(&mut self, src: WordType, dst: WordType, rd: u8) {
        let (level, virt) = (self.state.priv_level, self.state.virt);
        self.ctr_add_entry(src, dst, classify_jal(rd), level, virt);
    }

    pub fn ctr_branch(&mut self, src: WordType, dst: WordType, taken: bool) {
        let ty = if taken {
            CtrType::TakenBranch
        } else {
            CtrType::NontakenBranch
        };
        let (level, virt) = (self.state.priv_level, self.state.virt);
        self.ctr_add_entry(src, dst, ty, level, virt);
    }

    /// Logical entry `entry` (0 is the newest) as `(source, target, data)`.
    pub fn ctr_entry(&self, entry: WordType) -> Option<(WordType, WordType, WordType)> {
        let st = &self.state.ctr;
        let depth = st.entries();
        if entry >= depth {
            return None;
        }
        let wrptr = get_field(st.status, ctr::SCTRSTATUS_WRPTR);
        let idx = (wrptr.wrapping_sub(entry).wrapping_sub(1) & (depth - 1)) as usize;
        Some((st.src[idx], st.dst[idx], st.data[idx]))
    }
}
