//! Shadow stack (Zicfiss) and landing pad (Zicfilp) checks.

use crate::{
    config::{Extensions, arch_config::WordType},
    isa::riscv::{
        csr_reg::{
            PrivilegeLevel,
            fields::{envcfg, mseccfg},
        },
        hart::Hart,
        mmu::{AccessType, mmu_idx},
        trap::{Exception, sw_check_code},
    },
};

/// Bits `[31:12]` of `x7` hold the expected landing pad label.
const LPAD_LABEL_SHIFT: u32 = 12;
const LPAD_LABEL_MASK: WordType = 0xfffff;

impl Hart {
    /// Shadow stack enabled for the current mode.
    pub fn xsse(&self) -> bool {
        if !self.has(Extensions::ZICFISS) {
            return false;
        }
        let st = &self.state;
        match st.priv_level {
            PrivilegeLevel::U => st.senvcfg & envcfg::SSE != 0,
            PrivilegeLevel::S if st.virt => st.henvcfg & envcfg::SSE != 0,
            PrivilegeLevel::S => st.menvcfg & envcfg::SSE != 0,
            PrivilegeLevel::M => false,
        }
    }

    /// Landing pads enforced for the current mode.
    pub fn xlpe(&self) -> bool {
        if !self.has(Extensions::ZICFILP) {
            return false;
        }
        let st = &self.state;
        match st.priv_level {
            PrivilegeLevel::U if self.has(Extensions::S) => st.senvcfg & envcfg::LPE != 0,
            PrivilegeLevel::U => st.menvcfg & envcfg::LPE != 0,
            PrivilegeLevel::S if st.virt => st.henvcfg & envcfg::LPE != 0,
            PrivilegeLevel::S => st.menvcfg & envcfg::LPE != 0,
            PrivilegeLevel::M => st.mseccfg & mseccfg::MLPE != 0,
        }
    }

    fn sw_check(&mut self, code: WordType) -> Exception {
        self.state.sw_check_code = code;
        Exception::SoftwareCheck
    }

    fn ss_mmu_idx(&self) -> u32 {
        self.mmu_index(false) | mmu_idx::SS_ACCESS
    }

    fn ss_check_aligned(&mut self, width: WordType) -> Result<(), Exception> {
        if self.state.ssp % width != 0 {
            self.state.badaddr = self.state.ssp;
            return Err(Exception::StoreFault);
        }
        Ok(())
    }

    /// `sspush`: store `value` below `ssp` and move `ssp` down.
    pub fn sspush(&mut self, value: WordType) -> Result<(), Exception> {
        let width = self.xlen() as WordType / 8;
        self.ss_check_aligned(width)?;
        let addr = self.state.ssp.wrapping_sub(width);
        let idx = self.ss_mmu_idx();
        self.store_virt(addr, width as usize, value, idx)?;
        self.state.ssp = addr;
        Ok(())
    }

    /// `sspopchk`: compare the top of the shadow stack with `expected`.
    pub fn sspopchk(&mut self, expected: WordType) -> Result<(), Exception> {
        let width = self.xlen() as WordType / 8;
        self.ss_check_aligned(width)?;
        let idx = self.ss_mmu_idx();
        let top = self.load_virt(self.state.ssp, width as usize, AccessType::Load, idx)?;
        if top != expected {
            log::debug!("Shadow stack mismatch: {top:#x} != {expected:#x}");
            return Err(self.sw_check(sw_check_code::BCFI));
        }
        self.state.ssp = self.state.ssp.wrapping_add(width);
        Ok(())
    }

    /// Gate of `ssamoswap.{w,d}`.
    pub fn ssamoswap_check(&self) -> Result<(), Exception> {
        let st = &self.state;
        if st.priv_level != PrivilegeLevel::M && st.menvcfg & envcfg::SSE == 0 {
            return Err(Exception::IllegalInstruction);
        }
        if !self.has(Extensions::S) {
            return Err(Exception::IllegalInstruction);
        }
        match (st.virt, st.priv_level) {
            (false, PrivilegeLevel::U) if st.senvcfg & envcfg::SSE == 0 => {
                Err(Exception::IllegalInstruction)
            }
            (true, PrivilegeLevel::S) if st.henvcfg & envcfg::SSE == 0 => {
                Err(Exception::VirtualInstruction)
            }
            (true, PrivilegeLevel::U) if st.senvcfg & envcfg::SSE == 0 => {
                Err(Exception::VirtualInstruction)
            }
            _ => Ok(()),
        }
    }

    /// `lpad label` at `pc`. A no-op unless a landing pad is expected.
    pub fn lpad(&mut self, pc: WordType, label: WordType) -> Result<(), Exception> {
        if !self.xlpe() || !self.state.elp {
            return Ok(());
        }
        let expected = (self.state.gpr[7] >> LPAD_LABEL_SHIFT) & LPAD_LABEL_MASK;
        if pc % 4 != 0 || (label != 0 && label != expected) {
            return Err(self.sw_check(sw_check_code::FCFI));
        }
        self.state.elp = false;
        Ok(())
    }

    /// An indirect jump landed: a landing pad is now expected.
    pub fn set_elp_after_indirect_jump(&mut self, rs1: u8) {
        // Returns through x1/x5 and software-guarded jumps through x7 are exempt.
        if self.xlpe() && !matches!(rs1, 1 | 5 | 7) {
            self.state.elp = true;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::Extensions,
        isa::riscv::hart_tester::{TEST_RAM_BASE, TestHartBuilder},
    };

    fn cfi_hart() -> Hart {
        TestHartBuilder::new()
            .with(Extensions::ZICFISS | Extensions::ZICFILP)
            .build()
    }

    #[test]
    fn test_sse_chain() {
        let mut hart = cfi_hart();
        assert!(!hart.xsse());
        hart.set_mode(PrivilegeLevel::S, false);
        assert!(!hart.xsse());
        hart.state.menvcfg |= envcfg::SSE;
        assert!(hart.xsse());
        hart.set_mode(PrivilegeLevel::U, false);
        assert!(!hart.xsse());
        hart.state.senvcfg |= envcfg::SSE;
        assert!(hart.xsse());
    }

    #[test]
    fn test_shadow_stack_push_pop() {
        let mut hart = cfi_hart();
        hart.state.ssp = TEST_RAM_BASE + 0x100;
        hart.sspush(0xdead_beef).unwrap();
        assert_eq!(hart.state.ssp, TEST_RAM_BASE + 0xf8);

        assert_eq!(hart.sspopchk(0x1234), Err(Exception::SoftwareCheck));
        assert_eq!(hart.state.sw_check_code, sw_check_code::BCFI);
        assert_eq!(hart.state.ssp, TEST_RAM_BASE + 0xf8);

        hart.sspopchk(0xdead_beef).unwrap();
        assert_eq!(hart.state.ssp, TEST_RAM_BASE + 0x100);
    }

    #[test]
    fn test_misaligned_ssp_faults() {
        let mut hart = cfi_hart();
        hart.state.ssp = TEST_RAM_BASE + 0x104;
        assert_eq!(hart.sspush(1), Err(Exception::StoreFault));
        assert_eq!(hart.sspopchk(1), Err(Exception::StoreFault));
    }

    #[test]
    fn test_landing_pad_label() {
        let mut hart = cfi_hart();
        hart.state.mseccfg |= mseccfg::MLPE;
        hart.state.gpr[7] = 0x5 << 12;

        // Nothing expected, nothing checked.
        hart.lpad(0x1002, 9).unwrap();

        hart.set_elp_after_indirect_jump(10);
        assert!(hart.state.elp);
        assert_eq!(hart.lpad(0x1000, 9), Err(Exception::SoftwareCheck));
        assert_eq!(hart.state.sw_check_code, sw_check_code::FCFI);
        assert_eq!(hart.lpad(0x1002, 5), Err(Exception::SoftwareCheck));
        hart.lpad(0x1000, 5).unwrap();
        assert!(!hart.state.elp);

        hart.set_elp_after_indirect_jump(1);
        hart.set_elp_after_indirect_jump(7);
        assert!(!hart.state.elp);
    }

    #[test]
    fn test_ssamoswap_gate() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::ZICFISS | Extensions::H)
            .build();
        assert_eq!(hart.ssamoswap_check(), Ok(()));
        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.ssamoswap_check(), Err(Exception::IllegalInstruction));
        hart.state.menvcfg |= envcfg::SSE;
        assert_eq!(hart.ssamoswap_check(), Err(Exception::VirtualInstruction));
        hart.state.henvcfg |= envcfg::SSE;
        assert_eq!(hart.ssamoswap_check(), Ok(()));
    }
}
