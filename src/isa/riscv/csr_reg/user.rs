//! Unprivileged CSRs: floating-point control, shadow stack pointer and `seed`.

use super::*;
use crate::{
    config::arch_config::WordType,
    isa::riscv::csr_reg::fields::{mstatus, seed},
    utils::set_field,
};

const FFLAGS_MASK: WordType = 0x1f;
const FRM_SHIFT: u32 = 5;
const FRM_MASK: WordType = 0x7;
/// Rounding modes 5 and 6 are reserved, 7 is only meaningful inside instructions.
const FRM_MAX_LEGAL: WordType = 4;

impl Hart {
    /// The FPU is usable: `misa.F` is set and `FS` is not Off for every
    /// level of the current virtualization stack.
    pub fn fp_enabled(&self) -> bool {
        if !self.misa_has(Extensions::F) || self.state.mstatus & mstatus::FS == 0 {
            return false;
        }
        !self.state.virt || self.state.bank.parked_status & mstatus::FS != 0
    }

    /// Mark the floating-point state Dirty in every active `FS` field.
    pub fn mark_fs_dirty(&mut self) {
        let st = &mut self.state;
        st.mstatus = set_field(st.mstatus, mstatus::FS, mstatus::FS_DIRTY);
        if st.virt {
            st.bank.parked_status = set_field(st.bank.parked_status, mstatus::FS, mstatus::FS_DIRTY);
        }
    }

    fn legal_frm(frm: WordType) -> CsrResult<WordType> {
        if frm > FRM_MAX_LEGAL {
            log::debug!("Rejecting reserved rounding mode {frm}");
            return Err(Exception::IllegalInstruction);
        }
        Ok(frm)
    }
}

pub(super) fn read_fflags(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.fflags)
}

pub(super) fn write_fflags(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    hart.mark_fs_dirty();
    hart.state.fflags = value & FFLAGS_MASK;
    Ok(())
}

pub(super) fn read_frm(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.frm)
}

pub(super) fn write_frm(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let frm = Hart::legal_frm(value & FRM_MASK)?;
    hart.mark_fs_dirty();
    hart.state.frm = frm;
    Ok(())
}

pub(super) fn read_fcsr(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.fflags | (hart.state.frm << FRM_SHIFT))
}

pub(super) fn write_fcsr(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let frm = Hart::legal_frm((value >> FRM_SHIFT) & FRM_MASK)?;
    hart.mark_fs_dirty();
    hart.state.frm = frm;
    hart.state.fflags = value & FFLAGS_MASK;
    Ok(())
}

pub(super) fn read_ssp(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.ssp)
}

/// `ssp` is always word aligned.
pub(super) fn write_ssp(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    hart.state.ssp = value & !0x3;
    Ok(())
}

/// Every access to `seed` consumes entropy, so it must be a real write.
pub(super) fn rmw_seed(
    hart: &mut Hart,
    _csrno: u16,
    _new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    if write_mask == 0 && !hart.debugger {
        return Err(Exception::IllegalInstruction);
    }
    match hart.entropy.next_u16() {
        Some(bits) => Ok(seed::OPST_ES16 | bits as WordType),
        None => {
            log::warn!("Entropy source failed, reporting DEAD");
            Ok(seed::OPST_DEAD)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        device::EntropySource,
        isa::riscv::hart_tester::TestHartBuilder,
    };

    struct DeadSource;

    impl EntropySource for DeadSource {
        fn next_u16(&mut self) -> Option<u16> {
            None
        }
    }

    #[test]
    fn test_fcsr_composition() {
        let mut hart = TestHartBuilder::new().with(Extensions::F).build();
        hart.state.mstatus |= mstatus::FS;

        hart.csr_write(csr_index::fcsr, (3 << 5) | 0x15).unwrap();
        assert_eq!(hart.csr_read(csr_index::fflags).unwrap(), 0x15);
        assert_eq!(hart.csr_read(csr_index::frm).unwrap(), 3);

        hart.csr_write(csr_index::fflags, 0x1).unwrap();
        assert_eq!(hart.csr_read(csr_index::fcsr).unwrap(), (3 << 5) | 0x1);
    }

    #[test]
    fn test_reserved_rounding_mode_is_illegal() {
        let mut hart = TestHartBuilder::new().with(Extensions::F).build();
        hart.state.mstatus |= mstatus::FS;
        hart.csr_write(csr_index::frm, 2).unwrap();

        for rm in 5..=7 {
            assert_eq!(
                hart.csr_write(csr_index::frm, rm),
                Err(Exception::IllegalInstruction)
            );
            assert_eq!(
                hart.csr_write(csr_index::fcsr, rm << 5),
                Err(Exception::IllegalInstruction)
            );
        }
        assert_eq!(hart.csr_read(csr_index::frm).unwrap(), 2);
    }

    #[test]
    fn test_fp_csr_gated_by_fs() {
        let mut hart = TestHartBuilder::new().with(Extensions::F).build();
        hart.state.mstatus &= !mstatus::FS;
        assert_eq!(
            hart.csr_read(csr_index::fflags),
            Err(Exception::IllegalInstruction)
        );
        assert_eq!(hart.csrrw_debug(csr_index::fflags, 0, 0), Ok(0));

        hart.state.mstatus = set_field(hart.state.mstatus, mstatus::FS, 1);
        hart.csr_write(csr_index::fflags, 1).unwrap();
        assert_eq!(hart.state.mstatus & mstatus::FS, mstatus::FS);
    }

    #[test]
    fn test_seed_status() {
        let mut hart = TestHartBuilder::new().with(Extensions::ZKR).build();
        assert_eq!(
            hart.csr_read(csr_index::seed),
            Err(Exception::IllegalInstruction)
        );
        let value = hart.csr_swap(csr_index::seed, 0).unwrap();
        assert_eq!(value & seed::OPST_DEAD, seed::OPST_ES16);

        hart.attach_entropy(Box::new(DeadSource));
        let value = hart.csr_swap(csr_index::seed, 0).unwrap();
        assert_eq!(value, seed::OPST_DEAD);
    }

    #[test]
    fn test_ssp_alignment() {
        let mut hart = TestHartBuilder::new().with(Extensions::ZICFISS).build();
        hart.csr_write(csr_index::ssp, 0x8000_1007).unwrap();
        assert_eq!(hart.csr_read(csr_index::ssp).unwrap(), 0x8000_1004);
    }
}
