use super::*;
use crate::{config::arch_config::WordType, utils::make_mask};

pub(crate) type WriteValidator = fn(WordType, &Hart) -> CsrWriteOp;

/// Condition trait for [`validate_with_cond`] functions.
trait ValidateCond {
    fn check(value: WordType, hart: &Hart) -> bool;
}

struct MachineModeCond {}
impl ValidateCond for MachineModeCond {
    fn check(_value: WordType, hart: &Hart) -> bool {
        hart.state.priv_level == PrivilegeLevel::M
    }
}

/// Make a validator that only write when the condition is satisfied, and do nothing otherwise.
#[inline]
fn validate_with_cond<const L: u32, const R: u32, C: ValidateCond>(
    value: WordType,
    hart: &Hart,
) -> CsrWriteOp {
    let mask = make_mask(L, R);
    if C::check((value & mask) >> L, hart) {
        CsrWriteOp::new(mask)
    } else {
        CsrWriteOp::new(0)
    }
}

#[inline]
pub(super) fn validate_write_any<const L: u32, const R: u32>(
    _value: WordType,
    _hart: &Hart,
) -> CsrWriteOp {
    CsrWriteOp::new(make_mask(L, R))
}

/// Make a validator that only write the bits with masks.
#[inline]
pub(super) fn validate_mask<const L: u32, const R: u32, const MASK: WordType>(
    _value: WordType,
    _hart: &Hart,
) -> CsrWriteOp {
    CsrWriteOp::new(make_mask(L, R) & MASK)
}

#[inline]
pub(super) fn validate_readonly(_value: WordType, _hart: &Hart) -> CsrWriteOp {
    CsrWriteOp::new(0)
}

/// `htinst` is only writable from M-mode.
pub(super) fn validate_machine_only(value: WordType, hart: &Hart) -> CsrWriteOp {
    validate_with_cond::<0, 63, MachineModeCond>(value, hart)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::riscv::hart_tester::TestHartBuilder;

    #[test]
    fn test_basic_validators() {
        let hart = TestHartBuilder::new().build();
        assert_eq!(validate_write_any::<0, 7>(0x1234, &hart), CsrWriteOp::new(0xff));
        assert_eq!(validate_mask::<0, 7, 0x0f>(0, &hart), CsrWriteOp::new(0x0f));
        assert_eq!(validate_readonly(!0, &hart), CsrWriteOp::new(0));
    }

    #[test]
    fn test_machine_only_validator() {
        let mut hart = TestHartBuilder::new().build();
        assert_eq!(validate_machine_only(1, &hart), CsrWriteOp::new_write_all());
        hart.state.priv_level = PrivilegeLevel::S;
        assert_eq!(validate_machine_only(1, &hart), CsrWriteOp::new(0));
    }
}
