use std::fmt::Debug;

use crate::config::arch_config::WordType;

/// Extract the field selected by a contiguous `mask`.
#[inline]
pub const fn get_field(reg: WordType, mask: WordType) -> WordType {
    (reg & mask) >> mask.trailing_zeros()
}

/// Replace the field selected by a contiguous `mask`.
#[inline]
pub const fn set_field(reg: WordType, mask: WordType, val: WordType) -> WordType {
    (reg & !mask) | ((val << mask.trailing_zeros()) & mask)
}

/// Mask with bits `left..=right` set.
#[inline]
pub const fn make_mask(left: u32, right: u32) -> WordType {
    let width = right - left + 1;
    if width >= WordType::BITS {
        !0
    } else {
        ((1 << width) - 1) << left
    }
}

// ========================================
//  gen_name_list ["a1", "a2", "a3", ... ]
// ========================================

/// `gen_name_list!("a"; 0, 2)` expands to `["a0", "a1", "a2"]`, and
/// `gen_name_list!("a"; 0, 1; "h")` to `["a0h", "a1h"]`.
#[macro_export]
macro_rules! gen_name_list {
    ($base:literal; $begin: literal, $end: literal) => {
        $crate::gen_name_list!($base; $begin, $end; "")
    };
    ($base:literal; $begin: literal, $end: literal; $suffix:literal) => {
        seq_macro::seq!(N in $begin..= $end {
            [ #(concat!($base, stringify!(N), $suffix),) *]
        })
    };
}

pub trait UnsignedInteger: Copy + Sized + Default + Debug + Eq + Into<u64> {
    const BITS: usize;

    fn truncate_from(value: u64) -> Self;
}

macro_rules! impl_unsigned_integer {
    ($($t:ty),*) => {
        $(
            impl UnsignedInteger for $t {
                const BITS: usize = <$t>::BITS as usize;

                #[inline]
                fn truncate_from(value: u64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_unsigned_integer!(u8, u16, u32, u64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_field_helpers() {
        const MPP: WordType = 0x1800;
        assert_eq!(get_field(0x1888, MPP), 3);
        assert_eq!(set_field(0x1888, MPP, 1), 0x0888);
        assert_eq!(set_field(0, MPP, 7), MPP);
    }

    #[test]
    fn test_make_mask() {
        assert_eq!(make_mask(0, 63), !0);
        assert_eq!(make_mask(0, 31), 0xffff_ffff);
        assert_eq!(make_mask(4, 7), 0xf0);
        assert_eq!(make_mask(63, 63), 1 << 63);
    }

    #[test]
    fn test_name_list() {
        assert_eq!(gen_name_list!("pmpcfg"; 0, 2), ["pmpcfg0", "pmpcfg1", "pmpcfg2"]);
        assert_eq!(gen_name_list!("hpmcounter"; 3, 4; "h"), ["hpmcounter3h", "hpmcounter4h"]);
    }
}
