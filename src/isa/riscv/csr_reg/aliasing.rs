//! Ownership of the supervisor-visible interrupt bits.
//!
//! Every bit of `sip`/`sie`/`mvip`/`hvip`/`vsip`/`vsie` is, depending on the
//! delegation and virtual-enable registers, either an alias of the bit in
//! `mip`/`mie`, an independent shadow bit (`mvip`, `hvip`, `sie_shadow`,
//! `vsie_shadow`) or read-only zero. [`InterruptView::owners`] computes that
//! split once, so each CSR accessor only routes bits.

use crate::{
    config::arch_config::WordType,
    isa::riscv::{csr_reg::fields::mip, state::HartState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOwners {
    /// Bits backed by `mip`/`mie`.
    pub alias: WordType,
    /// Bits backed by the view's shadow register.
    pub shadow: WordType,
}

impl LineOwners {
    #[inline]
    pub fn visible(&self) -> WordType {
        self.alias | self.shadow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptView {
    /// `mvip`, as accessed from M-mode.
    Mvip,
    /// `sip`, as accessed from HS-mode.
    Sip,
    /// `sie`, as accessed from HS-mode.
    Sie,
    /// `hvip`.
    Hvip,
    /// `vsip`, in `mip` bit positions.
    Vsip,
    /// `vsie`, in `mie` bit positions.
    Vsie,
}

const S_AND_LOCAL: WordType = mip::S_MODE_INTERRUPTS | mip::LOCAL_INTERRUPTS;

impl InterruptView {
    pub fn owners(self, st: &HartState) -> LineOwners {
        match self {
            InterruptView::Mvip => LineOwners {
                alias: (S_AND_LOCAL & (st.mideleg | !st.mvien)) | mip::STIP,
                shadow: S_AND_LOCAL & !st.mideleg & st.mvien,
            },
            InterruptView::Sip => {
                // Neither delegated nor virtually enabled: read-only zero.
                let owners = InterruptView::Mvip.owners(st);
                let visible = st.mideleg | st.mvien;
                LineOwners {
                    alias: owners.alias & visible,
                    shadow: owners.shadow & visible,
                }
            }
            InterruptView::Sie => LineOwners {
                alias: S_AND_LOCAL & st.mideleg,
                shadow: S_AND_LOCAL & !st.mideleg & st.mvien,
            },
            InterruptView::Hvip => LineOwners {
                alias: (mip::LOCAL_INTERRUPTS & (st.hideleg | !st.hvien)) | mip::VS_MODE_INTERRUPTS,
                shadow: mip::LOCAL_INTERRUPTS & !st.hideleg & st.hvien,
            },
            InterruptView::Vsip => {
                let owners = InterruptView::Hvip.owners(st);
                let visible = st.hideleg | st.hvien;
                LineOwners {
                    alias: owners.alias & (st.hideleg | !mip::VS_MODE_INTERRUPTS) & visible,
                    shadow: owners.shadow & visible,
                }
            }
            InterruptView::Vsie => LineOwners {
                alias: (mip::LOCAL_INTERRUPTS | mip::VS_MODE_INTERRUPTS) & st.hideleg,
                shadow: mip::LOCAL_INTERRUPTS & !st.hideleg & st.hvien,
            },
        }
    }
}

/// Move the VS-level bits (2, 6, 10) onto their S-level positions (1, 5, 9).
#[inline]
pub fn vs_to_s(bits: WordType) -> WordType {
    let vs = bits & mip::VS_MODE_INTERRUPTS;
    (bits & !mip::VS_MODE_INTERRUPTS) | (vs >> 1)
}

/// Inverse of [`vs_to_s`].
#[inline]
pub fn s_to_vs(bits: WordType) -> WordType {
    let s = bits & (mip::VS_MODE_INTERRUPTS >> 1);
    (bits & !(mip::VS_MODE_INTERRUPTS >> 1)) | (s << 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vs_shift() {
        assert_eq!(vs_to_s(mip::VSSIP | mip::VSTIP | mip::VSEIP), mip::S_MODE_INTERRUPTS);
        assert_eq!(s_to_vs(mip::SSIP | mip::SEIP), mip::VSSIP | mip::VSEIP);
        assert_eq!(s_to_vs(vs_to_s(mip::VSTIP | (1 << 13))), mip::VSTIP | (1 << 13));
    }

    #[test]
    fn test_sip_ownership_follows_delegation() {
        let mut st = HartState::new(0);
        let irq13 = 1 << 13;

        // Nothing delegated or virtual: read-only zero.
        assert_eq!(InterruptView::Sip.owners(&st).visible() & irq13, 0);

        st.mvien = irq13;
        let owners = InterruptView::Sip.owners(&st);
        assert_eq!(owners.shadow & irq13, irq13);
        assert_eq!(owners.alias & irq13, 0);

        st.mideleg = irq13;
        let owners = InterruptView::Sip.owners(&st);
        assert_eq!(owners.alias & irq13, irq13);
        assert_eq!(owners.shadow & irq13, 0);
    }

    #[test]
    fn test_vsip_hides_undelegated_vs_bits() {
        let mut st = HartState::new(0);
        assert_eq!(InterruptView::Vsip.owners(&st).visible() & mip::VSSIP, 0);
        assert_eq!(InterruptView::Hvip.owners(&st).alias & mip::VSSIP, mip::VSSIP);

        st.hideleg = mip::VSSIP;
        assert_eq!(InterruptView::Vsip.owners(&st).alias & mip::VS_MODE_INTERRUPTS, mip::VSSIP);
    }
}
