//! Interrupt resolution.
//!
//! Given the register file, pick the single interrupt the hart should take
//! next. Legacy harts use lowest-number-wins, AIA harts consult the
//! `*iprio` arrays, and CLIC harts take whatever the controller offers.

use crate::{
    config::{Extensions, InterruptModel, arch_config::WordType},
    isa::riscv::{
        csr_reg::{
            ClicOffer, PrivilegeLevel,
            fields::{hstatus, mip, mstatus},
            vs_to_s,
        },
        hart::Hart,
        state::LineState,
        trap::{Interrupt, irq},
    },
    utils::get_field,
};

pub const IPRIO_IRQ_BITS: u32 = 8;
pub const IPRIO_MMAXIPRIO: u8 = 255;

pub const IPRIO_DEFAULT_UPPER: u8 = 4;
pub const IPRIO_DEFAULT_M: u8 = IPRIO_DEFAULT_UPPER + 12;
pub const IPRIO_DEFAULT_S: u8 = IPRIO_DEFAULT_M + 3;
pub const IPRIO_DEFAULT_SGEXT: u8 = IPRIO_DEFAULT_S + 3;
pub const IPRIO_DEFAULT_VS: u8 = IPRIO_DEFAULT_SGEXT + 1;
pub const IPRIO_DEFAULT_LOWER: u8 = IPRIO_DEFAULT_VS + 3;

/// Default priority order, highest first. Interrupts not listed here, and the
/// custom ranges 24..=31 and 48..=63, share the lowest priority.
#[rustfmt::skip]
const DEFAULT_ORDER: &[(u32, u8)] = &[
    (47, IPRIO_DEFAULT_UPPER),      (23, IPRIO_DEFAULT_UPPER + 1),
    (46, IPRIO_DEFAULT_UPPER + 2),  (45, IPRIO_DEFAULT_UPPER + 3),
    (22, IPRIO_DEFAULT_UPPER + 4),  (44, IPRIO_DEFAULT_UPPER + 5),
    (43, IPRIO_DEFAULT_UPPER + 6),  (21, IPRIO_DEFAULT_UPPER + 7),
    (42, IPRIO_DEFAULT_UPPER + 8),  (41, IPRIO_DEFAULT_UPPER + 9),
    (20, IPRIO_DEFAULT_UPPER + 10), (40, IPRIO_DEFAULT_UPPER + 11),

    (irq::M_EXT, IPRIO_DEFAULT_M),
    (irq::M_SOFT, IPRIO_DEFAULT_M + 1),
    (irq::M_TIMER, IPRIO_DEFAULT_M + 2),

    (irq::S_EXT, IPRIO_DEFAULT_S),
    (irq::S_SOFT, IPRIO_DEFAULT_S + 1),
    (irq::S_TIMER, IPRIO_DEFAULT_S + 2),

    (irq::S_GEXT, IPRIO_DEFAULT_SGEXT),

    (irq::VS_EXT, IPRIO_DEFAULT_VS),
    (irq::VS_SOFT, IPRIO_DEFAULT_VS + 1),
    (irq::VS_TIMER, IPRIO_DEFAULT_VS + 2),

    (39, IPRIO_DEFAULT_LOWER),      (19, IPRIO_DEFAULT_LOWER + 1),
    (38, IPRIO_DEFAULT_LOWER + 2),  (37, IPRIO_DEFAULT_LOWER + 3),
    (18, IPRIO_DEFAULT_LOWER + 4),  (36, IPRIO_DEFAULT_LOWER + 5),
    (35, IPRIO_DEFAULT_LOWER + 6),  (17, IPRIO_DEFAULT_LOWER + 7),
    (34, IPRIO_DEFAULT_LOWER + 8),  (33, IPRIO_DEFAULT_LOWER + 9),
    (16, IPRIO_DEFAULT_LOWER + 10), (32, IPRIO_DEFAULT_LOWER + 11),
];

const fn build_default_table() -> [u8; 64] {
    let mut table = [IPRIO_MMAXIPRIO; 64];
    let mut i = 0;
    while i < DEFAULT_ORDER.len() {
        let (irq, prio) = DEFAULT_ORDER[i];
        table[irq as usize] = prio;
        i += 1;
    }
    table
}

static DEFAULT_IPRIO: [u8; 64] = build_default_table();

/// Default priority number of a major interrupt. Smaller is more urgent.
pub fn default_iprio(irq: u32) -> u8 {
    DEFAULT_IPRIO
        .get(irq as usize)
        .copied()
        .unwrap_or(IPRIO_MMAXIPRIO)
}

/// Privilege level a resolved interrupt is taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqLevel {
    M,
    Hs,
    Vs,
}

/// An interrupt chosen by [`Hart::resolve_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingIrq {
    /// Major interrupt number, in `mip` bit positions.
    pub irq: u32,
    pub level: IrqLevel,
}

/// The interrupt-enable state of each level, from the current mode's point of view.
#[derive(Debug, Clone, Copy)]
struct LevelEnables {
    m: bool,
    hs: bool,
    vs: bool,
}

/// Pick one interrupt out of `pending`.
///
/// Without AIA for the level the lowest set bit wins. With AIA each bit is
/// ranked by its `iprio` byte. A zero byte ranks the level's external
/// interrupt at `ext_def_prio` and every other interrupt just above or below
/// it according to the default order. Equal priorities go to the lower number.
fn pending_to_irq(aia: bool, extirq: u32, ext_def_prio: u8, pending: WordType, iprio: &[u8; 64]) -> Option<u32> {
    if pending == 0 {
        return None;
    }
    let first = pending.trailing_zeros();
    if !aia {
        return Some(first);
    }

    let mut best: Option<(u32, u8)> = None;
    for irq in first..64 {
        if pending & (1 << irq) == 0 {
            continue;
        }
        let prio = match iprio[irq as usize] {
            0 if irq == extirq => ext_def_prio,
            0 if default_iprio(irq) < ext_def_prio => 1,
            0 => IPRIO_MMAXIPRIO,
            p => p,
        };
        if best.is_none_or(|(_, best_prio)| prio < best_prio) {
            best = Some((irq, prio));
        }
    }
    best.map(|(irq, _)| irq)
}

impl Hart {
    fn aia_for(&self, extirq: u32) -> bool {
        if extirq == irq::M_EXT {
            self.has(Extensions::SMAIA)
        } else {
            self.has(Extensions::SSAIA)
        }
    }

    /// `mip` bits gated by `mie`, with the selected guest external line and
    /// the VS timer folded into `VSEIP`/`VSTIP`.
    pub(crate) fn all_pending(&self) -> WordType {
        let LineState { mip, hgeip, vstime_irq, .. } = self.lines.snapshot();
        let gein = get_field(self.state.hstatus, hstatus::VGEIN);
        let vsgein = if gein != 0 && hgeip & (1 << gein) != 0 {
            mip::VSEIP
        } else {
            0
        };
        let vstip = if vstime_irq { mip::VSTIP } else { 0 };
        (mip | vsgein | vstip) & self.state.mie
    }

    /// Interrupts injected into HS-mode through `mvip`/`mvien`.
    fn s_injected(&self) -> WordType {
        let st = &self.state;
        st.mvip & st.mvien & !st.mideleg & st.sie_shadow
    }

    /// Interrupts injected into VS-mode through `hvip`/`hvien`.
    fn vs_injected(&self) -> WordType {
        let st = &self.state;
        st.hvip & st.hvien & !st.hideleg & st.vsie_shadow
    }

    /// VS-level candidates, with VSSI/VSTI/VSEI moved onto their S numbers.
    fn vs_candidates(&self, pending: WordType) -> WordType {
        let delegated = pending & self.state.mideleg & self.state.hideleg;
        vs_to_s(delegated) | self.vs_injected()
    }

    pub fn mirq_pending(&self) -> Option<u32> {
        let irqs = self.all_pending() & !self.state.mideleg & !(mip::SGEIP | mip::VS_MODE_INTERRUPTS);
        pending_to_irq(self.aia_for(irq::M_EXT), irq::M_EXT, IPRIO_DEFAULT_M, irqs, &self.state.miprio)
    }

    pub fn sirq_pending(&self) -> Option<u32> {
        let irqs = self.all_pending() & self.state.mideleg & !mip::VS_MODE_INTERRUPTS;
        pending_to_irq(
            self.aia_for(irq::S_EXT),
            irq::S_EXT,
            IPRIO_DEFAULT_S,
            irqs | self.s_injected(),
            &self.state.siprio,
        )
    }

    /// Highest VS-level interrupt, numbered as the guest sees it.
    pub fn vsirq_pending(&self) -> Option<u32> {
        let irqs = self.vs_candidates(self.all_pending());
        pending_to_irq(self.aia_for(irq::S_EXT), irq::S_EXT, IPRIO_DEFAULT_S, irqs, &self.state.hviprio)
    }

    fn level_enables(&self) -> LevelEnables {
        let st = &self.state;
        let level_on = |level: PrivilegeLevel, ie: WordType| {
            st.priv_level < level || (st.priv_level == level && st.mstatus & ie != 0)
        };
        if st.virt {
            LevelEnables {
                m: true,
                hs: true,
                vs: level_on(PrivilegeLevel::S, mstatus::SIE),
            }
        } else {
            LevelEnables {
                m: level_on(PrivilegeLevel::M, mstatus::MIE),
                hs: level_on(PrivilegeLevel::S, mstatus::SIE),
                vs: false,
            }
        }
    }

    /// The interrupt the hart takes next through `mip`/`mie`, if any.
    pub fn resolve_pending(&self) -> Option<PendingIrq> {
        let st = &self.state;
        let enables = self.level_enables();
        let pending = self.all_pending();

        let m_irqs = pending & !st.mideleg;
        if enables.m && m_irqs != 0 {
            let irq = pending_to_irq(self.aia_for(irq::M_EXT), irq::M_EXT, IPRIO_DEFAULT_M, m_irqs, &st.miprio)?;
            return Some(PendingIrq { irq, level: IrqLevel::M });
        }

        let hs_irqs = (pending & st.mideleg & !st.hideleg) | self.s_injected();
        if enables.hs && hs_irqs != 0 {
            let irq = pending_to_irq(self.aia_for(irq::S_EXT), irq::S_EXT, IPRIO_DEFAULT_S, hs_irqs, &st.siprio)?;
            return Some(PendingIrq { irq, level: IrqLevel::Hs });
        }

        let vs_irqs = self.vs_candidates(pending);
        if enables.vs && vs_irqs != 0 {
            let virq = pending_to_irq(self.aia_for(irq::S_EXT), irq::S_EXT, IPRIO_DEFAULT_S, vs_irqs, &st.hviprio)?;
            // Back to mip numbering: the S-level numbers stand for VS interrupts here.
            let irq = if virq > irq::S_GEXT { virq } else { virq + 1 };
            return Some(PendingIrq { irq, level: IrqLevel::Vs });
        }
        None
    }

    /// A CLIC interrupt targeting `mode` can be taken in the current mode.
    pub fn irq_mode_enabled(&self, mode: u8) -> bool {
        let st = &self.state;
        let level_on = |level: PrivilegeLevel, ie: WordType| {
            st.priv_level < level || (st.priv_level == level && st.mstatus & ie != 0)
        };
        match PrivilegeLevel::try_from(mode) {
            Ok(PrivilegeLevel::M) => level_on(PrivilegeLevel::M, mstatus::MIE),
            Ok(PrivilegeLevel::S) => level_on(PrivilegeLevel::S, mstatus::SIE),
            _ => false,
        }
    }

    /// The interrupt to deliver now, from whichever model the hart runs.
    pub fn pending_interrupt(&self) -> Option<Interrupt> {
        if let Some(pending) = self.resolve_pending() {
            if !self.clic_mode() || self.cfg.clint_clic() {
                return Some(Interrupt::Local(pending.irq));
            }
        }
        if let InterruptModel::Clic { .. } = self.cfg.interrupt_model {
            let offer = ClicOffer::decode(self.state.clic_exccode?);
            if self.irq_mode_enabled(offer.mode) {
                return Some(Interrupt::Clic {
                    irq: offer.irq,
                    mode: offer.mode,
                    level: offer.level,
                });
            }
        }
        None
    }
}
