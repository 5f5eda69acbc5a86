//! Access predicates.
//!
//! A predicate decides whether a CSR exists for the current configuration and
//! mode before the generic privilege check runs. Returning
//! [`Exception::VirtualInstruction`] reports an access that the hypervisor is
//! expected to emulate.

use super::{CsrResult, PrivilegeLevel, csr_index, fields::mstatus, fields::mseccfg};
use crate::{
    config::{Extensions, arch_config::WordType},
    isa::riscv::{
        csr_reg::fields::{envcfg, hstatus},
        hart::Hart,
        trap::Exception,
    },
};

pub type PredicateFn = fn(&Hart, u16) -> CsrResult<()>;

const ILLEGAL: CsrResult<()> = Err(Exception::IllegalInstruction);
const VIRTUAL: CsrResult<()> = Err(Exception::VirtualInstruction);

#[inline]
fn require(cond: bool) -> CsrResult<()> {
    if cond { Ok(()) } else { ILLEGAL }
}

pub(super) fn any(_hart: &Hart, _csrno: u16) -> CsrResult<()> {
    Ok(())
}

pub(super) fn any32(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.cfg.is_rv32())
}

pub(super) fn umode(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.misa_has(Extensions::U))
}

pub(super) fn umode32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    any32(hart, csrno)?;
    umode(hart, csrno)
}

pub(super) fn smode(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.misa_has(Extensions::S))
}

fn smode32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    any32(hart, csrno)?;
    smode(hart, csrno)
}

pub(super) fn hmode(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.misa_has(Extensions::H))
}

pub(super) fn hmode32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    any32(hart, csrno)?;
    hmode(hart, csrno)
}

pub(super) fn aia_any(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SMAIA))
}

pub(super) fn aia_any32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    aia_any(hart, csrno)?;
    any32(hart, csrno)
}

pub(super) fn aia_smode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SSAIA))?;
    smode(hart, csrno)
}

pub(super) fn aia_smode32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SSAIA))?;
    smode32(hart, csrno)
}

pub(super) fn aia_hmode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SSAIA))?;
    hmode(hart, csrno)
}

pub(super) fn aia_hmode32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SSAIA))?;
    hmode32(hart, csrno)
}

pub(super) fn sxcsrind_or_aia_any(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.cfg.ext.intersects(Extensions::SMAIA | Extensions::SMCSRIND))
}

pub(super) fn sxcsrind_any(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SMCSRIND))
}

pub(super) fn sxcsrind_or_aia_smode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.cfg.ext.intersects(Extensions::SSAIA | Extensions::SSCSRIND))?;
    smode(hart, csrno)
}

pub(super) fn sxcsrind_smode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SSCSRIND))?;
    smode(hart, csrno)
}

pub(super) fn sxcsrind_or_aia_hmode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.cfg.ext.intersects(Extensions::SSAIA | Extensions::SSCSRIND))?;
    hmode(hart, csrno)
}

pub(super) fn sxcsrind_hmode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SSCSRIND))?;
    hmode(hart, csrno)
}

/// Floating-point CSRs need an enabled FPU unless a debugger is looking.
pub(super) fn fs(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    if !hart.debugger && !hart.fp_enabled() {
        return ILLEGAL;
    }
    Ok(())
}

pub(super) fn satp(hart: &Hart, csrno: u16) -> CsrResult<()> {
    let st = &hart.state;
    if st.priv_level == PrivilegeLevel::S {
        if !st.virt && st.mstatus & mstatus::TVM != 0 {
            return ILLEGAL;
        }
        if st.virt && st.hstatus & hstatus::VTVM != 0 {
            return VIRTUAL;
        }
    }
    smode(hart, csrno)
}

pub(super) fn hgatp(hart: &Hart, csrno: u16) -> CsrResult<()> {
    let st = &hart.state;
    if st.priv_level == PrivilegeLevel::S && !st.virt && st.mstatus & mstatus::TVM != 0 {
        return ILLEGAL;
    }
    hmode(hart, csrno)
}

pub(super) fn ctr_mmode(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SMCTR))
}

pub(super) fn ctr_smode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    let st = &hart.state;
    let ssctr = hart.has(Extensions::SSCTR);
    if (st.priv_level == PrivilegeLevel::M && hart.has(Extensions::SMCTR))
        || (st.priv_level == PrivilegeLevel::S && !st.virt && ssctr)
    {
        return Ok(());
    }
    if st.priv_level == PrivilegeLevel::S && st.virt && ssctr {
        // sctrstatus is the one CTR register VS-mode reaches directly.
        return if csrno == csr_index::sctrstatus {
            Ok(())
        } else {
            VIRTUAL
        };
    }
    ILLEGAL
}

pub(super) fn ctr_vsmode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    if hart.state.priv_level == PrivilegeLevel::S && hart.state.virt && hart.has(Extensions::SSCTR) {
        return Ok(());
    }
    ctr_smode(hart, csrno)
}

pub(super) fn dbltrp_hmode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    if hart.has(Extensions::SSDBLTRP) {
        return Ok(());
    }
    hmode(hart, csrno)
}

pub(super) fn pmp(hart: &Hart, csrno: u16) -> CsrResult<()> {
    if hart.cfg.pmp_regions == 0 {
        return ILLEGAL;
    }
    if (csr_index::pmpcfg0..=csr_index::pmpcfg15).contains(&csrno)
        && !hart.cfg.is_rv32()
        && csrno % 2 != 0
    {
        // RV64 packs eight entries per pmpcfg, the odd numbers do not exist.
        return ILLEGAL;
    }
    Ok(())
}

pub(super) fn have_mseccfg(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(
        hart.cfg
            .ext
            .intersects(Extensions::SMEPMP | Extensions::ZKR | Extensions::SMMPM),
    )
}

pub(super) fn have_mseccfg32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    have_mseccfg(hart, csrno)?;
    any32(hart, csrno)
}

pub(super) fn smsdid(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.has(Extensions::SMSDID))
}

pub(super) fn clic(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    require(hart.cfg.is_clic())
}

pub(super) fn clic_smode(hart: &Hart, csrno: u16) -> CsrResult<()> {
    clic(hart, csrno)?;
    smode(hart, csrno)
}

/// User counter shadows, gated by each level's `xcounteren`.
pub(super) fn ctr(hart: &Hart, csrno: u16) -> CsrResult<()> {
    let idx = csrno & 0x1f;
    let present = if idx < 3 {
        hart.has(Extensions::ZICNTR)
    } else {
        hart.cfg.pmu_avail() & 1 << idx != 0
    };
    if !present {
        return ILLEGAL;
    }
    if hart.debugger {
        return Ok(());
    }
    let st = &hart.state;
    let bit: WordType = 1 << idx;
    if st.priv_level < PrivilegeLevel::M && st.mcounteren & bit == 0 {
        return ILLEGAL;
    }
    let user = st.priv_level == PrivilegeLevel::U;
    if st.virt && (st.hcounteren & bit == 0 || (user && st.scounteren & bit == 0)) {
        return VIRTUAL;
    }
    if user && hart.misa_has(Extensions::S) && st.scounteren & bit == 0 {
        return ILLEGAL;
    }
    Ok(())
}

pub(super) fn ctr32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    any32(hart, csrno)?;
    ctr(hart, csrno)
}

/// Machine counters above `minstret` exist only where configured.
pub(super) fn mctr(hart: &Hart, csrno: u16) -> CsrResult<()> {
    require(hart.cfg.pmu_avail() & 1 << (csrno & 0x1f) != 0)
}

pub(super) fn mctr32(hart: &Hart, csrno: u16) -> CsrResult<()> {
    any32(hart, csrno)?;
    mctr(hart, csrno)
}

pub(super) fn seed(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    if !hart.has(Extensions::ZKR) {
        return ILLEGAL;
    }
    if hart.debugger {
        return Ok(());
    }
    let st = &hart.state;
    let sseed = st.mseccfg & mseccfg::SSEED != 0;
    let useed = st.mseccfg & mseccfg::USEED != 0;
    match st.priv_level {
        PrivilegeLevel::M => Ok(()),
        _ if st.virt => {
            if sseed {
                VIRTUAL
            } else {
                ILLEGAL
            }
        }
        PrivilegeLevel::S if sseed => Ok(()),
        PrivilegeLevel::U if useed => Ok(()),
        _ => ILLEGAL,
    }
}

/// `ssp` follows the shadow stack enable chain of the current mode.
pub(super) fn zicfiss_ssp(hart: &Hart, _csrno: u16) -> CsrResult<()> {
    if !hart.has(Extensions::ZICFISS) {
        return ILLEGAL;
    }
    let st = &hart.state;
    if st.priv_level == PrivilegeLevel::M {
        return Ok(());
    }
    if st.menvcfg & envcfg::SSE == 0 {
        return ILLEGAL;
    }
    let henv_sse = st.henvcfg & envcfg::SSE != 0;
    let senv_sse = st.senvcfg & envcfg::SSE != 0;
    if st.virt {
        let enabled = match st.priv_level {
            PrivilegeLevel::S => henv_sse,
            _ => henv_sse && senv_sse,
        };
        return if enabled { Ok(()) } else { VIRTUAL };
    }
    if st.priv_level == PrivilegeLevel::U && !senv_sse {
        return ILLEGAL;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::riscv::hart_tester::TestHartBuilder;

    #[test]
    fn test_satp_trapped_by_tvm() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.state.priv_level = PrivilegeLevel::S;
        assert_eq!(satp(&hart, csr_index::satp), Ok(()));

        hart.state.mstatus |= mstatus::TVM;
        assert_eq!(satp(&hart, csr_index::satp), ILLEGAL);
        assert_eq!(hgatp(&hart, csr_index::hgatp), ILLEGAL);

        hart.state.virt = true;
        assert_eq!(satp(&hart, csr_index::satp), Ok(()));
        hart.state.hstatus |= hstatus::VTVM;
        assert_eq!(satp(&hart, csr_index::satp), VIRTUAL);
    }

    #[test]
    fn test_ctr_predicates() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H | Extensions::SSCTR | Extensions::SMCTR)
            .build();
        assert_eq!(ctr_mmode(&hart, csr_index::mctrctl), Ok(()));
        assert_eq!(ctr_smode(&hart, csr_index::sctrctl), Ok(()));

        hart.state.priv_level = PrivilegeLevel::S;
        hart.state.virt = true;
        assert_eq!(ctr_smode(&hart, csr_index::sctrctl), VIRTUAL);
        assert_eq!(ctr_smode(&hart, csr_index::sctrstatus), Ok(()));
        assert_eq!(ctr_vsmode(&hart, csr_index::vsctrctl), Ok(()));

        hart.state.priv_level = PrivilegeLevel::U;
        hart.state.virt = false;
        assert_eq!(ctr_smode(&hart, csr_index::sctrctl), ILLEGAL);
    }

    #[test]
    fn test_seed_access() {
        let mut hart = TestHartBuilder::new().with(Extensions::ZKR).build();
        assert_eq!(seed(&hart, csr_index::seed), Ok(()));

        hart.state.priv_level = PrivilegeLevel::S;
        assert_eq!(seed(&hart, csr_index::seed), ILLEGAL);
        hart.state.mseccfg |= mseccfg::SSEED;
        assert_eq!(seed(&hart, csr_index::seed), Ok(()));

        hart.state.priv_level = PrivilegeLevel::U;
        assert_eq!(seed(&hart, csr_index::seed), ILLEGAL);
        hart.state.mseccfg |= mseccfg::USEED;
        assert_eq!(seed(&hart, csr_index::seed), Ok(()));
    }

    #[test]
    fn test_ssp_enable_chain() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H | Extensions::ZICFISS)
            .build();
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), Ok(()));

        hart.state.priv_level = PrivilegeLevel::S;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), ILLEGAL);
        hart.state.menvcfg |= envcfg::SSE;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), Ok(()));

        hart.state.virt = true;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), VIRTUAL);
        hart.state.henvcfg |= envcfg::SSE;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), Ok(()));

        hart.state.priv_level = PrivilegeLevel::U;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), VIRTUAL);
        hart.state.virt = false;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), ILLEGAL);
        hart.state.senvcfg |= envcfg::SSE;
        assert_eq!(zicfiss_ssp(&hart, csr_index::ssp), Ok(()));
    }

    #[test]
    fn test_pmp_odd_cfg_on_rv64() {
        let hart = TestHartBuilder::new().build();
        assert_eq!(pmp(&hart, csr_index::pmpcfg0), ILLEGAL);

        let hart = TestHartBuilder::new().pmp_regions(16).build();
        assert_eq!(pmp(&hart, csr_index::pmpcfg0), Ok(()));
        assert_eq!(pmp(&hart, csr_index::pmpcfg0 + 1), ILLEGAL);
        assert_eq!(pmp(&hart, csr_index::pmpaddr0 + 1), Ok(()));

        let hart = TestHartBuilder::rv32().pmp_regions(16).build();
        assert_eq!(pmp(&hart, csr_index::pmpcfg0 + 1), Ok(()));
    }

    #[test]
    fn test_counter_gating() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H | Extensions::ZICNTR | Extensions::ZIHPM)
            .pmu_mask(1 << 3)
            .build();
        assert_eq!(ctr(&hart, csr_index::cycle), Ok(()));
        assert_eq!(ctr(&hart, csr_index::hpmcounter3), Ok(()));
        assert_eq!(ctr(&hart, csr_index::hpmcounter3 + 1), ILLEGAL);
        assert_eq!(mctr(&hart, csr_index::mhpmcounter3), Ok(()));
        assert_eq!(mctr(&hart, csr_index::mhpmcounter3 + 1), ILLEGAL);
        assert_eq!(ctr32(&hart, csr_index::cycleh), ILLEGAL);

        hart.state.priv_level = PrivilegeLevel::S;
        assert_eq!(ctr(&hart, csr_index::cycle), ILLEGAL);
        hart.state.mcounteren = 0b111;
        assert_eq!(ctr(&hart, csr_index::cycle), Ok(()));

        hart.state.priv_level = PrivilegeLevel::U;
        assert_eq!(ctr(&hart, csr_index::instret), ILLEGAL);
        hart.state.scounteren = 0b100;
        assert_eq!(ctr(&hart, csr_index::instret), Ok(()));

        hart.state.virt = true;
        assert_eq!(ctr(&hart, csr_index::instret), VIRTUAL);
        hart.state.hcounteren = 0b100;
        assert_eq!(ctr(&hart, csr_index::instret), Ok(()));
        hart.state.priv_level = PrivilegeLevel::S;
        assert_eq!(ctr(&hart, csr_index::time), VIRTUAL);
    }

    #[test]
    fn test_counters_need_zicntr() {
        let hart = TestHartBuilder::rv32().build();
        assert_eq!(ctr(&hart, csr_index::cycle), ILLEGAL);
        assert_eq!(ctr32(&hart, csr_index::cycleh), ILLEGAL);
        assert_eq!(mctr(&hart, csr_index::mhpmcounter3), ILLEGAL);

        let hart = TestHartBuilder::rv32().with(Extensions::ZICNTR).build();
        assert_eq!(ctr32(&hart, csr_index::cycleh), Ok(()));
    }
}
