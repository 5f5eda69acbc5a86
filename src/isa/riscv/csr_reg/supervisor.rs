//! Supervisor-level CSRs.
//!
//! While V=1 these names reach the VS copies: either directly, because the
//! hypervisor bank swapped them in, or by forwarding to the `vs*` accessors.

use super::{
    aliasing::InterruptView,
    hypervisor::read_vstopi,
    machine::{legalize_tvec, rmw_high, write_mstatus},
    *,
};
use crate::isa::riscv::{
    csr_reg::fields::{ctr, envcfg, hvictl, mintstatus, mip, mstatus, satp, topi, xcause},
    interrupt::{IPRIO_DEFAULT_S, IPRIO_MMAXIPRIO, default_iprio},
};
use crate::utils::{get_field, set_field};

impl Hart {
    /// `mstatus` fields visible through `sstatus` on this hart.
    fn sstatus_mask(&self) -> WordType {
        let mut mask = mstatus::SSTATUS_MASK;
        if !self.cfg.is_rv32() {
            mask |= mstatus::UXL;
        }
        if self.has(Extensions::ZICFILP) {
            mask |= mstatus::SPELP;
        }
        mask
    }

    fn rmw_sie64(&mut self, new_value: u64, write_mask: u64) -> CsrResult<u64> {
        if self.state.virt {
            if self.state.hvictl & hvictl::VTI != 0 {
                return Err(Exception::VirtualInstruction);
            }
            return Ok(self.rmw_vsie64(new_value, write_mask));
        }
        let owners = InterruptView::Sie.owners(&self.state);
        let old_mie = self.rmw_mie64(new_value, write_mask & owners.alias);

        let wr_shadow = write_mask & owners.shadow;
        let old_shadow = self.state.sie_shadow;
        self.state.sie_shadow = (old_shadow & !wr_shadow) | (new_value & wr_shadow);

        Ok((old_mie & owners.alias) | (old_shadow & owners.shadow))
    }

    fn rmw_sip64(&mut self, new_value: u64, write_mask: u64) -> CsrResult<u64> {
        if self.state.virt {
            if self.state.hvictl & hvictl::VTI != 0 {
                return Err(Exception::VirtualInstruction);
            }
            return Ok(self.rmw_vsip64(new_value, write_mask));
        }
        let visible = InterruptView::Sip.owners(&self.state).visible();
        let old = self.rmw_mvip64(csr_index::sip, new_value, write_mask & visible & mip::SIP_WRITABLE);
        Ok(old & visible)
    }
}

pub(super) fn read_sstatus(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let mask = hart.sstatus_mask();
    Ok(hart.status_with_sd(hart.state.mstatus & mask, hart.cfg.mxl))
}

pub(super) fn write_sstatus(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let mut mask = hart.sstatus_mask();
    if get_field(value, mstatus::UXL) == 0 {
        mask &= !mstatus::UXL;
    }
    let merged = (hart.state.mstatus & !mask) | (value & mask);
    write_mstatus(hart, csrno, merged)
}

pub(super) fn rmw_sie(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    hart.rmw_sie64(new_value, write_mask)
}

pub(super) fn rmw_sieh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_sie)
}

pub(super) fn rmw_sip(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    hart.rmw_sip64(new_value, write_mask)
}

pub(super) fn rmw_siph(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_sip)
}

pub(super) fn read_stvec(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.bank.live.tvec)
}

pub(super) fn write_stvec(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    if let Some(tvec) = legalize_tvec(hart, value) {
        hart.state.bank.live.tvec = tvec;
    }
    Ok(())
}

pub(super) fn read_senvcfg(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.senvcfg)
}

pub(super) fn write_senvcfg(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let st = &hart.state;
    let mut mask = envcfg::FIOM | envcfg::CBIE | envcfg::CBCFE | envcfg::CBZE;
    if hart.has(Extensions::SMMPM) && get_field(value, envcfg::PMM) != envcfg::PMM_RESERVED {
        mask |= envcfg::PMM;
    }
    // SSE is writable only while every enclosing level enables shadow stacks.
    let sse_allowed = st.menvcfg & envcfg::SSE != 0 && (!st.virt || st.henvcfg & envcfg::SSE != 0);
    if hart.has(Extensions::ZICFISS) && sse_allowed {
        mask |= envcfg::SSE;
    }
    if hart.has(Extensions::ZICFILP) {
        mask |= envcfg::LPE;
    }
    hart.state.senvcfg = (hart.state.senvcfg & !mask) | (value & mask);
    Ok(())
}

/// New `satp`-format value, or `old` when the mode is unsupported or nothing changed.
pub(super) fn legalize_xatp(hart: &mut Hart, old: WordType, value: WordType) -> WordType {
    let (mode, fields) = if hart.cfg.is_rv32() {
        (
            get_field(value, satp::MODE32),
            satp::MODE32 | satp::ASID32 | satp::PPN32,
        )
    } else {
        (
            get_field(value, satp::MODE64),
            satp::MODE64 | satp::ASID64 | satp::PPN64,
        )
    };
    if !hart.cfg.valid_vm(mode) {
        log::debug!("Ignoring atp write with unsupported mode {mode}");
        return old;
    }
    if (value ^ old) & fields == 0 {
        return old;
    }
    hart.flush_tlb();
    value & fields
}

pub(super) fn read_satp(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    if !hart.cfg.mmu {
        return Ok(0);
    }
    Ok(hart.state.bank.live.atp)
}

pub(super) fn write_satp(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    if !hart.cfg.mmu {
        return Ok(());
    }
    let old = hart.state.bank.live.atp;
    hart.state.bank.live.atp = legalize_xatp(hart, old, value);
    Ok(())
}

pub(super) fn read_stopi(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    if hart.state.virt {
        return read_vstopi(hart, csrno);
    }
    let Some(irq) = hart.sirq_pending().filter(|&irq| irq > 0 && irq < 64) else {
        return Ok(0);
    };
    let mut iprio = hart.state.siprio[irq as usize] as WordType;
    if iprio == 0 && default_iprio(irq) > IPRIO_DEFAULT_S {
        iprio = IPRIO_MMAXIPRIO as WordType;
    }
    Ok(((irq as WordType & topi::IID_MASK) << topi::IID_SHIFT) | iprio)
}

// ===== CLIC =====

/// S-level view of `mintstatus`.
pub(super) fn read_sintstatus(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.mintstatus & mintstatus::SIL)
}

/// Claim the interrupt the CLIC offers to S-mode if it beats the current
/// level, returning its `stvt` entry address (0 when nothing is ready).
pub(super) fn rmw_snxti(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let sie_mask = write_mask & mstatus::SIE;
    hart.state.mstatus = (hart.state.mstatus & !sie_mask) | (new_value & sie_mask);

    let Some(offer) = hart.state.clic_exccode.map(ClicOffer::decode) else {
        return Ok(0);
    };
    let threshold = get_field(hart.state.bank.live.cause, xcause::XPIL).max(hart.state.sintthresh);
    let shv = hart.clic.as_ref().is_some_and(|c| c.is_shv(offer.irq));
    let ready = hart.clic_mode()
        && hart.state.priv_level == PrivilegeLevel::S
        && offer.mode == PrivilegeLevel::S as u8
        && offer.level as WordType > threshold
        && !shv;
    if !ready {
        return Ok(0);
    }

    if write_mask != 0 {
        if let Some(clic) = hart.clic.as_mut() {
            if clic.is_edge_triggered(offer.irq) {
                clic.clean_pending(offer.irq);
            }
        }
        let st = &mut hart.state;
        st.mintstatus = set_field(st.mintstatus, mintstatus::SIL, offer.level as WordType);
        st.bank.live.cause = (st.bank.live.cause & !0xfff) | offer.irq as WordType;
    }
    let entry_size = hart.xlen() as WordType / 8;
    Ok((hart.state.stvt & !0x3f) + entry_size * offer.irq as WordType)
}

// ===== CTR =====

/// `sctrctl` is the S-visible subset of `mctrctl`.
pub(super) fn rmw_sctrctl(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let st = &mut hart.state.ctr;
    let old = st.mctrctl;
    let mask = write_mask & ctr::SCTRCTL_MASK;
    st.mctrctl = (old & !mask) | (new_value & mask);
    Ok(old & ctr::SCTRCTL_MASK)
}

pub(super) fn read_sctrstatus(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.ctr.status & ctr::SCTRSTATUS_MASK)
}

pub(super) fn write_sctrstatus(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let st = &mut hart.state.ctr;
    let value = value & ctr::SCTRSTATUS_MASK;
    st.status = value & (!ctr::SCTRSTATUS_WRPTR | (st.entries() - 1));
    Ok(())
}

pub(super) fn read_sctrdepth(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.ctr.depth)
}

pub(super) fn write_sctrdepth(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let st = &mut hart.state.ctr;
    st.depth = (value & ctr::SCTRDEPTH_MASK).min(ctr::SCTRDEPTH_MAX);
    st.status &= !ctr::SCTRSTATUS_WRPTR | (st.entries() - 1);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::InterruptModel, isa::riscv::hart_tester::TestHartBuilder};

    fn clic_s_hart() -> Hart {
        TestHartBuilder::new()
            .interrupt_model(InterruptModel::Clic { clint_compat: false })
            .mode(PrivilegeLevel::S, false)
            .build()
    }

    #[test]
    fn test_stvt_and_sintthresh_are_writable() {
        let mut hart = clic_s_hart();
        hart.csr_write(csr_index::stvt, 0x8000_1000 | 0x3f).unwrap();
        assert_eq!(hart.csr_read(csr_index::stvt), Ok(0x8000_1000));
        assert_eq!(hart.state.stvt, 0x8000_1000);

        hart.csr_write(csr_index::sintthresh, 0x40).unwrap();
        assert_eq!(hart.state.sintthresh, 0x40);

        let mut clint = TestHartBuilder::new().build();
        assert_eq!(
            clint.csr_read(csr_index::stvt),
            Err(Exception::IllegalInstruction)
        );
    }

    #[test]
    fn test_snxti_claims_supervisor_offer() {
        let mut hart = clic_s_hart();
        hart.state.bank.live.tvec = 0x8000_0003;
        hart.csr_write(csr_index::stvt, 0x8000_2000).unwrap();
        hart.state.clic_exccode = Some(12 | (1 << 12) | (0x30 << 14));

        let entry = hart.csrrw(csr_index::snxti, mstatus::SIE, mstatus::SIE).unwrap();
        assert_eq!(entry, 0x8000_2000 + 8 * 12);
        assert_eq!(hart.state.bank.live.cause & 0xfff, 12);
        assert_ne!(hart.state.mstatus & mstatus::SIE, 0);
        assert_eq!(
            hart.csr_read(csr_index::sintstatus),
            Ok(set_field(0, mintstatus::SIL, 0x30))
        );

        // An M-mode offer is not claimable from S.
        hart.state.clic_exccode = Some(12 | (3 << 12) | (0x30 << 14));
        assert_eq!(hart.csr_read(csr_index::snxti), Ok(0));

        // Nor one at or below the threshold.
        hart.state.clic_exccode = Some(12 | (1 << 12) | (0x30 << 14));
        hart.csr_write(csr_index::sintthresh, 0x30).unwrap();
        assert_eq!(hart.csr_read(csr_index::snxti), Ok(0));
    }

    #[test]
    fn test_sstatus_is_mstatus_view() {
        let mut hart = TestHartBuilder::new().build();
        hart.csr_write(csr_index::sstatus, mstatus::SIE | mstatus::MIE | mstatus::SUM).unwrap();
        assert_eq!(hart.state.mstatus & (mstatus::SIE | mstatus::SUM), mstatus::SIE | mstatus::SUM);
        assert_eq!(hart.state.mstatus & mstatus::MIE, 0);

        hart.state.mstatus |= mstatus::MPIE;
        let sstatus = hart.csr_read(csr_index::sstatus).unwrap();
        assert_eq!(sstatus & mstatus::MPIE, 0);
        assert_eq!(get_field(sstatus, mstatus::UXL), 2);
    }

    #[test]
    fn test_sstatus_keeps_uxl_on_zero_write() {
        let mut hart = TestHartBuilder::new().build();
        hart.csr_write(csr_index::sstatus, 0).unwrap();
        assert_eq!(get_field(hart.state.mstatus, mstatus::UXL), 2);
    }

    #[test]
    fn test_sip_delegation_aliasing() {
        let mut hart = TestHartBuilder::new().build();
        hart.state.mideleg = mip::SSIP;

        hart.csr_write(csr_index::sip, mip::SSIP).unwrap();
        assert_eq!(hart.csr_read(csr_index::mip).unwrap() & mip::SSIP, mip::SSIP);
        hart.csr_write(csr_index::mip, 0).unwrap();
        assert_eq!(hart.csr_read(csr_index::sip).unwrap() & mip::SSIP, 0);

        hart.csr_write(csr_index::sie, mip::SSIP | mip::STIP).unwrap();
        assert_eq!(hart.state.mie & (mip::SSIP | mip::STIP), mip::SSIP);
        assert_eq!(hart.csr_read(csr_index::sie).unwrap(), mip::SSIP);
    }

    #[test]
    fn test_undelegated_sip_reads_zero() {
        let mut hart = TestHartBuilder::new().build();
        hart.lines.set_irq(crate::isa::riscv::trap::irq::S_TIMER, true);
        assert_eq!(hart.csr_read(csr_index::sip).unwrap(), 0);
        hart.state.mideleg = mip::STIP;
        assert_eq!(hart.csr_read(csr_index::sip).unwrap(), mip::STIP);
    }

    #[test]
    fn test_sie_shadow_through_mvien() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SMAIA | Extensions::SSAIA)
            .build();
        let irq14 = 1 << 14;
        hart.csr_write(csr_index::mvien, irq14).unwrap();
        hart.csr_write(csr_index::sie, irq14).unwrap();
        assert_eq!(hart.state.sie_shadow, irq14);
        assert_eq!(hart.state.mie & irq14, 0);
        assert_eq!(hart.csr_read(csr_index::sie).unwrap(), irq14);
    }

    #[test]
    fn test_sie_trapped_by_vti() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H | Extensions::SMAIA | Extensions::SSAIA)
            .build();
        hart.state.hvictl = hvictl::VTI;
        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.csr_read(csr_index::sie), Err(Exception::VirtualInstruction));
        assert_eq!(hart.csr_read(csr_index::sip), Err(Exception::VirtualInstruction));
    }

    #[test]
    fn test_satp_mode_legalization() {
        let mut hart = TestHartBuilder::new().build();
        let sv39 = (8 << 60) | 0x1234;
        hart.csr_write(csr_index::satp, sv39).unwrap();
        assert_eq!(hart.csr_read(csr_index::satp).unwrap(), sv39);

        // Sv32 does not exist on RV64.
        hart.csr_write(csr_index::satp, 1 << 60).unwrap();
        assert_eq!(hart.csr_read(csr_index::satp).unwrap(), sv39);

        let mut hart = TestHartBuilder::rv32().build();
        hart.csr_write(csr_index::satp, 0x8000_0042).unwrap();
        assert_eq!(hart.csr_read(csr_index::satp).unwrap(), 0x8000_0042);
    }

    #[test]
    fn test_senvcfg_sse_needs_menvcfg() {
        let mut hart = TestHartBuilder::new().with(Extensions::ZICFISS).build();
        hart.csr_write(csr_index::senvcfg, envcfg::SSE | envcfg::CBZE).unwrap();
        assert_eq!(hart.state.senvcfg, envcfg::CBZE);

        hart.state.menvcfg |= envcfg::SSE;
        hart.csr_write(csr_index::senvcfg, envcfg::SSE).unwrap();
        assert_eq!(hart.state.senvcfg, envcfg::SSE);
    }

    #[test]
    fn test_stopi_reports_delegated_interrupt() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SMAIA | Extensions::SSAIA)
            .build();
        hart.state.mideleg = mip::STIP | mip::SEIP;
        hart.state.mie = mip::STIP | mip::SEIP;
        hart.lines.set_irq(crate::isa::riscv::trap::irq::S_TIMER, true);
        assert_eq!(hart.csr_read(csr_index::stopi).unwrap(), (5 << 16) | 255);

        hart.lines.set_irq(crate::isa::riscv::trap::irq::S_EXT, true);
        assert_eq!(hart.csr_read(csr_index::stopi).unwrap(), 9 << 16);
    }

    #[test]
    fn test_ctr_depth_clamps_write_pointer() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SSCTR | Extensions::SMCTR)
            .build();
        hart.csr_write(csr_index::sctrdepth, 7).unwrap();
        assert_eq!(hart.csr_read(csr_index::sctrdepth).unwrap(), ctr::SCTRDEPTH_MAX);

        hart.csr_write(csr_index::sctrstatus, ctr::SCTRSTATUS_FROZEN | 0xff).unwrap();
        assert_eq!(hart.state.ctr.status, ctr::SCTRSTATUS_FROZEN | 0xff);

        hart.csr_write(csr_index::sctrdepth, 0).unwrap();
        assert_eq!(hart.state.ctr.status, ctr::SCTRSTATUS_FROZEN | 0x0f);
    }

    #[test]
    fn test_sctrctl_is_mctrctl_subset() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SSCTR | Extensions::SMCTR)
            .build();
        hart.csr_write(csr_index::mctrctl, ctr::M_ENABLE | ctr::MTE).unwrap();
        hart.csr_write(csr_index::sctrctl, !0).unwrap();
        assert_eq!(hart.state.ctr.mctrctl, ctr::MCTRCTL_MASK);
        assert_eq!(hart.csr_read(csr_index::sctrctl).unwrap(), ctr::SCTRCTL_MASK);

        hart.csr_write(csr_index::sctrctl, 0).unwrap();
        assert_eq!(hart.state.ctr.mctrctl, ctr::M_ENABLE | ctr::MTE);
    }

    #[test]
    fn test_stvec_uses_live_bank() {
        let mut hart = TestHartBuilder::new().build();
        hart.csr_write(csr_index::stvec, 0x8000_0102).unwrap();
        assert_eq!(hart.state.bank.live.tvec, 0x8000_0100);
    }
}
