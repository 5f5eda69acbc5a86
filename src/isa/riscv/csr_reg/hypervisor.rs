//! Hypervisor (HS-level) CSRs and the VS copies of the supervisor CSRs.

use super::{
    aliasing::{InterruptView, LineOwners, s_to_vs, vs_to_s},
    machine::rmw_high,
    supervisor::legalize_xatp,
    *,
};
use crate::{
    device::ImsicReg,
    isa::riscv::{
        csr_reg::fields::{ctr, envcfg, hstatus, hvictl, iselect, mip, mstatus, topi},
        interrupt::{IPRIO_DEFAULT_S, IPRIO_MMAXIPRIO, default_iprio},
        trap::irq,
    },
    utils::{get_field, set_field},
};

impl Hart {
    /// `vsie` in `sie` bit positions.
    pub(super) fn rmw_vsie64(&mut self, new_value: u64, write_mask: u64) -> u64 {
        let owners = InterruptView::Vsie.owners(&self.state);
        let new_value = s_to_vs(new_value);
        let write_mask = s_to_vs(write_mask);

        let old_mie = self.rmw_mie64(new_value, write_mask & owners.alias);

        let wr_shadow = write_mask & owners.shadow;
        let old_shadow = self.state.vsie_shadow;
        self.state.vsie_shadow = (old_shadow & !wr_shadow) | (new_value & wr_shadow);

        vs_to_s((old_mie & owners.alias) | (old_shadow & owners.shadow))
    }

    /// `vsip` in `sip` bit positions.
    pub(super) fn rmw_vsip64(&mut self, new_value: u64, write_mask: u64) -> u64 {
        let new_value = s_to_vs(new_value);
        let write_mask = s_to_vs(write_mask) & mip::VSIP_WRITABLE;
        vs_to_s(self.rmw_hvip64(csr_index::vsip, new_value, write_mask))
    }

    /// `hvip`, and `vsip` when `csrno` says so: see [`InterruptView::Hvip`].
    fn rmw_hvip64(&mut self, csrno: u16, new_value: u64, write_mask: u64) -> u64 {
        let view = if csrno == csr_index::vsip {
            InterruptView::Vsip
        } else {
            InterruptView::Hvip
        };
        let LineOwners { alias, shadow } = view.owners(&self.state);

        let wr_mip = write_mask & alias & mip::HVIP_WRITABLE;
        let wr_hvip = write_mask & shadow & mip::HVIP_WRITABLE;

        let ret_mip = self.rmw_mip64(csrno, new_value, wr_mip);

        let old_hvip = self.state.hvip;
        self.state.hvip = (old_hvip & !wr_hvip) | (new_value & wr_hvip);

        (ret_mip & alias) | (old_hvip & shadow)
    }
}

// ===== VS copies =====

pub(super) fn read_vsstatus(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let status = hart.state.vsstatus() & hart.bank_swap_mask();
    Ok(hart.status_with_sd(status, hart.cfg.mxl))
}

pub(super) fn write_vsstatus(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let mut mask = hart.bank_swap_mask();
    if get_field(value, mstatus::UXL) == 0 {
        mask &= !mstatus::UXL;
    }
    let st = &mut hart.state;
    let target = if st.virt {
        &mut st.mstatus
    } else {
        &mut st.bank.parked_status
    };
    *target = (*target & !mask) | (value & mask);
    Ok(())
}

pub(super) fn rmw_vsie(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    Ok(hart.rmw_vsie64(new_value, write_mask))
}

pub(super) fn rmw_vsieh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_vsie)
}

pub(super) fn rmw_vsip(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    Ok(hart.rmw_vsip64(new_value, write_mask))
}

pub(super) fn rmw_vsiph(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_vsip)
}

pub(super) fn read_vstvec(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.bank.vs(hart.state.virt).tvec)
}

pub(super) fn write_vstvec(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let virt = hart.state.virt;
    hart.state.bank.vs_mut(virt).tvec = value;
    Ok(())
}

/// `vsscratch`, `vsepc`, `vscause` and `vstval`.
pub(super) fn read_vs_bank(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    let bank = hart.state.bank.vs(hart.state.virt);
    match csrno {
        csr_index::vsscratch => Ok(bank.scratch),
        csr_index::vsepc => Ok(bank.epc),
        csr_index::vscause => Ok(bank.cause),
        csr_index::vstval => Ok(bank.tval),
        _ => Err(Exception::IllegalInstruction),
    }
}

pub(super) fn write_vs_bank(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let virt = hart.state.virt;
    let bank = hart.state.bank.vs_mut(virt);
    let slot = match csrno {
        csr_index::vsscratch => &mut bank.scratch,
        csr_index::vsepc => &mut bank.epc,
        csr_index::vscause => &mut bank.cause,
        csr_index::vstval => &mut bank.tval,
        _ => return Err(Exception::IllegalInstruction),
    };
    *slot = value;
    Ok(())
}

pub(super) fn read_vsatp(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.bank.vs(hart.state.virt).atp)
}

pub(super) fn write_vsatp(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let virt = hart.state.virt;
    let old = hart.state.bank.vs(virt).atp;
    let atp = legalize_xatp(hart, old, value);
    hart.state.bank.vs_mut(virt).atp = atp;
    Ok(())
}

pub(super) fn read_vstopi(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let st = &hart.state;
    let gein = get_field(st.hstatus, hstatus::VGEIN) as u32;
    let hviid = get_field(st.hvictl, hvictl::IID) as u32;
    let hviprio = get_field(st.hvictl, hvictl::IPRIO) as u32;

    // (iid, priority) candidates; the smallest priority wins.
    let mut best: Option<(u32, u32)> = None;
    let mut offer = |iid: u32, prio: u32| {
        if best.is_none_or(|(_, p)| prio < p) {
            best = Some((iid, prio));
        }
    };

    if gein != 0 {
        let lines = hart.lines.snapshot();
        let vsgein = if lines.hgeip & (1 << gein) != 0 { mip::VSEIP } else { 0 };
        let vseip = st.mie & (lines.mip | vsgein) & mip::VSEIP;
        if gein <= hart.cfg.geilen as u32 && vseip != 0 {
            let mut prio = IPRIO_MMAXIPRIO as u32 + 1;
            let reg = ImsicReg {
                priv_level: PrivilegeLevel::S as u8,
                virt: true,
                vgein: gein,
                isel: iselect::IMSIC_TOPEI,
                xlen: hart.xlen(),
            };
            if let Some(topei) = hart.imsic.as_mut().and_then(|f| f.rmw(reg, 0, 0))
                && topei != 0
            {
                prio = (topei & topi::IMSIC_TOPEI_IPRIO_MASK) as u32;
            }
            offer(irq::S_EXT, prio);
        }
    } else if hviid == irq::S_EXT && hviprio != 0 {
        offer(irq::S_EXT, hviprio);
    }

    if hart.state.hvictl & hvictl::VTI != 0 {
        if hviid != irq::S_EXT {
            offer(hviid, hviprio);
        }
    } else if let Some(virq) = hart.vsirq_pending()
        && virq != irq::S_EXT
        && virq > 0
        && virq < 64
    {
        offer(virq, hart.state.hviprio[virq as usize] as u32);
    }

    let Some((iid, mut iprio)) = best.filter(|&(iid, _)| iid != 0) else {
        return Ok(0);
    };
    if hart.state.hvictl & hvictl::IPRIOM != 0 {
        iprio = iprio.min(IPRIO_MMAXIPRIO as u32);
        if iprio == 0 && default_iprio(iid) > IPRIO_DEFAULT_S {
            iprio = IPRIO_MMAXIPRIO as u32;
        }
    } else {
        iprio = 1;
    }
    Ok(((iid as WordType & topi::IID_MASK) << topi::IID_SHIFT) | iprio as WordType)
}

pub(super) fn read_vsctrctl(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.ctr.vsctrctl)
}

pub(super) fn write_vsctrctl(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    hart.state.ctr.vsctrctl = value & ctr::VSCTRCTL_MASK;
    Ok(())
}

// ===== HS-level =====

pub(super) fn read_hstatus(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let mut value = hart.state.hstatus;
    if !hart.cfg.is_rv32() {
        // Only 64-bit guests are supported.
        value = set_field(value, hstatus::VSXL, 2);
    }
    Ok(value & !hstatus::VSBE)
}

pub(super) fn write_hstatus(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    if !hart.cfg.is_rv32() && get_field(value, hstatus::VSXL) != 2 {
        log::warn!("Unsupported hstatus.VSXL in {value:#x}, guests stay 64-bit");
    }
    if value & hstatus::VSBE != 0 {
        log::warn!("Big-endian guests are not supported");
    }
    hart.state.hstatus = value & hstatus::WRITE_MASK;
    Ok(())
}

pub(super) fn rmw_hideleg(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let old = hart.state.hideleg;
    let mask = write_mask & mip::VS_DELEGABLE_INTS;
    hart.state.hideleg = (old & !mask) | (new_value & mask);
    Ok(old & mip::VS_DELEGABLE_INTS)
}

pub(super) fn rmw_hidelegh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_hideleg)
}

pub(super) fn rmw_hie(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let old = hart.rmw_mie64(new_value, write_mask & mip::HS_MODE_INTERRUPTS);
    Ok(old & mip::HS_MODE_INTERRUPTS)
}

pub(super) fn rmw_hip(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let old = hart.rmw_mip64(csrno, new_value, write_mask & mip::HIP_WRITABLE);
    Ok(old & mip::HS_MODE_INTERRUPTS)
}

pub(super) fn rmw_hvien(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let old = hart.state.hvien;
    let mask = write_mask & mip::HVIEN_WRITABLE;
    hart.state.hvien = (old & !mask) | (new_value & mask);
    Ok(old)
}

pub(super) fn rmw_hvienh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_hvien)
}

pub(super) fn rmw_hvip(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    Ok(hart.rmw_hvip64(csr_index::hvip, new_value, write_mask))
}

pub(super) fn rmw_hviph(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_hvip)
}

pub(super) fn read_hgeie(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.lines.snapshot().hgeie)
}

pub(super) fn write_hgeie(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    // Bit 0 and everything above GEILEN are read-only zero.
    let implemented = ((1 << hart.cfg.geilen) - 1) << 1;
    hart.lines.set_hgeie(value & implemented);
    Ok(())
}

pub(super) fn read_hgeip(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.lines.snapshot().hgeip)
}

pub(super) fn read_hgatp(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.hgatp)
}

pub(super) fn write_hgatp(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let old = hart.state.hgatp;
    hart.state.hgatp = legalize_xatp(hart, old, value);
    Ok(())
}

/// `henvcfg` bits that read as zero unless `menvcfg` sets them.
const HENVCFG_GATED: WordType =
    envcfg::PBMTE | envcfg::STCE | envcfg::ADUE | envcfg::DTE | envcfg::SSE;

fn henvcfg_writable(hart: &Hart, value: WordType) -> WordType {
    let menvcfg = hart.state.menvcfg;
    let mut mask = envcfg::FIOM | envcfg::CBIE | envcfg::CBCFE | envcfg::CBZE;
    if hart.has(Extensions::SMMPM) && get_field(value, envcfg::PMM) != envcfg::PMM_RESERVED {
        mask |= envcfg::PMM;
    }
    if !hart.cfg.is_rv32() {
        let mut gated = envcfg::PBMTE | envcfg::STCE | envcfg::ADUE;
        if hart.has(Extensions::SSDBLTRP) {
            gated |= envcfg::DTE;
        }
        mask |= menvcfg & gated;
    }
    if hart.has(Extensions::ZICFISS) {
        mask |= menvcfg & envcfg::SSE;
    }
    if hart.has(Extensions::ZICFILP) {
        mask |= menvcfg & envcfg::LPE;
    }
    mask
}

pub(super) fn read_henvcfg(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.henvcfg & (!HENVCFG_GATED | hart.state.menvcfg))
}

pub(super) fn write_henvcfg(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let mask = henvcfg_writable(hart, value);
    hart.state.henvcfg = (hart.state.henvcfg & !mask) | (value & mask);
    Ok(())
}

pub(super) fn read_henvcfgh(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    read_henvcfg(hart, csrno).map(|v| v >> 32)
}

pub(super) fn write_henvcfgh(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let value = value << 32;
    let menvcfg = hart.state.menvcfg;
    let mut gated = envcfg::PBMTE | envcfg::STCE | envcfg::ADUE;
    if hart.has(Extensions::SSDBLTRP) {
        gated |= envcfg::DTE;
    }
    let mask = menvcfg & gated;
    hart.state.henvcfg = (hart.state.henvcfg & !mask) | (value & mask);
    Ok(())
}

// ===== hviprio =====

/// Major interrupt behind each byte of the `hviprio` registers, and whether
/// that byte is read-only zero.
#[rustfmt::skip]
const HVIPRIO_INDEX2IRQ: [(u32, bool); 16] = [
    (0, true),   (1, false),  (4, true),   (5, false),
    (8, true),   (13, false), (14, false), (15, false),
    (16, false), (17, false), (18, false), (19, false),
    (20, false), (21, false), (22, false), (23, false),
];

/// First `hviprio` byte held by `csrno`.
fn hviprio_first_index(hart: &Hart, csrno: u16) -> CsrResult<usize> {
    let first = match csrno {
        csr_index::hviprio1 => 0,
        csr_index::hviprio1h => 4,
        csr_index::hviprio2 => 8,
        csr_index::hviprio2h => 12,
        _ => return Err(Exception::IllegalInstruction),
    };
    if first % hviprio_irqs_per_reg(hart) != 0 {
        return Err(if hart.state.virt {
            Exception::VirtualInstruction
        } else {
            Exception::IllegalInstruction
        });
    }
    Ok(first)
}

#[inline]
fn hviprio_irqs_per_reg(hart: &Hart) -> usize {
    4 * (hart.xlen() as usize / 32)
}

pub(super) fn read_hviprio(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    let first = hviprio_first_index(hart, csrno)?;
    let n = hviprio_irqs_per_reg(hart);
    let value = HVIPRIO_INDEX2IRQ[first..first + n]
        .iter()
        .enumerate()
        .filter(|(_, (_, rdzero))| !rdzero)
        .fold(0, |acc, (i, &(irq, _))| {
            acc | (hart.state.hviprio[irq as usize] as WordType) << (i * 8)
        });
    Ok(value)
}

pub(super) fn write_hviprio(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let first = hviprio_first_index(hart, csrno)?;
    let n = hviprio_irqs_per_reg(hart);
    for (i, &(irq, rdzero)) in HVIPRIO_INDEX2IRQ[first..first + n].iter().enumerate() {
        hart.state.hviprio[irq as usize] = if rdzero {
            0
        } else {
            (value >> (i * 8)) as u8
        };
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::riscv::hart_tester::TestHartBuilder;

    fn aia_hart() -> Hart {
        TestHartBuilder::new()
            .with(Extensions::H | Extensions::SMAIA | Extensions::SSAIA)
            .geilen(4)
            .build()
    }

    #[test]
    fn test_vs_bank_follows_virtualization() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::vsscratch, 0x55).unwrap();
        hart.csr_write(csr_index::sscratch, 0x66).unwrap();
        assert_eq!(hart.state.bank.parked.scratch, 0x55);

        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.csr_read(csr_index::sscratch).unwrap(), 0x55);
        hart.set_mode(PrivilegeLevel::M, false);
        assert_eq!(hart.csr_read(csr_index::vsscratch).unwrap(), 0x55);
        assert_eq!(hart.csr_read(csr_index::sscratch).unwrap(), 0x66);
    }

    #[test]
    fn test_vsstatus_write_keeps_uxl() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::vsstatus, mstatus::SIE | mstatus::MIE).unwrap();
        let vsstatus = hart.csr_read(csr_index::vsstatus).unwrap();
        assert_eq!(vsstatus & (mstatus::SIE | mstatus::MIE), mstatus::SIE);
        assert_eq!(get_field(vsstatus, mstatus::UXL), 2);
        // The HS copy is untouched.
        assert_eq!(hart.state.mstatus & mstatus::SIE, 0);
    }

    #[test]
    fn test_hstatus_fixed_fields() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::hstatus, hstatus::VSBE | hstatus::SPV | (1 << 12))
            .unwrap();
        let value = hart.csr_read(csr_index::hstatus).unwrap();
        assert_eq!(value & hstatus::VSBE, 0);
        assert_eq!(get_field(value, hstatus::VSXL), 2);
        assert_eq!(get_field(value, hstatus::VGEIN), 1);
        assert_ne!(value & hstatus::SPV, 0);
    }

    #[test]
    fn test_hideleg_masks_non_vs_bits() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::hideleg, !0).unwrap();
        assert_eq!(hart.state.hideleg, mip::VS_DELEGABLE_INTS);
        assert_eq!(hart.state.hideleg & mip::S_MODE_INTERRUPTS, 0);
    }

    #[test]
    fn test_hvip_injects_vs_interrupts() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::hvip, mip::VSTIP | mip::SSIP).unwrap();
        assert_eq!(hart.lines.mip() & (mip::VSTIP | mip::SSIP), mip::VSTIP);
        assert_eq!(hart.csr_read(csr_index::hip).unwrap(), mip::VSTIP);
        assert_eq!(hart.csr_read(csr_index::hvip).unwrap(), mip::VSTIP);
    }

    #[test]
    fn test_vsip_is_shifted_hvip() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::hvip, mip::VSSIP).unwrap();

        // Not delegated: vsip hides it.
        assert_eq!(hart.csr_read(csr_index::vsip).unwrap(), 0);

        hart.csr_write(csr_index::hideleg, mip::VSSIP).unwrap();
        assert_eq!(hart.csr_read(csr_index::vsip).unwrap(), mip::SSIP);

        hart.csr_write(csr_index::vsip, 0).unwrap();
        assert_eq!(hart.lines.mip() & mip::VSSIP, 0);

        // While V=1 the sip name reaches vsip.
        hart.csr_write(csr_index::vsip, mip::SSIP).unwrap();
        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.csr_read(csr_index::sip).unwrap(), mip::SSIP);
    }

    #[test]
    fn test_vsie_aliases_mie() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::hideleg, mip::VSTIP).unwrap();
        hart.csr_write(csr_index::vsie, mip::STIP | mip::SSIP).unwrap();
        assert_eq!(hart.state.mie & mip::VS_MODE_INTERRUPTS, mip::VSTIP);
        assert_eq!(hart.csr_read(csr_index::vsie).unwrap(), mip::STIP);
    }

    #[test]
    fn test_vsie_local_shadow() {
        let mut hart = aia_hart();
        let irq14 = 1 << 14;
        hart.csr_write(csr_index::hvien, irq14).unwrap();
        hart.csr_write(csr_index::vsie, irq14).unwrap();
        assert_eq!(hart.state.vsie_shadow, irq14);
        assert_eq!(hart.state.mie & irq14, 0);
        assert_eq!(hart.csr_read(csr_index::vsie).unwrap(), irq14);
    }

    #[test]
    fn test_hgeie_width() {
        let mut hart = aia_hart();
        hart.csr_write(csr_index::hgeie, !0).unwrap();
        assert_eq!(hart.csr_read(csr_index::hgeie).unwrap(), 0b11110);

        hart.lines.set_guest_external(2, true);
        assert_eq!(hart.csr_read(csr_index::hgeip).unwrap(), 0b100);
        assert_ne!(hart.lines.mip() & mip::SGEIP, 0);
    }

    #[test]
    fn test_hgatp_and_vsatp_legalize() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        let sv39x4 = (8 << 60) | 0x80;
        hart.csr_write(csr_index::hgatp, sv39x4).unwrap();
        assert_eq!(hart.csr_read(csr_index::hgatp).unwrap(), sv39x4);
        hart.csr_write(csr_index::hgatp, 3 << 60).unwrap();
        assert_eq!(hart.csr_read(csr_index::hgatp).unwrap(), sv39x4);

        hart.csr_write(csr_index::vsatp, (9 << 60) | 0x10).unwrap();
        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.csr_read(csr_index::satp).unwrap(), (9 << 60) | 0x10);
    }

    #[test]
    fn test_henvcfg_gated_by_menvcfg() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H | Extensions::SVPBMT)
            .build();
        // Reset enables PBMTE when Svpbmt is present.
        hart.csr_write(csr_index::menvcfg, 0).unwrap();
        hart.csr_write(csr_index::henvcfg, envcfg::PBMTE | envcfg::CBZE).unwrap();
        assert_eq!(hart.csr_read(csr_index::henvcfg).unwrap(), envcfg::CBZE);

        hart.csr_write(csr_index::menvcfg, envcfg::PBMTE).unwrap();
        hart.csr_write(csr_index::henvcfg, envcfg::PBMTE | envcfg::CBZE).unwrap();
        assert_eq!(
            hart.csr_read(csr_index::henvcfg).unwrap(),
            envcfg::PBMTE | envcfg::CBZE
        );

        // Clearing menvcfg.PBMTE hides the stored bit again.
        hart.csr_write(csr_index::menvcfg, 0).unwrap();
        assert_eq!(hart.csr_read(csr_index::henvcfg).unwrap(), envcfg::CBZE);
    }

    #[test]
    fn test_hviprio_layout() {
        let mut hart = aia_hart();
        hart.csr_write(csr_index::hviprio1, 0x4433_2211_0000_0000 | 0xaa00_bb00)
            .unwrap();
        // Bytes 0, 2, 4 are read-only zero; 1 is irq 1, 3 is irq 5.
        assert_eq!(hart.state.hviprio[1], 0xbb);
        assert_eq!(hart.state.hviprio[5], 0xaa);
        assert_eq!(hart.state.hviprio[13], 0x22);
        assert_eq!(hart.state.hviprio[15], 0x44);
        assert_eq!(
            hart.csr_read(csr_index::hviprio1).unwrap(),
            0x4433_2200_0000_0000 | 0xaa00_bb00
        );
    }

    #[test]
    fn test_hviprio1h_misaligned_on_rv64() {
        let mut hart = aia_hart();
        hart.set_mode(PrivilegeLevel::S, false);
        assert_eq!(
            hart.csrrw_debug(csr_index::hviprio1h, 0, 0),
            Err(Exception::IllegalInstruction)
        );
    }

    #[test]
    fn test_vstopi_hvictl_injection() {
        let mut hart = aia_hart();
        hart.state.hvictl = hvictl::VTI | (9 << 16) | 0x40;
        assert_eq!(hart.csr_read(csr_index::vstopi).unwrap(), (9 << 16) | 1);

        hart.state.hvictl |= hvictl::IPRIOM;
        assert_eq!(hart.csr_read(csr_index::vstopi).unwrap(), (9 << 16) | 0x40);

        hart.state.hvictl = hvictl::VTI | (13 << 16) | hvictl::IPRIOM;
        assert_eq!(hart.csr_read(csr_index::vstopi).unwrap(), (13 << 16) | 255);
    }

    #[test]
    fn test_vstopi_reports_vs_timer() {
        let mut hart = aia_hart();
        hart.csr_write(csr_index::hideleg, mip::VSTIP).unwrap();
        hart.state.mie = mip::VSTIP;
        hart.lines.set_vstimer(true);
        assert_eq!(hart.csr_read(csr_index::vstopi).unwrap(), (irq::S_TIMER as u64) << 16 | 1);
    }
}
