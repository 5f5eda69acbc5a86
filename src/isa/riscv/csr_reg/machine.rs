//! Machine-level CSRs, including the `mip`/`mie` core that every
//! lower-privilege interrupt view funnels into.

use super::{
    aliasing::{InterruptView, LineOwners},
    *,
};
use crate::{
    config::Mxl,
    isa::riscv::{
        csr_reg::fields::{
            ctr, envcfg, hstatus, mintstatus, mip, mseccfg, mstatus, mttp, topi, xcause,
        },
        interrupt::{IPRIO_DEFAULT_M, IPRIO_MMAXIPRIO, default_iprio},
        mmu::mtt::MttMode,
    },
    utils::{get_field, set_field},
};

/// Shift a 64-bit accessor onto the upper half of a register (RV32 `*h` CSRs).
pub(super) fn rmw_high(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
    op: RmwFn,
) -> CsrResult<WordType> {
    op(hart, csrno, new_value << 32, write_mask << 32).map(|old| old >> 32)
}

impl Hart {
    /// Supervisor double-trap detection is enabled for the given context.
    pub(crate) fn smode_dbltrp_enabled(&self, virt: bool) -> bool {
        if !self.has(Extensions::SSDBLTRP) {
            return false;
        }
        let cfg = if virt { self.state.henvcfg } else { self.state.menvcfg };
        cfg & envcfg::DTE != 0
    }

    /// Add the summary dirty bit for a status register of the given width.
    pub(crate) fn status_with_sd(&self, status: WordType, mxl: Mxl) -> WordType {
        let dirty = [mstatus::FS, mstatus::VS, mstatus::XS]
            .iter()
            .any(|&field| status & field == field);
        if !dirty {
            return status;
        }
        match mxl {
            Mxl::Rv32 => status | mstatus::SD32,
            Mxl::Rv64 => status | mstatus::SD64,
        }
    }

    /// The `mip` read-modify-write every interrupt-pending view ends in.
    ///
    /// Software writes to `SEIP` are remembered separately so the external
    /// line can still be observed once software clears its copy.
    pub(super) fn rmw_mip64(&mut self, csrno: u16, new_value: u64, write_mask: u64) -> u64 {
        if self.clic_mode() && !self.cfg.clint_clic() {
            return 0;
        }
        let mask = write_mask & mip::DELEGABLE_INTS;
        let (old, hgeip, vstime_irq) = self.lines.update(|s| {
            let mut value = new_value;
            if mask & mip::SEIP != 0 {
                s.software_seip = value & mip::SEIP != 0;
                if s.external_seip {
                    value |= mip::SEIP;
                }
            }
            let old = s.mip;
            s.mip = (old & !mask) | (value & mask);
            (old, s.hgeip, s.vstime_irq)
        });

        let mut old = old;
        if csrno != csr_index::hvip {
            let vgein = get_field(self.state.hstatus, hstatus::VGEIN);
            if vgein != 0 && hgeip & (1 << vgein) != 0 {
                old |= mip::VSEIP;
            }
            if vstime_irq {
                old |= mip::VSTIP;
            }
        }
        old
    }

    pub(super) fn rmw_mie64(&mut self, new_value: u64, write_mask: u64) -> u64 {
        let old = self.state.mie;
        if self.clic_mode() {
            return if self.cfg.clint_clic() { old } else { 0 };
        }
        let mut mask = write_mask & mip::ALL_INTS;
        if !self.has(Extensions::H) {
            mask &= !mip::HS_MODE_INTERRUPTS;
        }
        self.state.mie = (old & !mask) | (new_value & mask);
        old
    }

    /// `mvip`, and `sip` when `csrno` says so: see [`InterruptView::Mvip`].
    pub(super) fn rmw_mvip64(&mut self, csrno: u16, new_value: u64, write_mask: u64) -> u64 {
        let view = if csrno == csr_index::sip {
            InterruptView::Sip
        } else {
            InterruptView::Mvip
        };
        let LineOwners { alias, shadow } = view.owners(&self.state);

        let wr_mip = write_mask & alias & mip::MVIP_WRITABLE;
        let wr_mvip = write_mask & shadow & mip::MVIP_WRITABLE;

        let ret_mip = if wr_mip != 0 {
            self.rmw_mip64(csr_index::mip, new_value, wr_mip)
        } else {
            self.lines.mip()
        };

        let old_mvip = self.state.mvip;
        self.state.mvip = (old_mvip & !wr_mvip) | (new_value & wr_mvip);

        (ret_mip & alias) | (old_mvip & shadow)
    }
}

pub(super) fn read_zero(_hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(0)
}

pub(super) fn read_mvendorid(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.cfg.mvendorid)
}

pub(super) fn read_marchid(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.cfg.marchid)
}

pub(super) fn read_mimpid(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.cfg.mimpid)
}

pub(super) fn read_mhartid(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.cfg.hart_id)
}

// ===== mstatus =====

pub(super) fn read_mstatus(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.status_with_sd(hart.state.mstatus, hart.cfg.mxl))
}

/// Unsupported target privileges leave `MPP` unchanged.
fn legalize_mpp(hart: &Hart, old_mpp: WordType, value: WordType) -> WordType {
    let valid = match PrivilegeLevel::from_bits(get_field(value, mstatus::MPP)) {
        Some(PrivilegeLevel::M) => true,
        Some(PrivilegeLevel::S) => hart.misa_has(Extensions::S),
        Some(PrivilegeLevel::U) => hart.misa_has(Extensions::U),
        None => false,
    };
    if valid {
        value
    } else {
        set_field(value, mstatus::MPP, old_mpp)
    }
}

pub(super) fn write_mstatus(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let old = hart.state.mstatus;
    let mut value = legalize_mpp(hart, get_field(old, mstatus::MPP), value);

    if (value ^ old) & mstatus::MXR != 0 {
        hart.flush_tlb();
    }

    let mut mask = mstatus::SIE
        | mstatus::SPIE
        | mstatus::MIE
        | mstatus::MPIE
        | mstatus::SPP
        | mstatus::MPRV
        | mstatus::SUM
        | mstatus::MPP
        | mstatus::MXR
        | mstatus::TVM
        | mstatus::TSR
        | mstatus::TW;
    if hart.misa_has(Extensions::F) {
        mask |= mstatus::FS;
    }
    if hart.misa_has(Extensions::V) {
        mask |= mstatus::VS;
    }
    if hart.smode_dbltrp_enabled(hart.state.virt) {
        mask |= mstatus::SDT;
        if value & mstatus::SDT != 0 {
            value &= !mstatus::SIE;
        }
    }
    if hart.has(Extensions::SMDBLTRP) {
        mask |= mstatus::MDT;
        if value & mstatus::MDT != 0 {
            value &= !mstatus::MIE;
        }
    }
    if !hart.cfg.is_rv32() || hart.debugger {
        if hart.misa_has(Extensions::H) {
            mask |= mstatus::MPV | mstatus::GVA;
        }
        if get_field(value, mstatus::UXL) == Mxl::Rv64 as WordType {
            mask |= mstatus::UXL;
        }
    }
    if hart.has(Extensions::ZICFILP) {
        mask |= mstatus::SPELP | mstatus::MPELP;
    }

    hart.state.mstatus = (old & !mask) | (value & mask);
    Ok(())
}

pub(super) fn read_mstatush(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.mstatus >> 32)
}

pub(super) fn write_mstatush(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let value = value << 32;
    let mut mask = 0;
    if hart.misa_has(Extensions::H) {
        mask |= mstatus::MPV | mstatus::GVA;
    }
    if hart.has(Extensions::SMDBLTRP) {
        mask |= mstatus::MDT;
        // Setting MDT clears MIE, which the shifted value never carries.
        if value & mstatus::MDT != 0 {
            mask |= mstatus::MIE;
        }
    }
    if hart.has(Extensions::ZICFILP) {
        mask |= mstatus::MPELP;
    }
    hart.state.mstatus = (hart.state.mstatus & !mask) | (value & mask);
    Ok(())
}

// ===== misa =====

pub(super) fn read_misa(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let mxl: u8 = hart.cfg.mxl.into();
    Ok(((mxl as WordType) << (hart.xlen() - 2)) | hart.state.misa_ext)
}

fn misa_consistent(misa: WordType) -> Result<(), &'static str> {
    let has = |ext: Extensions| misa & ext.misa_bits() != 0;
    if !has(Extensions::I) {
        return Err("I cannot be disabled");
    }
    if has(Extensions::D) && !has(Extensions::F) {
        return Err("D requires F");
    }
    if has(Extensions::H) && !has(Extensions::S) {
        return Err("H requires S");
    }
    if has(Extensions::S) && !has(Extensions::U) {
        return Err("S requires U");
    }
    Ok(())
}

pub(super) fn write_misa(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    if !hart.cfg.misa_writable {
        return Ok(());
    }
    let old = hart.state.misa_ext;
    let mut value = value & hart.cfg.ext.misa_bits();

    // Keep C while the next instruction is only 2-byte aligned.
    let c = Extensions::C.misa_bits();
    if value & c == 0 && hart.state.pc & 0x3 != 0 {
        value |= c;
    }
    if value == old {
        return Ok(());
    }
    if let Err(reason) = misa_consistent(value) {
        log::warn!("Ignoring misa write {value:#x}: {reason}");
        return Ok(());
    }
    if value & Extensions::F.misa_bits() == 0 {
        hart.state.mstatus &= !mstatus::FS;
    }
    hart.state.misa_ext = value;
    hart.flush_tlb();
    Ok(())
}

// ===== trap setup =====

pub(super) fn read_mtvec(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.mtvec)
}

/// Legal `xtvec` value for the configured interrupt model, `None` to keep the old one.
pub(super) fn legalize_tvec(hart: &Hart, value: WordType) -> Option<WordType> {
    if hart.cfg.clint_clic() {
        if value & 0x3f == 0x3 || value & 0x2 == 0 {
            Some(value)
        } else {
            log::warn!("Unsupported trap vector mode in {value:#x}");
            None
        }
    } else if hart.cfg.is_clic() && value & 0x2 != 0 {
        Some((value & !0x3f) | 0x3)
    } else {
        Some(value & !0x2)
    }
}

pub(super) fn write_mtvec(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    if let Some(tvec) = legalize_tvec(hart, value) {
        hart.state.mtvec = tvec;
    }
    Ok(())
}

pub(super) fn read_menvcfg(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.menvcfg)
}

pub(super) fn write_menvcfg(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let mut mask = envcfg::FIOM | envcfg::CBIE | envcfg::CBCFE | envcfg::CBZE;
    if !hart.cfg.is_rv32() {
        if hart.has(Extensions::SVPBMT) {
            mask |= envcfg::PBMTE;
        }
        if hart.has(Extensions::SVADU) {
            mask |= envcfg::ADUE;
        }
        if hart.has(Extensions::SSDBLTRP) {
            mask |= envcfg::DTE;
            if value & envcfg::DTE == 0 {
                hart.state.mstatus &= !mstatus::SDT;
            }
        }
    }
    if hart.has(Extensions::S) && hart.has(Extensions::ZICFISS) {
        mask |= envcfg::SSE;
    }
    if hart.has(Extensions::ZICFILP) {
        mask |= envcfg::LPE;
    }
    if hart.has(Extensions::SMMPM) && get_field(value, envcfg::PMM) != envcfg::PMM_RESERVED {
        mask |= envcfg::PMM;
    }
    hart.state.menvcfg = (hart.state.menvcfg & !mask) | (value & mask);
    Ok(())
}

pub(super) fn read_menvcfgh(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.menvcfg >> 32)
}

pub(super) fn write_menvcfgh(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let value = value << 32;
    let mut mask = 0;
    if hart.has(Extensions::SVPBMT) {
        mask |= envcfg::PBMTE;
    }
    if hart.has(Extensions::SVADU) {
        mask |= envcfg::ADUE;
    }
    if hart.has(Extensions::SSDBLTRP) {
        mask |= envcfg::DTE;
        if value & envcfg::DTE == 0 {
            hart.state.mstatus &= !mstatus::SDT;
        }
    }
    hart.state.menvcfg = (hart.state.menvcfg & !mask) | (value & mask);
    Ok(())
}

// ===== interrupts =====

pub(super) fn rmw_mideleg(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let old = hart.state.mideleg;
    let mask = write_mask & mip::DELEGABLE_INTS;
    let mut mideleg = (old & !mask) | (new_value & mask);
    if hart.has(Extensions::H) {
        mideleg |= mip::HS_MODE_INTERRUPTS;
    }
    hart.state.mideleg = mideleg;
    Ok(old)
}

pub(super) fn rmw_midelegh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_mideleg)
}

pub(super) fn rmw_mie(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    Ok(hart.rmw_mie64(new_value, write_mask))
}

pub(super) fn rmw_mieh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_mie)
}

pub(super) fn rmw_mip(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    Ok(hart.rmw_mip64(csrno, new_value, write_mask))
}

pub(super) fn rmw_miph(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_mip)
}

pub(super) fn rmw_mvien(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let old = hart.state.mvien;
    let mask = write_mask & mip::MVIEN_WRITABLE;
    hart.state.mvien = (old & !mask) | (new_value & mask);
    Ok(old)
}

pub(super) fn rmw_mvienh(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_mvien)
}

pub(super) fn rmw_mvip(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    Ok(hart.rmw_mvip64(csrno, new_value, write_mask))
}

pub(super) fn rmw_mviph(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    rmw_high(hart, csrno, new_value, write_mask, rmw_mvip)
}

pub(super) fn read_mtopi(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let Some(irq) = hart.mirq_pending().filter(|&irq| irq > 0 && irq < 64) else {
        return Ok(0);
    };
    let mut iprio = hart.state.miprio[irq as usize] as WordType;
    if iprio == 0 && default_iprio(irq) > IPRIO_DEFAULT_M {
        iprio = IPRIO_MMAXIPRIO as WordType;
    }
    Ok(((irq as WordType & topi::IID_MASK) << topi::IID_SHIFT) | iprio)
}

// ===== control transfer records =====

pub(super) fn read_mctrctl(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.ctr.mctrctl)
}

pub(super) fn write_mctrctl(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    hart.state.ctr.mctrctl = value & ctr::MCTRCTL_MASK;
    Ok(())
}

// ===== security =====

pub(super) fn read_mseccfg(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.mseccfg)
}

pub(super) fn write_mseccfg(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let old = hart.state.mseccfg;
    let mut new = old;

    // RLB can only be set while no rule is locked.
    if !hart.state.pmp.has_locked() || old & mseccfg::RLB != 0 {
        new = (new & !mseccfg::RLB) | (value & mseccfg::RLB);
    }
    if hart.has(Extensions::SMEPMP) {
        // Sticky until reset.
        new |= value & (mseccfg::MML | mseccfg::MMWP);
    }
    let mut mask = 0;
    if hart.has(Extensions::ZKR) {
        mask |= mseccfg::USEED | mseccfg::SSEED;
    }
    if hart.has(Extensions::ZICFILP) {
        mask |= mseccfg::MLPE;
    }
    if hart.has(Extensions::SMMPM) && get_field(value, mseccfg::PMM) != envcfg::PMM_RESERVED {
        mask |= mseccfg::PMM;
    }
    new = (new & !mask) | (value & mask);

    if new != old {
        log::debug!("mseccfg {old:#x} -> {new:#x}");
        hart.state.mseccfg = new;
        hart.flush_tlb();
    }
    Ok(())
}

pub(super) fn read_mseccfgh(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.mseccfg >> 32)
}

pub(super) fn write_mseccfgh(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let low = hart.state.mseccfg & 0xffff_ffff;
    write_mseccfg(hart, csrno, low | (value << 32) & !mseccfg::PMM)
}

pub(super) fn read_mttp(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    let st = &hart.state;
    let value = if hart.cfg.is_rv32() {
        (st.mtt_mode as WordType) << mttp::MODE_SHIFT_32
            | (st.sdid << mttp::SDID_SHIFT_32) & mttp::SDID_MASK_32
            | st.mtt_ppn & mttp::PPN_MASK_32
    } else {
        let mode = match st.mtt_mode {
            0 => 0,
            m => m as WordType - 2,
        };
        mode << mttp::MODE_SHIFT_64
            | (st.sdid << mttp::SDID_SHIFT_64) & mttp::SDID_MASK_64
            | st.mtt_ppn & mttp::PPN_MASK_64
    };
    Ok(value)
}

pub(super) fn write_mttp(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let (mode, sdid, ppn) = if hart.cfg.is_rv32() {
        let mode = get_field(value, mttp::MODE_MASK_32);
        if mode > 1 {
            log::debug!("Ignoring mttp write with mode {mode}");
            return Ok(());
        }
        (
            mode,
            get_field(value, mttp::SDID_MASK_32),
            value & mttp::PPN_MASK_32,
        )
    } else {
        let mode = get_field(value, mttp::MODE_MASK_64);
        if mode >= 5 {
            log::debug!("Ignoring mttp write with mode {mode}");
            return Ok(());
        }
        (
            if mode == 0 { 0 } else { mode + 2 },
            get_field(value, mttp::SDID_MASK_64),
            value & mttp::PPN_MASK_64,
        )
    };
    let Ok(mode) = MttMode::try_from(mode as u8) else {
        return Ok(());
    };
    let st = &mut hart.state;
    st.mtt_mode = mode.into();
    st.sdid = sdid;
    st.mtt_ppn = ppn;
    hart.flush_tlb();
    Ok(())
}

// ===== PMP =====

pub(super) fn read_pmpcfg(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    let reg = (csrno - csr_index::pmpcfg0) as usize;
    Ok(hart.state.pmp.read_cfg(reg, hart.xlen()))
}

pub(super) fn write_pmpcfg(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let reg = (csrno - csr_index::pmpcfg0) as usize;
    let (xlen, seccfg) = (hart.xlen(), hart.state.mseccfg);
    if hart.state.pmp.write_cfg(reg, value, xlen, seccfg) {
        hart.flush_tlb();
    }
    Ok(())
}

pub(super) fn read_pmpaddr(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    let idx = (csrno - csr_index::pmpaddr0) as usize;
    Ok(hart.state.pmp.read_addr(idx))
}

pub(super) fn write_pmpaddr(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let idx = (csrno - csr_index::pmpaddr0) as usize;
    let seccfg = hart.state.mseccfg;
    if hart.state.pmp.write_addr(idx, value, seccfg) {
        hart.flush_tlb();
    }
    Ok(())
}

// ===== CLIC =====

/// Fields of the interrupt the CLIC is currently offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClicOffer {
    pub irq: u32,
    pub mode: u8,
    pub level: u8,
}

impl ClicOffer {
    pub(crate) fn decode(exccode: u32) -> Self {
        Self {
            irq: exccode & 0xfff,
            mode: ((exccode >> 12) & 0x3) as u8,
            level: ((exccode >> 14) & 0xff) as u8,
        }
    }
}

pub(super) fn rmw_mnxti(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let mie_mask = write_mask & mstatus::MIE;
    hart.state.mstatus = (hart.state.mstatus & !mie_mask) | (new_value & mie_mask);

    let Some(offer) = hart.state.clic_exccode.map(ClicOffer::decode) else {
        return Ok(0);
    };
    let threshold = get_field(hart.state.mcause, xcause::XPIL).max(hart.state.mintthresh);
    let shv = hart.clic.as_ref().is_some_and(|c| c.is_shv(offer.irq));
    let ready = hart.clic_mode()
        && hart.state.priv_level == PrivilegeLevel::M
        && offer.mode == PrivilegeLevel::M as u8
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
        st.mintstatus = set_field(st.mintstatus, mintstatus::MIL, offer.level as WordType);
        st.mcause = (st.mcause & !0xfff) | offer.irq as WordType;
    }
    let entry_size = hart.xlen() as WordType / 8;
    Ok((hart.state.mtvt & !0x3f) + entry_size * offer.irq as WordType)
}

/// Swap `mscratch` only when the trap came from a lower privilege.
pub(super) fn rmw_mscratchcsw(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let rs1 = (hart.state.mscratch & !write_mask) | (new_value & write_mask);
    let from_m = get_field(hart.state.mstatus, mstatus::MPP) == PrivilegeLevel::M.bits();
    if from_m {
        return Ok(rs1);
    }
    let old = hart.state.mscratch;
    hart.state.mscratch = rs1;
    Ok(old)
}

/// Swap `mscratch` only when crossing between interrupt level 0 and a nonzero level.
pub(super) fn rmw_mscratchcsl(
    hart: &mut Hart,
    _csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let rs1 = (hart.state.mscratch & !write_mask) | (new_value & write_mask);
    let from_level0 = get_field(hart.state.mcause, xcause::XPIL) == 0;
    let at_level0 = get_field(hart.state.mintstatus, mintstatus::MIL) == 0;
    if from_level0 == at_level0 {
        return Ok(rs1);
    }
    let old = hart.state.mscratch;
    hart.state.mscratch = rs1;
    Ok(old)
}
