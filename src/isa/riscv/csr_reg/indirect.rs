//! Indirect CSR access: `*iselect`, `*ireg*` and `*topei`.
//!
//! `*ireg` reaches the AIA interrupt priority arrays, the IMSIC interrupt
//! files and the control transfer record buffer, depending on the value in
//! the matching `*iselect`.

use super::*;
use crate::{
    device::ImsicReg,
    isa::riscv::{
        csr_reg::fields::{ctr, iselect, hstatus, mip},
        interrupt::IPRIO_IRQ_BITS,
        trap::irq,
    },
    utils::get_field,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndirectFile {
    M,
    S,
    Vs,
}

impl IndirectFile {
    fn of(csrno: u16) -> Option<Self> {
        match csrno & 0xf00 {
            0x300 => Some(Self::M),
            0x100 => Some(Self::S),
            0x200 => Some(Self::Vs),
            _ => None,
        }
    }

    fn priv_level(self) -> PrivilegeLevel {
        match self {
            Self::M => PrivilegeLevel::M,
            Self::S | Self::Vs => PrivilegeLevel::S,
        }
    }
}

/// While V=1 the supervisor names reach the VS registers.
fn xlate_vs_csrno(hart: &Hart, csrno: u16) -> u16 {
    if !hart.state.virt {
        return csrno;
    }
    match csrno {
        csr_index::siselect => csr_index::vsiselect,
        csr_index::stopei => csr_index::vstopei,
        csr_index::sireg..=csr_index::sireg6 if csrno != csr_index::siph => {
            csr_index::vsireg + (csrno - csr_index::sireg)
        }
        _ => csrno,
    }
}

/// `1` for `*ireg`, `2` for `*ireg2` and so on.
fn ireg_number(csrno: u16) -> Option<u16> {
    match csrno & 0xff {
        0x51..=0x53 => Some((csrno & 0xff) - 0x50),
        0x55..=0x57 => Some((csrno & 0xff) - 0x51),
        _ => None,
    }
}

/// The fault for a failed indirect access from `file`.
fn indirect_fault(hart: &Hart, file: IndirectFile) -> Exception {
    if hart.state.virt && file == IndirectFile::Vs {
        Exception::VirtualInstruction
    } else {
        Exception::IllegalInstruction
    }
}

fn iselect_field(st: &mut HartState, file: IndirectFile) -> &mut WordType {
    match file {
        IndirectFile::M => &mut st.miselect,
        IndirectFile::S => &mut st.siselect,
        IndirectFile::Vs => &mut st.vsiselect,
    }
}

pub(super) fn rmw_xiselect(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let csrno = xlate_vs_csrno(hart, csrno);
    let file = IndirectFile::of(csrno).ok_or(Exception::IllegalInstruction)?;
    let mask = if hart.cfg.ext.intersects(Extensions::SMCSRIND | Extensions::SSCSRIND) {
        iselect::MASK_SXCSRIND
    } else {
        iselect::MASK_AIA
    };
    let write_mask = write_mask & mask;
    let field = iselect_field(&mut hart.state, file);
    let old = *field;
    *field = (old & !write_mask) | (new_value & write_mask);
    Ok(old)
}

pub(super) fn rmw_xireg(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let csrno = xlate_vs_csrno(hart, csrno);
    let (Some(file), Some(reg)) = (IndirectFile::of(csrno), ireg_number(csrno)) else {
        return Err(Exception::IllegalInstruction);
    };
    let isel = *iselect_field(&mut hart.state, file);

    let aia_range = (iselect::IPRIO0..=iselect::IPRIO15).contains(&isel)
        || (iselect::IMSIC_FIRST..=iselect::IMSIC_LAST).contains(&isel);
    if reg == 1 && aia_range {
        return rmw_xireg_aia(hart, file, isel, new_value, write_mask);
    }
    if !hart.cfg.ext.intersects(Extensions::SMCSRIND | Extensions::SSCSRIND) {
        return Err(Exception::IllegalInstruction);
    }
    if !(iselect::CTR_FIRST..=iselect::CTR_LAST).contains(&isel) {
        // Unimplemented selector ranges.
        return Err(Exception::IllegalInstruction);
    }
    rmw_xireg_ctr(hart, file, reg, isel, new_value, write_mask)
        .ok_or_else(|| indirect_fault(hart, file))
}

fn rmw_xireg_aia(
    hart: &mut Hart,
    file: IndirectFile,
    isel: WordType,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let st = &hart.state;
    let imsic_range = (iselect::IMSIC_FIRST..=iselect::IMSIC_LAST).contains(&isel);
    let available = match file {
        IndirectFile::M => hart.has(Extensions::SMAIA),
        // With mvien.SEIP set the S-level IMSIC file belongs to M-mode.
        IndirectFile::S => {
            hart.has(Extensions::SSAIA)
                && !(st.priv_level == PrivilegeLevel::S && st.mvien & mip::SEIP != 0 && imsic_range)
        }
        IndirectFile::Vs => hart.has(Extensions::SSAIA),
    };
    let fault = indirect_fault(hart, file);
    if !available {
        return Err(fault);
    }

    if !imsic_range {
        // Priority arrays. VS-mode has none.
        let xlen = hart.xlen();
        let (iprio, ext_irq) = match file {
            IndirectFile::M => (&mut hart.state.miprio, irq::M_EXT),
            IndirectFile::S => (&mut hart.state.siprio, irq::S_EXT),
            IndirectFile::Vs => return Err(fault),
        };
        return rmw_iprio(xlen, isel, iprio, new_value, write_mask, ext_irq).ok_or(fault);
    }

    let virt = file == IndirectFile::Vs;
    let vgein = if virt {
        get_field(hart.state.hstatus, hstatus::VGEIN) as u32
    } else {
        0
    };
    if virt && (vgein == 0 || vgein > hart.cfg.geilen as u32) {
        return Err(fault);
    }
    let reg = ImsicReg {
        priv_level: file.priv_level() as u8,
        virt,
        vgein,
        isel,
        xlen: hart.xlen(),
    };
    hart.imsic
        .as_mut()
        .and_then(|imsic| imsic.rmw(reg, new_value, write_mask))
        .ok_or(fault)
}

/// Access one `iprio` register: four (RV32) or eight (RV64) priority bytes.
///
/// The level's own external interrupt keeps a read-only zero priority so the
/// default order always applies to it.
fn rmw_iprio(
    xlen: u32,
    isel: WordType,
    iprio: &mut [u8; 64],
    new_value: WordType,
    write_mask: WordType,
    ext_irq: u32,
) -> Option<WordType> {
    if xlen != 32 && isel & 1 != 0 {
        return None;
    }
    let regs_per_word = (xlen / 32) as usize;
    let nirqs = 4 * regs_per_word;
    let first = (isel - iselect::IPRIO0) as usize / regs_per_word * nirqs;

    let old = (0..nirqs).fold(0, |acc, i| {
        acc | (iprio[first + i] as WordType) << (IPRIO_IRQ_BITS as usize * i)
    });
    if write_mask != 0 {
        let value = (old & !write_mask) | (new_value & write_mask);
        for i in 0..nirqs {
            if first + i == ext_irq as usize {
                continue;
            }
            iprio[first + i] = (value >> (IPRIO_IRQ_BITS as usize * i)) as u8;
        }
    }
    Some(old)
}

/// Control transfer record entry `isel - CTR_FIRST`, counted back from the
/// most recent one. `reg` 1, 2 and 3 select source, target and data.
fn rmw_xireg_ctr(
    hart: &mut Hart,
    file: IndirectFile,
    reg: u16,
    isel: WordType,
    new_value: WordType,
    write_mask: WordType,
) -> Option<WordType> {
    let ext = match file {
        IndirectFile::M => Extensions::SMCTR,
        IndirectFile::S | IndirectFile::Vs => Extensions::SSCTR,
    };
    if !hart.has(ext) {
        return None;
    }
    let st = &mut hart.state.ctr;
    let (array, write_mask) = match reg {
        1 => (&mut st.src, write_mask),
        2 => (&mut st.dst, write_mask),
        3 => (&mut st.data, write_mask & ctr::DATA_MASK),
        _ => return None,
    };

    let entry = isel - iselect::CTR_FIRST;
    let depth = 16 << st.depth;
    if entry >= depth {
        // Entries past the configured depth are read-only zero.
        return Some(0);
    }
    let wrptr = get_field(st.status, ctr::SCTRSTATUS_WRPTR);
    let idx = (wrptr.wrapping_sub(entry + 1) & (depth - 1)) as usize;

    let old = array[idx];
    array[idx] = (old & !write_mask) | (new_value & write_mask);
    Some(old)
}

pub(super) fn rmw_xtopei(
    hart: &mut Hart,
    csrno: u16,
    new_value: WordType,
    write_mask: WordType,
) -> CsrResult<WordType> {
    let csrno = xlate_vs_csrno(hart, csrno);
    let file = IndirectFile::of(csrno).ok_or(Exception::IllegalInstruction)?;
    let fault = indirect_fault(hart, file);
    let st = &hart.state;
    if file == IndirectFile::S && st.mvien & mip::SEIP != 0 && st.priv_level == PrivilegeLevel::S {
        return Err(fault);
    }

    let virt = file == IndirectFile::Vs;
    let vgein = if virt {
        get_field(st.hstatus, hstatus::VGEIN) as u32
    } else {
        0
    };
    if virt && (vgein == 0 || vgein > hart.cfg.geilen as u32) {
        return Err(fault);
    }
    let reg = ImsicReg {
        priv_level: file.priv_level() as u8,
        virt,
        vgein,
        isel: iselect::IMSIC_TOPEI,
        xlen: hart.xlen(),
    };
    hart.imsic
        .as_mut()
        .and_then(|imsic| imsic.rmw(reg, new_value, write_mask))
        .ok_or(fault)
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{device::ImsicFile, isa::riscv::hart_tester::TestHartBuilder, utils::set_field};

    /// Records every access and answers with the selector.
    #[derive(Default)]
    struct RecordingImsic {
        seen: Arc<Mutex<Vec<ImsicReg>>>,
    }

    impl ImsicFile for RecordingImsic {
        fn rmw(&mut self, reg: ImsicReg, _new: WordType, _wr_mask: WordType) -> Option<WordType> {
            self.seen.lock().unwrap().push(reg);
            Some(reg.isel)
        }
    }

    fn aia_hart() -> Hart {
        TestHartBuilder::new()
            .with(Extensions::H | Extensions::SMAIA | Extensions::SSAIA)
            .geilen(2)
            .build()
    }

    #[test]
    fn test_iselect_width() {
        let mut hart = aia_hart();
        hart.csr_write(csr_index::miselect, 0xfff).unwrap();
        assert_eq!(hart.csr_read(csr_index::miselect).unwrap(), 0x1ff);

        let mut hart = TestHartBuilder::new()
            .with(Extensions::SMCSRIND | Extensions::SSCSRIND)
            .build();
        hart.csr_write(csr_index::siselect, 0xffff).unwrap();
        assert_eq!(hart.csr_read(csr_index::siselect).unwrap(), 0xfff);
    }

    #[test]
    fn test_iprio_rv64_layout() {
        let mut hart = aia_hart();
        hart.csr_write(csr_index::miselect, iselect::IPRIO0 + 2).unwrap();
        hart.csr_write(csr_index::mireg, 0x0807_0605_0403_0201).unwrap();
        // iprio2 holds irqs 8..=15 and irq 11 (M_EXT) stays zero.
        assert_eq!(hart.state.miprio[8], 0x01);
        assert_eq!(hart.state.miprio[10], 0x03);
        assert_eq!(hart.state.miprio[11], 0);
        assert_eq!(hart.state.miprio[15], 0x08);
        assert_eq!(hart.csr_read(csr_index::mireg).unwrap(), 0x0807_0605_0003_0201);

        // Odd selectors do not exist on RV64.
        hart.csr_write(csr_index::miselect, iselect::IPRIO0 + 1).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg), Err(Exception::IllegalInstruction));
    }

    #[test]
    fn test_iprio_rv32_layout() {
        let mut hart = TestHartBuilder::rv32()
            .with(Extensions::SMAIA | Extensions::SSAIA)
            .build();
        hart.csr_write(csr_index::siselect, iselect::IPRIO0 + 1).unwrap();
        hart.csr_write(csr_index::sireg, 0x4433_2211).unwrap();
        assert_eq!(hart.state.siprio[4..8], [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_sireg_reaches_vsireg_in_virt() {
        let mut hart = aia_hart();
        hart.csr_write(csr_index::vsiselect, iselect::IPRIO0).unwrap();
        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.csr_read(csr_index::siselect).unwrap(), iselect::IPRIO0);
        // VS-mode has no priority array.
        assert_eq!(hart.csr_read(csr_index::sireg), Err(Exception::VirtualInstruction));
    }

    #[test]
    fn test_imsic_routing() {
        let mut hart = aia_hart();
        let imsic = RecordingImsic::default();
        let seen = imsic.seen.clone();
        hart.attach_imsic(Box::new(imsic));

        hart.csr_write(csr_index::miselect, iselect::IMSIC_EIDELIVERY).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg).unwrap(), iselect::IMSIC_EIDELIVERY);
        assert_eq!(hart.csr_read(csr_index::mtopei).unwrap(), iselect::IMSIC_TOPEI);

        // Guest file 0 is not a guest file.
        assert_eq!(hart.csr_read(csr_index::vstopei), Err(Exception::IllegalInstruction));
        hart.state.hstatus = set_field(hart.state.hstatus, hstatus::VGEIN, 2);
        assert!(hart.csr_read(csr_index::vstopei).is_ok());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].priv_level, PrivilegeLevel::M as u8);
        assert!(seen[2].virt);
        assert_eq!(seen[2].vgein, 2);
    }

    #[test]
    fn test_stopei_owned_by_m_with_mvien_seip() {
        let mut hart = aia_hart();
        hart.attach_imsic(Box::new(RecordingImsic::default()));
        hart.state.mvien = mip::SEIP;
        hart.set_mode(PrivilegeLevel::S, false);
        assert_eq!(hart.csr_read(csr_index::stopei), Err(Exception::IllegalInstruction));
    }

    #[test]
    fn test_ctr_entries_count_back_from_wrptr() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SMCTR | Extensions::SSCTR | Extensions::SMCSRIND | Extensions::SSCSRIND)
            .build();
        hart.state.ctr.status = 3;
        hart.state.ctr.src[2] = 0xaaa;
        hart.state.ctr.src[0] = 0xbbb;
        hart.state.ctr.src[15] = 0xccc;

        hart.csr_write(csr_index::miselect, iselect::CTR_FIRST).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg).unwrap(), 0xaaa);
        hart.csr_write(csr_index::miselect, iselect::CTR_FIRST + 2).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg).unwrap(), 0xbbb);
        hart.csr_write(csr_index::miselect, iselect::CTR_FIRST + 3).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg).unwrap(), 0xccc);

        // Past the 16-entry depth: read-only zero.
        hart.csr_write(csr_index::miselect, iselect::CTR_FIRST + 16).unwrap();
        hart.csr_write(csr_index::mireg, 0x123).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg).unwrap(), 0);

        hart.csr_write(csr_index::miselect, iselect::CTR_FIRST).unwrap();
        hart.csr_write(csr_index::mireg3, !0).unwrap();
        assert_eq!(hart.state.ctr.data[2], ctr::DATA_MASK);
    }

    #[test]
    fn test_unselected_range_is_illegal() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SMCSRIND | Extensions::SMCTR | Extensions::SSCTR)
            .build();
        hart.csr_write(csr_index::miselect, 0x400).unwrap();
        assert_eq!(hart.csr_read(csr_index::mireg), Err(Exception::IllegalInstruction));
        assert_eq!(hart.csr_read(csr_index::mireg2), Err(Exception::IllegalInstruction));
    }
}
