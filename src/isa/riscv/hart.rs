use std::sync::Arc;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

use crate::{
    config::{Extensions, HartConfig, ram_config::DEFAULT_PC_VALUE},
    device::{ClicController, EntropySource, ImsicFile, Mem, TimeSource, TlbSink},
    isa::riscv::{
        csr_reg::{
            CsrTable, PrivilegeLevel,
            fields::{envcfg, hstatus, mip, mstatus},
        },
        state::{HartState, IrqLines},
    },
    utils::set_field,
};

/// Deterministic entropy used when no physical source is attached.
pub struct ChaChaEntropy(ChaCha12Rng);

impl ChaChaEntropy {
    pub fn new(seed: u64) -> Self {
        Self(ChaCha12Rng::seed_from_u64(seed))
    }
}

impl EntropySource for ChaChaEntropy {
    fn next_u16(&mut self) -> Option<u16> {
        Some(self.0.next_u32() as u16)
    }
}

/// One RISC-V hart: configuration, register file and the collaborators the
/// privileged core talks to.
pub struct Hart {
    pub cfg: HartConfig,
    pub state: HartState,
    /// Interrupt lines, shared with device models.
    pub lines: Arc<IrqLines>,
    pub mem: Arc<dyn Mem>,
    pub(crate) csrs: Arc<CsrTable>,
    pub(crate) imsic: Option<Box<dyn ImsicFile>>,
    pub(crate) clic: Option<Box<dyn ClicController>>,
    pub(crate) entropy: Box<dyn EntropySource>,
    pub(crate) tlb: Option<Box<dyn TlbSink>>,
    pub(crate) timer: Option<Box<dyn TimeSource>>,
    /// Set while a debugger access is in flight. Bypasses privilege checks.
    pub(crate) debugger: bool,
}

impl Hart {
    pub fn new(cfg: HartConfig, mem: Arc<dyn Mem>) -> Self {
        Self::with_csr_table(cfg, mem, Arc::new(CsrTable::new()))
    }

    /// Build a hart sharing an already constructed CSR table.
    pub fn with_csr_table(cfg: HartConfig, mem: Arc<dyn Mem>, csrs: Arc<CsrTable>) -> Self {
        let entropy = Box::new(ChaChaEntropy::new(cfg.entropy_seed));
        let mut hart = Self {
            state: HartState::new(DEFAULT_PC_VALUE),
            cfg,
            lines: Arc::new(IrqLines::new()),
            mem,
            csrs,
            imsic: None,
            clic: None,
            entropy,
            tlb: None,
            timer: None,
            debugger: false,
        };
        hart.reset();
        hart
    }

    pub fn attach_imsic(&mut self, imsic: Box<dyn ImsicFile>) {
        self.imsic = Some(imsic);
    }

    pub fn attach_clic(&mut self, clic: Box<dyn ClicController>) {
        self.clic = Some(clic);
    }

    pub fn attach_entropy(&mut self, entropy: Box<dyn EntropySource>) {
        self.entropy = entropy;
    }

    pub fn attach_tlb(&mut self, tlb: Box<dyn TlbSink>) {
        self.tlb = Some(tlb);
    }

    /// Without a timer the `time` CSRs do not exist.
    pub fn attach_timer(&mut self, timer: Box<dyn TimeSource>) {
        self.timer = Some(timer);
    }

    pub fn csr_table(&self) -> &Arc<CsrTable> {
        &self.csrs
    }

    #[inline]
    pub fn has(&self, ext: Extensions) -> bool {
        self.cfg.has(ext)
    }

    /// Extension present in the configuration and enabled in `misa`.
    #[inline]
    pub fn misa_has(&self, ext: Extensions) -> bool {
        self.cfg.has(ext) && self.state.misa_ext & ext.misa_bits() != 0
    }

    #[inline]
    pub fn xlen(&self) -> u32 {
        self.cfg.xlen()
    }

    #[inline]
    pub fn priv_level(&self) -> PrivilegeLevel {
        self.state.priv_level
    }

    #[inline]
    pub fn virt(&self) -> bool {
        self.state.virt
    }

    /// CLIC delivery is active for the current privilege level.
    pub fn clic_mode(&self) -> bool {
        if !self.cfg.is_clic() {
            return false;
        }
        let tvec = if self.state.priv_level == PrivilegeLevel::M {
            self.state.mtvec
        } else {
            self.state.bank.live.tvec
        };
        tvec & 0b11 == 0b11
    }

    pub(crate) fn flush_tlb(&mut self) {
        if let Some(tlb) = self.tlb.as_mut() {
            tlb.flush();
        }
    }

    /// Power-on reset of the privileged state.
    pub fn reset(&mut self) {
        let rv64 = !self.cfg.is_rv32();
        let mut st = HartState::new(DEFAULT_PC_VALUE);

        st.misa_ext = self.cfg.ext.misa_bits();
        if self.has(Extensions::SMDBLTRP) {
            st.mstatus |= mstatus::MDT;
        }
        if rv64 {
            if self.has(Extensions::S) {
                st.mstatus = set_field(st.mstatus, mstatus::SXL, 2);
            }
            if self.has(Extensions::U) {
                st.mstatus = set_field(st.mstatus, mstatus::UXL, 2);
            }
        }
        if self.has(Extensions::H) {
            st.mideleg = mip::HS_MODE_INTERRUPTS;
            if rv64 {
                st.hstatus = set_field(st.hstatus, hstatus::VSXL, 2);
                // VS-mode view of sstatus.UXL
                st.bank.parked_status = set_field(0, mstatus::UXL, 2);
            }
        }
        if self.has(Extensions::SVPBMT) {
            st.menvcfg |= envcfg::PBMTE;
        }
        if self.has(Extensions::SVADU) && !self.has(Extensions::SVADE) {
            st.menvcfg |= envcfg::ADUE;
        }
        st.pmp.set_regions(self.cfg.pmp_regions);

        log::debug!("Hart {} reset, pc = {:#x}", self.cfg.hart_id, st.pc);
        self.state = st;
        self.lines.update(|l| *l = Default::default());
        self.flush_tlb();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::Mxl, ram::Ram};

    fn hart(ext: Extensions) -> Hart {
        let cfg = HartConfig::builder(Mxl::Rv64).with(ext).build().unwrap();
        Hart::new(cfg, Arc::new(Ram::with_range(DEFAULT_PC_VALUE, 0x1000)))
    }

    #[test]
    fn test_reset_state() {
        let h = hart(Extensions::H | Extensions::SMDBLTRP);
        assert_eq!(h.priv_level(), PrivilegeLevel::M);
        assert!(!h.virt());
        assert_eq!(h.state.mideleg, mip::HS_MODE_INTERRUPTS);
        assert_ne!(h.state.mstatus & mstatus::MDT, 0);
        assert_eq!(h.state.hstatus & hstatus::VSXL, 2 << 32);
        assert_eq!(h.state.pc, DEFAULT_PC_VALUE);
    }

    #[test]
    fn test_chacha_entropy_is_deterministic() {
        let mut a = ChaChaEntropy::new(721);
        let mut b = ChaChaEntropy::new(721);
        for _ in 0..8 {
            assert_eq!(a.next_u16(), b.next_u16());
        }
    }
}
