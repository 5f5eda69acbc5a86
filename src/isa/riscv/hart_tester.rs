#![cfg(test)]
use std::sync::Arc;

use crate::{
    config::{Extensions, HartConfig, HartConfigBuilder, InterruptModel, Mxl, PrivVersion, arch_config::WordType},
    isa::riscv::{csr_reg::PrivilegeLevel, hart::Hart},
    ram::Ram,
};

pub(crate) const TEST_RAM_BASE: WordType = 0x8000_0000;
pub(crate) const TEST_RAM_SIZE: usize = 8 << 20;

pub(crate) struct TestHartBuilder {
    cfg: HartConfigBuilder,
    mode: (PrivilegeLevel, bool),
}

impl TestHartBuilder {
    /// RV64 hart with S, U and Zicsr, no PMP and the legacy interrupt model.
    pub(crate) fn new() -> Self {
        Self::with_mxl(Mxl::Rv64)
    }

    pub(crate) fn rv32() -> Self {
        Self::with_mxl(Mxl::Rv32)
    }

    fn with_mxl(mxl: Mxl) -> Self {
        Self {
            cfg: HartConfig::builder(mxl)
                .extensions(Extensions::I | Extensions::S | Extensions::U | Extensions::ZICSR)
                .pmp_regions(0)
                .interrupt_model(InterruptModel::Clint),
            mode: (PrivilegeLevel::M, false),
        }
    }

    pub(crate) fn with(mut self, ext: Extensions) -> Self {
        self.cfg = self.cfg.with(ext);
        self
    }

    pub(crate) fn without(mut self, ext: Extensions) -> Self {
        self.cfg = self.cfg.without(ext);
        self
    }

    pub(crate) fn priv_version(mut self, ver: PrivVersion) -> Self {
        self.cfg = self.cfg.priv_version(ver);
        self
    }

    pub(crate) fn misa_writable(mut self, writable: bool) -> Self {
        self.cfg = self.cfg.misa_writable(writable);
        self
    }

    pub(crate) fn interrupt_model(mut self, model: InterruptModel) -> Self {
        self.cfg = self.cfg.interrupt_model(model);
        self
    }

    pub(crate) fn geilen(mut self, n: u8) -> Self {
        self.cfg = self.cfg.geilen(n);
        self
    }

    pub(crate) fn pmp_regions(mut self, n: u8) -> Self {
        self.cfg = self.cfg.pmp_regions(n);
        self
    }

    pub(crate) fn pmu_mask(mut self, mask: u32) -> Self {
        self.cfg = self.cfg.pmu_mask(mask);
        self
    }

    /// Privilege level and virtualization mode the hart starts in.
    pub(crate) fn mode(mut self, level: PrivilegeLevel, virt: bool) -> Self {
        self.mode = (level, virt);
        self
    }

    pub(crate) fn build(self) -> Hart {
        let cfg = self.cfg.build().unwrap();
        let ram = Arc::new(Ram::with_range(TEST_RAM_BASE, TEST_RAM_SIZE));
        let mut hart = Hart::new(cfg, ram);
        let (level, virt) = self.mode;
        hart.set_mode(level, virt);
        hart
    }
}

pub(crate) struct HartChecker<'a> {
    pub(crate) hart: &'a mut Hart,
}

impl<'a> HartChecker<'a> {
    pub(crate) fn new(hart: &'a mut Hart) -> Self {
        Self { hart }
    }

    pub(crate) fn mode(self, level: PrivilegeLevel, virt: bool) -> Self {
        assert_eq!(
            (self.hart.priv_level(), self.hart.virt()),
            (level, virt),
            "Privilege mode incorrect"
        );
        self
    }

    pub(crate) fn pc(self, value: WordType) -> Self {
        assert_eq!(self.hart.state.pc, value, "PC incorrect");
        self
    }

    /// Compare a CSR, read through the debugger path.
    pub(crate) fn csr(self, name: &str, value: WordType) -> Self {
        let csrno = self
            .hart
            .csr_table()
            .lookup(name)
            .unwrap_or_else(|| panic!("Unknown CSR {name}"));
        let actual = self.hart.csrrw_debug(csrno, 0, 0).unwrap();
        assert_eq!(actual, value, "CSR {name} incorrect");
        self
    }

    /// Compare the `mstatus` bits selected by `mask`.
    pub(crate) fn mstatus(self, mask: WordType, expected: WordType) -> Self {
        assert_eq!(
            self.hart.state.mstatus & mask,
            expected,
            "mstatus bits {mask:#x} incorrect"
        );
        self
    }

    pub(crate) fn customized<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }
}
