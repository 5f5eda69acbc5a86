use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

pub mod arch_config {
    /// Widest register the core models. RV32 harts mask down to [`super::Mxl::mask`].
    pub type WordType = u64;
}

pub mod ram_config {
    use crate::config::arch_config::WordType;
    pub const BASE_ADDR: WordType = 0x8000_0000;
    pub const DEFAULT_PC_VALUE: WordType = BASE_ADDR;

    pub const SIZE: usize = 0x800_0000;
}

pub mod mmu_config {
    use crate::config::arch_config::WordType;

    pub const PAGE_SHIFT: u32 = 12;
    pub const PAGE_SIZE: WordType = 1 << PAGE_SHIFT;
    pub const PTE_PPN_SHIFT: u32 = 10;
    pub const PTE_PPN_MASK: WordType = 0x003F_FFFF_FFFF_FC00;
    pub const PTE_PBMT: WordType = 0x6000_0000_0000_0000;
    pub const PTE_N: WordType = 0x8000_0000_0000_0000;
    pub const PTE_RESERVED: WordType = 0x1FC0_0000_0000_0000;
    pub const PTE_ATTR: WordType = PTE_N | PTE_PBMT;
}

use arch_config::WordType;

/// Machine XLEN, as encoded in `misa.MXL`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Mxl {
    Rv32 = 1,
    Rv64 = 2,
}

impl Mxl {
    pub const fn xlen(self) -> u32 {
        match self {
            Mxl::Rv32 => 32,
            Mxl::Rv64 => 64,
        }
    }

    pub const fn mask(self) -> WordType {
        match self {
            Mxl::Rv32 => u32::MAX as WordType,
            Mxl::Rv64 => WordType::MAX,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Extensions: u64 {
        const I         = 1 << 0;
        const M         = 1 << 1;
        const A         = 1 << 2;
        const F         = 1 << 3;
        const D         = 1 << 4;
        const C         = 1 << 5;
        const V         = 1 << 6;
        const S         = 1 << 7;
        const U         = 1 << 8;
        const H         = 1 << 9;
        const ZICSR     = 1 << 10;
        const SMAIA     = 1 << 11;
        const SSAIA     = 1 << 12;
        const SMCSRIND  = 1 << 13;
        const SSCSRIND  = 1 << 14;
        const SMCTR     = 1 << 15;
        const SSCTR     = 1 << 16;
        const SSDBLTRP  = 1 << 17;
        const SMDBLTRP  = 1 << 18;
        const ZICFISS   = 1 << 19;
        const ZICFILP   = 1 << 20;
        const SVNAPOT   = 1 << 21;
        const SVPBMT    = 1 << 22;
        const SVADU     = 1 << 23;
        const SVADE     = 1 << 24;
        const SMMTT     = 1 << 25;
        const SMEPMP    = 1 << 26;
        const ZKR       = 1 << 27;
        const SMMPM     = 1 << 28;
        const SMSDID    = 1 << 29;
        const ZICNTR    = 1 << 30;
        const ZIHPM     = 1 << 31;
    }
}

impl Extensions {
    /// The single-letter subset, laid out as `misa` bits.
    pub fn misa_bits(self) -> WordType {
        const LETTERS: &[(Extensions, char)] = &[
            (Extensions::A, 'A'),
            (Extensions::C, 'C'),
            (Extensions::D, 'D'),
            (Extensions::F, 'F'),
            (Extensions::H, 'H'),
            (Extensions::I, 'I'),
            (Extensions::M, 'M'),
            (Extensions::S, 'S'),
            (Extensions::U, 'U'),
            (Extensions::V, 'V'),
        ];
        LETTERS
            .iter()
            .filter(|(ext, _)| self.contains(*ext))
            .fold(0, |acc, (_, letter)| {
                acc | 1 << (*letter as u32 - 'A' as u32)
            })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivVersion {
    V1_10,
    V1_11,
    V1_12,
    V1_13,
}

/// Interrupt delivery model, fixed for the lifetime of a hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptModel {
    /// Legacy `mip`/`mie` resolution with lowest-number-wins priority.
    Clint,
    /// Legacy resolution plus configurable AIA priorities (`Smaia`/`Ssaia`).
    Aia,
    /// CLIC delivery. `clint_compat` keeps the `xip`/`xie` path live.
    Clic { clint_compat: bool },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("extension {ext} requires {requires}")]
    MissingDependency {
        ext: &'static str,
        requires: &'static str,
    },
    #[error("{0:?} interrupt model is incompatible with the selected extensions")]
    InterruptModel(InterruptModel),
    #[error("at most 64 PMP regions are supported, got {0}")]
    PmpRegions(u8),
    #[error("guest external interrupt count {0} exceeds XLEN - 1")]
    Geilen(u8),
    #[error("translation mode {0} is not defined for this XLEN")]
    VmMode(u8),
    #[error("hpm counter mask {0:#x} names a fixed counter")]
    PmuMask(u32),
}

/// Immutable per-hart configuration.
#[derive(Debug, Clone)]
pub struct HartConfig {
    pub mxl: Mxl,
    pub ext: Extensions,
    pub priv_ver: PrivVersion,
    pub hart_id: WordType,
    pub mvendorid: WordType,
    pub marchid: WordType,
    pub mimpid: WordType,
    pub pmp_regions: u8,
    /// Implemented `mhpmcounter3..31`, one bit per counter number.
    pub pmu_mask: u32,
    pub geilen: u8,
    pub misa_writable: bool,
    pub mmu: bool,
    pub interrupt_model: InterruptModel,
    /// Bitmap of supported `satp.MODE` values.
    pub satp_modes: u16,
    pub entropy_seed: u64,
}

impl HartConfig {
    pub fn builder(mxl: Mxl) -> HartConfigBuilder {
        HartConfigBuilder::new(mxl)
    }

    #[inline]
    pub fn has(&self, ext: Extensions) -> bool {
        self.ext.contains(ext)
    }

    #[inline]
    pub fn xlen(&self) -> u32 {
        self.mxl.xlen()
    }

    #[inline]
    pub fn is_rv32(&self) -> bool {
        self.mxl == Mxl::Rv32
    }

    pub fn is_clic(&self) -> bool {
        matches!(self.interrupt_model, InterruptModel::Clic { .. })
    }

    pub fn clint_clic(&self) -> bool {
        matches!(
            self.interrupt_model,
            InterruptModel::Clic { clint_compat: true }
        )
    }

    /// Programmable counters visible to software.
    #[inline]
    pub fn pmu_avail(&self) -> u32 {
        if self.has(Extensions::ZIHPM) { self.pmu_mask } else { 0 }
    }

    pub fn valid_vm(&self, mode: WordType) -> bool {
        mode < 16 && self.satp_modes & (1 << mode) != 0
    }
}

pub struct HartConfigBuilder {
    cfg: HartConfig,
    max_vm: Option<u8>,
}

impl HartConfigBuilder {
    fn new(mxl: Mxl) -> Self {
        Self {
            cfg: HartConfig {
                mxl,
                ext: Extensions::I
                    | Extensions::M
                    | Extensions::A
                    | Extensions::S
                    | Extensions::U
                    | Extensions::ZICSR
                    | Extensions::ZICNTR
                    | Extensions::ZIHPM,
                priv_ver: PrivVersion::V1_13,
                hart_id: 0,
                mvendorid: 0,
                marchid: 0,
                mimpid: 0,
                pmp_regions: 16,
                pmu_mask: 0xffff << 3,
                geilen: 0,
                misa_writable: false,
                mmu: true,
                interrupt_model: InterruptModel::Clint,
                satp_modes: 0,
                entropy_seed: 0x5eed,
            },
            max_vm: None,
        }
    }

    pub fn extensions(mut self, ext: Extensions) -> Self {
        self.cfg.ext = ext;
        self
    }

    pub fn with(mut self, ext: Extensions) -> Self {
        self.cfg.ext |= ext;
        self
    }

    pub fn without(mut self, ext: Extensions) -> Self {
        self.cfg.ext -= ext;
        self
    }

    pub fn priv_version(mut self, ver: PrivVersion) -> Self {
        self.cfg.priv_ver = ver;
        self
    }

    pub fn hart_id(mut self, id: WordType) -> Self {
        self.cfg.hart_id = id;
        self
    }

    pub fn vendor(mut self, mvendorid: WordType, marchid: WordType, mimpid: WordType) -> Self {
        self.cfg.mvendorid = mvendorid;
        self.cfg.marchid = marchid;
        self.cfg.mimpid = mimpid;
        self
    }

    pub fn pmp_regions(mut self, n: u8) -> Self {
        self.cfg.pmp_regions = n;
        self
    }

    pub fn pmu_mask(mut self, mask: u32) -> Self {
        self.cfg.pmu_mask = mask;
        self
    }

    pub fn geilen(mut self, n: u8) -> Self {
        self.cfg.geilen = n;
        self
    }

    pub fn misa_writable(mut self, writable: bool) -> Self {
        self.cfg.misa_writable = writable;
        self
    }

    pub fn mmu(mut self, enabled: bool) -> Self {
        self.cfg.mmu = enabled;
        self
    }

    pub fn interrupt_model(mut self, model: InterruptModel) -> Self {
        self.cfg.interrupt_model = model;
        self
    }

    /// Widest translation mode the hart implements (e.g. 9 for Sv48).
    pub fn max_vm_mode(mut self, mode: u8) -> Self {
        self.max_vm = Some(mode);
        self
    }

    pub fn entropy_seed(mut self, seed: u64) -> Self {
        self.cfg.entropy_seed = seed;
        self
    }

    pub fn build(mut self) -> Result<HartConfig, ConfigError> {
        let ext = self.cfg.ext;
        const DEPENDENCIES: &[(Extensions, Extensions, &str, &str)] = &[
            (Extensions::H, Extensions::S, "H", "S"),
            (Extensions::S, Extensions::U, "S", "U"),
            (Extensions::D, Extensions::F, "D", "F"),
            (Extensions::SSAIA, Extensions::S, "Ssaia", "S"),
            (Extensions::SSCSRIND, Extensions::S, "Sscsrind", "S"),
            (Extensions::SMCTR, Extensions::SSCTR, "Smctr", "Ssctr"),
            (Extensions::SSCTR, Extensions::S, "Ssctr", "S"),
            (Extensions::SSDBLTRP, Extensions::S, "Ssdbltrp", "S"),
            (Extensions::ZICFISS, Extensions::ZICSR, "Zicfiss", "Zicsr"),
        ];
        for (e, req, name, req_name) in DEPENDENCIES {
            if ext.contains(*e) && !ext.contains(*req) {
                return Err(ConfigError::MissingDependency {
                    ext: name,
                    requires: req_name,
                });
            }
        }

        let aia = ext.intersects(Extensions::SMAIA | Extensions::SSAIA);
        match self.cfg.interrupt_model {
            InterruptModel::Clint if aia => {
                self.cfg.interrupt_model = InterruptModel::Aia;
            }
            InterruptModel::Aia if !ext.contains(Extensions::SMAIA) => {
                return Err(ConfigError::InterruptModel(InterruptModel::Aia));
            }
            m @ InterruptModel::Clic { .. } if aia => {
                return Err(ConfigError::InterruptModel(m));
            }
            _ => {}
        }

        if self.cfg.pmp_regions > 64 {
            return Err(ConfigError::PmpRegions(self.cfg.pmp_regions));
        }
        if self.cfg.pmu_mask & 0b111 != 0 {
            return Err(ConfigError::PmuMask(self.cfg.pmu_mask));
        }
        if self.cfg.geilen as u32 >= self.cfg.mxl.xlen() {
            return Err(ConfigError::Geilen(self.cfg.geilen));
        }

        let (all, default_max): (&[u8], u8) = match self.cfg.mxl {
            Mxl::Rv32 => (&[0, 1], 1),
            Mxl::Rv64 => (&[0, 8, 9, 10], 10),
        };
        let max = self.max_vm.unwrap_or(default_max);
        if !all.contains(&max) {
            return Err(ConfigError::VmMode(max));
        }
        self.cfg.satp_modes = all
            .iter()
            .filter(|&&m| m <= max)
            .fold(0, |acc, &m| acc | 1 << m);

        Ok(self.cfg)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_misa_bits() {
        let ext = Extensions::I | Extensions::M | Extensions::S | Extensions::U | Extensions::H;
        let bits = ext.misa_bits();
        assert_eq!(bits, (1 << 8) | (1 << 12) | (1 << 18) | (1 << 20) | (1 << 7));
    }

    #[test]
    fn test_builder_rejects_missing_dependency() {
        let err = HartConfig::builder(Mxl::Rv64)
            .without(Extensions::S)
            .with(Extensions::H)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingDependency {
                ext: "H",
                requires: "S"
            }
        );
    }

    #[test]
    fn test_builder_selects_aia_model() {
        let cfg = HartConfig::builder(Mxl::Rv64)
            .with(Extensions::SMAIA | Extensions::SSAIA)
            .build()
            .unwrap();
        assert_eq!(cfg.interrupt_model, InterruptModel::Aia);

        let err = HartConfig::builder(Mxl::Rv64)
            .with(Extensions::SMAIA)
            .interrupt_model(InterruptModel::Clic {
                clint_compat: false,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InterruptModel(_)));
    }

    #[test]
    fn test_satp_modes() {
        let cfg = HartConfig::builder(Mxl::Rv64).max_vm_mode(9).build().unwrap();
        assert!(cfg.valid_vm(0));
        assert!(cfg.valid_vm(8));
        assert!(cfg.valid_vm(9));
        assert!(!cfg.valid_vm(10));
        assert!(!cfg.valid_vm(1));

        let cfg = HartConfig::builder(Mxl::Rv32).build().unwrap();
        assert!(cfg.valid_vm(1));
        assert!(!cfg.valid_vm(8));

        assert_eq!(
            HartConfig::builder(Mxl::Rv32).max_vm_mode(8).build().unwrap_err(),
            ConfigError::VmMode(8)
        );
    }

    #[test]
    fn test_pmu_mask() {
        let cfg = HartConfig::builder(Mxl::Rv64).build().unwrap();
        assert_eq!(cfg.pmu_avail(), 0x7fff8);

        let cfg = HartConfig::builder(Mxl::Rv64)
            .without(Extensions::ZIHPM)
            .build()
            .unwrap();
        assert_eq!(cfg.pmu_avail(), 0);

        assert_eq!(
            HartConfig::builder(Mxl::Rv64).pmu_mask(0b101).build().unwrap_err(),
            ConfigError::PmuMask(0b101)
        );
    }
}
