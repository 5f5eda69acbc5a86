//! Control and status registers.
//!
//! Every implemented CSR is described by a [`CsrEntry`] in a [`CsrTable`]: a
//! name, an access predicate and the accessors. The table is built once from
//! the declarative list in [`csr_macro`] and shared between harts.

pub mod csr_macro;
pub mod fields;

mod aliasing;
mod counters;
mod hypervisor;
mod indirect;
mod machine;
mod predicate;
mod supervisor;
mod user;
mod write_validator;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    config::{Extensions, PrivVersion, arch_config::WordType},
    isa::riscv::{hart::Hart, state::HartState, trap::Exception},
};

pub(crate) use aliasing::{s_to_vs, vs_to_s};
pub(crate) use machine::ClicOffer;
pub use predicate::PredicateFn;
pub(crate) use write_validator::WriteValidator;

#[rustfmt::skip]
#[allow(non_upper_case_globals, unused)]
pub mod csr_index {
    // ===== U-Mode =====
    pub const fflags        : u16 = 0x001;
    pub const frm           : u16 = 0x002;
    pub const fcsr          : u16 = 0x003;
    pub const ssp           : u16 = 0x011;
    pub const seed          : u16 = 0x015;
    pub const cycle         : u16 = 0xc00;
    pub const time          : u16 = 0xc01;
    pub const instret       : u16 = 0xc02;
    pub const hpmcounter3   : u16 = 0xc03;
    pub const hpmcounter31  : u16 = 0xc1f;
    pub const cycleh        : u16 = 0xc80;
    pub const timeh         : u16 = 0xc81;
    pub const instreth      : u16 = 0xc82;
    pub const hpmcounter3h  : u16 = 0xc83;
    pub const hpmcounter31h : u16 = 0xc9f;

    // ===== S-Mode =====
    pub const sstatus       : u16 = 0x100;
    pub const sie           : u16 = 0x104;
    pub const stvec         : u16 = 0x105;
    pub const scounteren    : u16 = 0x106;
    pub const stvt          : u16 = 0x107;
    pub const senvcfg       : u16 = 0x10a;
    pub const sieh          : u16 = 0x114;
    pub const sscratch      : u16 = 0x140;
    pub const sepc          : u16 = 0x141;
    pub const scause        : u16 = 0x142;
    pub const stval         : u16 = 0x143;
    pub const sip           : u16 = 0x144;
    pub const snxti         : u16 = 0x145;
    pub const sintstatus    : u16 = 0x146;
    pub const sintthresh    : u16 = 0x147;
    pub const sctrctl       : u16 = 0x14e;
    pub const sctrstatus    : u16 = 0x14f;
    pub const siselect      : u16 = 0x150;
    pub const sireg         : u16 = 0x151;
    pub const sireg2        : u16 = 0x152;
    pub const sireg3        : u16 = 0x153;
    pub const siph          : u16 = 0x154;
    pub const sireg4        : u16 = 0x155;
    pub const sireg5        : u16 = 0x156;
    pub const sireg6        : u16 = 0x157;
    pub const stopei        : u16 = 0x15c;
    pub const sctrdepth     : u16 = 0x15f;
    pub const satp          : u16 = 0x180;
    pub const stopi         : u16 = 0xdb0;

    // ===== VS-Mode =====
    pub const vsstatus      : u16 = 0x200;
    pub const vsie          : u16 = 0x204;
    pub const vstvec        : u16 = 0x205;
    pub const vsieh         : u16 = 0x214;
    pub const vsscratch     : u16 = 0x240;
    pub const vsepc         : u16 = 0x241;
    pub const vscause       : u16 = 0x242;
    pub const vstval        : u16 = 0x243;
    pub const vsip          : u16 = 0x244;
    pub const vsctrctl      : u16 = 0x24e;
    pub const vsiselect     : u16 = 0x250;
    pub const vsireg        : u16 = 0x251;
    pub const vsireg2       : u16 = 0x252;
    pub const vsireg3       : u16 = 0x253;
    pub const vsiph         : u16 = 0x254;
    pub const vsireg4       : u16 = 0x255;
    pub const vsireg5       : u16 = 0x256;
    pub const vsireg6       : u16 = 0x257;
    pub const vstopei       : u16 = 0x25c;
    pub const vsatp         : u16 = 0x280;
    pub const vstopi        : u16 = 0xeb0;

    // ===== HS-Mode =====
    pub const hstatus       : u16 = 0x600;
    pub const hedeleg       : u16 = 0x602;
    pub const hideleg       : u16 = 0x603;
    pub const hie           : u16 = 0x604;
    pub const htimedelta    : u16 = 0x605;
    pub const hcounteren    : u16 = 0x606;
    pub const hgeie         : u16 = 0x607;
    pub const hvien         : u16 = 0x608;
    pub const hvictl        : u16 = 0x609;
    pub const henvcfg       : u16 = 0x60a;
    pub const hidelegh      : u16 = 0x613;
    pub const htimedeltah   : u16 = 0x615;
    pub const hvienh        : u16 = 0x618;
    pub const henvcfgh      : u16 = 0x61a;
    pub const htval         : u16 = 0x643;
    pub const hip           : u16 = 0x644;
    pub const hvip          : u16 = 0x645;
    pub const hviprio1      : u16 = 0x646;
    pub const hviprio2      : u16 = 0x647;
    pub const htinst        : u16 = 0x64a;
    pub const hviph         : u16 = 0x655;
    pub const hviprio1h     : u16 = 0x656;
    pub const hviprio2h     : u16 = 0x657;
    pub const hgatp         : u16 = 0x680;
    pub const hgeip         : u16 = 0xe12;

    // ===== M-Mode =====
    pub const mstatus       : u16 = 0x300;
    pub const misa          : u16 = 0x301;
    pub const medeleg       : u16 = 0x302;
    pub const mideleg       : u16 = 0x303;
    pub const mie           : u16 = 0x304;
    pub const mtvec         : u16 = 0x305;
    pub const mcounteren    : u16 = 0x306;
    pub const mtvt          : u16 = 0x307;
    pub const mvien         : u16 = 0x308;
    pub const mvip          : u16 = 0x309;
    pub const menvcfg       : u16 = 0x30a;
    pub const mstatush      : u16 = 0x310;
    pub const midelegh      : u16 = 0x313;
    pub const mieh          : u16 = 0x314;
    pub const mvienh        : u16 = 0x318;
    pub const mviph         : u16 = 0x319;
    pub const menvcfgh      : u16 = 0x31a;
    pub const mcountinhibit : u16 = 0x320;
    pub const mhpmevent3    : u16 = 0x323;
    pub const mhpmevent31   : u16 = 0x33f;
    pub const mscratch      : u16 = 0x340;
    pub const mepc          : u16 = 0x341;
    pub const mcause        : u16 = 0x342;
    pub const mtval         : u16 = 0x343;
    pub const mip           : u16 = 0x344;
    pub const mnxti         : u16 = 0x345;
    pub const mintstatus    : u16 = 0x346;
    pub const mintthresh    : u16 = 0x347;
    pub const mscratchcsw   : u16 = 0x348;
    pub const mscratchcsl   : u16 = 0x349;
    pub const mtinst        : u16 = 0x34a;
    pub const mtval2        : u16 = 0x34b;
    pub const mctrctl       : u16 = 0x34e;
    pub const miselect      : u16 = 0x350;
    pub const mireg         : u16 = 0x351;
    pub const mireg2        : u16 = 0x352;
    pub const mireg3        : u16 = 0x353;
    pub const miph          : u16 = 0x354;
    pub const mireg4        : u16 = 0x355;
    pub const mireg5        : u16 = 0x356;
    pub const mireg6        : u16 = 0x357;
    pub const mtopei        : u16 = 0x35c;
    pub const pmpcfg0       : u16 = 0x3a0;
    pub const pmpcfg15      : u16 = 0x3af;
    pub const pmpaddr0      : u16 = 0x3b0;
    pub const pmpaddr63     : u16 = 0x3ef;
    pub const mseccfg       : u16 = 0x747;
    pub const mseccfgh      : u16 = 0x757;
    pub const mcycle        : u16 = 0xb00;
    pub const minstret      : u16 = 0xb02;
    pub const mhpmcounter3  : u16 = 0xb03;
    pub const mhpmcounter31 : u16 = 0xb1f;
    pub const mcycleh       : u16 = 0xb80;
    pub const minstreth     : u16 = 0xb82;
    pub const mhpmcounter3h : u16 = 0xb83;
    pub const mhpmcounter31h: u16 = 0xb9f;
    pub const mttp          : u16 = 0xbc0;
    pub const mvendorid     : u16 = 0xf11;
    pub const marchid       : u16 = 0xf12;
    pub const mimpid        : u16 = 0xf13;
    pub const mhartid       : u16 = 0xf14;
    pub const mconfigptr    : u16 = 0xf15;
    pub const mtopi         : u16 = 0xfb0;
}

/// Number of addressable CSRs.
pub const CSR_TABLE_SIZE: usize = 4096;

#[repr(u8)]
#[derive(Debug, PartialEq, PartialOrd, Ord, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
pub enum PrivilegeLevel {
    U = 0,
    S = 1,
    M = 3,
}

impl PrivilegeLevel {
    /// Decode a 2-bit `xPP` field. The reserved encoding 2 has no mode.
    pub fn from_bits(bits: WordType) -> Option<Self> {
        Self::try_from(bits as u8).ok()
    }

    #[inline]
    pub fn bits(self) -> WordType {
        u8::from(self) as WordType
    }
}

/// Write `value` to the bits specified by `mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CsrWriteOp {
    mask: WordType,
}

impl CsrWriteOp {
    #[inline]
    pub(crate) fn new(mask: WordType) -> CsrWriteOp {
        CsrWriteOp { mask }
    }

    #[inline]
    pub(crate) fn new_write_all() -> CsrWriteOp {
        CsrWriteOp { mask: !0 }
    }

    #[inline]
    pub(crate) fn apply(&self, target: &mut WordType, value: WordType) {
        *target = self.get_new_value(*target, value);
    }

    #[inline]
    pub(crate) fn get_new_value(&self, old_value: WordType, value: WordType) -> WordType {
        (old_value & !self.mask) | (value & self.mask)
    }

    /// Merge two write operations into one.
    #[inline]
    pub(crate) fn merge(&self, rhs: &CsrWriteOp) -> CsrWriteOp {
        CsrWriteOp {
            mask: self.mask | rhs.mask,
        }
    }
}

pub type CsrResult<T> = Result<T, Exception>;

pub type FieldFn = fn(&mut HartState) -> &mut WordType;
pub type ReadFn = fn(&mut Hart, u16) -> CsrResult<WordType>;
pub type WriteFn = fn(&mut Hart, u16, WordType) -> CsrResult<()>;
/// `(hart, csrno, new_value, write_mask) -> old_value`
pub type RmwFn = fn(&mut Hart, u16, WordType, WordType) -> CsrResult<WordType>;

/// How a CSR is read and written.
#[derive(Clone, Copy)]
pub enum CsrOps {
    /// A register backed by one field of the register file. Writes go
    /// through `validator`, which selects the bits that may change.
    Plain {
        field: FieldFn,
        validator: WriteValidator,
    },
    /// A register computed from or aliased onto other state. A missing
    /// `write` silently drops writes.
    Computed {
        read: ReadFn,
        write: Option<WriteFn>,
    },
    /// A register whose read and write must happen as one operation.
    Rmw(RmwFn),
}

#[derive(Clone, Copy)]
pub struct CsrEntry {
    pub name: &'static str,
    pub predicate: PredicateFn,
    pub ops: CsrOps,
    pub min_priv_ver: PrivVersion,
}

/// Dispatch table indexed by CSR number.
pub struct CsrTable {
    entries: Vec<Option<CsrEntry>>,
}

impl Default for CsrTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrTable {
    pub fn new() -> Self {
        let mut table = Self::empty();
        csr_macro::register_all(&mut table);
        table
    }

    pub fn empty() -> Self {
        Self {
            entries: vec![None; CSR_TABLE_SIZE],
        }
    }

    pub fn register(&mut self, csrno: u16, entry: CsrEntry) {
        if let Some(slot) = self.entries.get_mut(csrno as usize) {
            *slot = Some(entry);
        }
    }

    #[inline]
    pub fn get(&self, csrno: u16) -> Option<&CsrEntry> {
        self.entries.get(csrno as usize)?.as_ref()
    }

    pub fn name(&self, csrno: u16) -> Option<&'static str> {
        self.get(csrno).map(|e| e.name)
    }

    /// Find a CSR number by name.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        if let Some(&csrno) = csr_macro::CSR_ADDRESS.get(name) {
            return Some(csrno);
        }
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.name == name))
            .map(|i| i as u16)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Hart {
    /// Read and/or update a CSR.
    ///
    /// `csrr` is `csrrw(csrno, 0, 0)`, `csrrw` is `csrrw(csrno, v, !0)`,
    /// `csrrs` is `csrrw(csrno, !0, v)` and `csrrc` is `csrrw(csrno, 0, v)`.
    pub fn csrrw(&mut self, csrno: u16, new_value: WordType, write_mask: WordType) -> CsrResult<WordType> {
        let entry = self.csrrw_check(csrno, write_mask != 0)?;
        let old = self.csrrw_do(entry, csrno, new_value, write_mask)?;
        Ok(old & self.cfg.mxl.mask())
    }

    #[inline]
    pub fn csr_read(&mut self, csrno: u16) -> CsrResult<WordType> {
        self.csrrw(csrno, 0, 0)
    }

    #[inline]
    pub fn csr_write(&mut self, csrno: u16, value: WordType) -> CsrResult<()> {
        self.csrrw(csrno, value, !0).map(|_| ())
    }

    /// `csrrw`: write `value` and return the previous contents.
    #[inline]
    pub fn csr_swap(&mut self, csrno: u16, value: WordType) -> CsrResult<WordType> {
        self.csrrw(csrno, value, !0)
    }

    /// Debugger access: skips the privilege check and the FS gate.
    pub fn csrrw_debug(&mut self, csrno: u16, new_value: WordType, write_mask: WordType) -> CsrResult<WordType> {
        let saved = self.debugger;
        self.debugger = true;
        let ret = self.csrrw(csrno, new_value, write_mask);
        self.debugger = saved;
        ret
    }

    fn csrrw_check(&self, csrno: u16, write: bool) -> CsrResult<CsrEntry> {
        if csrno as usize >= CSR_TABLE_SIZE || !self.has(Extensions::ZICSR) {
            return Err(Exception::IllegalInstruction);
        }
        let entry = *self
            .csrs
            .get(csrno)
            .ok_or(Exception::IllegalInstruction)?;

        if self.cfg.priv_ver < entry.min_priv_ver {
            return Err(Exception::IllegalInstruction);
        }
        let read_only = (csrno >> 10) & 0b11 == 0b11;
        if write && read_only {
            return Err(Exception::IllegalInstruction);
        }

        // Predicates may raise virtual instruction faults, so they run after
        // the read-only check.
        (entry.predicate)(self, csrno)?;

        let mut effective_priv = self.state.priv_level as u8;
        if self.misa_has(Extensions::H) && self.state.priv_level == PrivilegeLevel::S && !self.state.virt {
            // HS-mode reaches the hypervisor CSR block.
            effective_priv += 1;
        }
        let csr_priv = ((csrno >> 8) & 0b11) as u8;
        if !self.debugger && effective_priv < csr_priv {
            if csr_priv == PrivilegeLevel::S as u8 + 1 && self.state.virt {
                return Err(Exception::VirtualInstruction);
            }
            return Err(Exception::IllegalInstruction);
        }
        Ok(entry)
    }

    fn csrrw_do(&mut self, entry: CsrEntry, csrno: u16, new_value: WordType, write_mask: WordType) -> CsrResult<WordType> {
        match entry.ops {
            CsrOps::Rmw(op) => op(self, csrno, new_value, write_mask),
            CsrOps::Plain { field, validator } => {
                let old = *field(&mut self.state);
                if write_mask != 0 {
                    let value = (old & !write_mask) | (new_value & write_mask);
                    let op = validator(value, self);
                    op.apply(field(&mut self.state), value);
                }
                Ok(old)
            }
            CsrOps::Computed { read, write } => {
                let old = read(self, csrno)?;
                if write_mask != 0 {
                    let value = (old & !write_mask) | (new_value & write_mask);
                    if let Some(write) = write {
                        write(self, csrno, value)?;
                    }
                }
                Ok(old)
            }
        }
    }

    /// Switch privilege level and virtualization mode.
    ///
    /// Crossing the V boundary swaps the HS and VS supervisor registers.
    pub fn set_mode(&mut self, new_priv: PrivilegeLevel, virt: bool) {
        if new_priv != self.state.priv_level || virt != self.state.virt {
            log::debug!(
                "Privilege level change: {:?}{} -> {:?}{}",
                self.state.priv_level,
                if self.state.virt { "(V)" } else { "" },
                new_priv,
                if virt { "(V)" } else { "" },
            );
        }
        if new_priv != self.state.priv_level || virt != self.state.virt {
            self.flush_tlb();
        }
        if self.misa_has(Extensions::H) && virt != self.state.virt {
            let mask = self.bank_swap_mask();
            let st = &mut self.state;
            st.bank.swap(&mut st.mstatus, mask);
        }
        self.state.priv_level = new_priv;
        self.state.virt = virt && self.misa_has(Extensions::H);
    }

    /// `mstatus` fields that belong to the supervisor context running on
    /// the hart and move with the HS/VS swap.
    pub(crate) fn bank_swap_mask(&self) -> WordType {
        use fields::{envcfg, mstatus};
        let mut mask = mstatus::MXR
            | mstatus::SUM
            | mstatus::SPP
            | mstatus::SPIE
            | mstatus::SIE
            | mstatus::UXL
            | mstatus::VS;
        if self.misa_has(Extensions::F) {
            mask |= mstatus::FS;
        }
        if self.has(Extensions::ZICFILP) && self.state.henvcfg & envcfg::LPE != 0 {
            mask |= mstatus::SPELP;
        }
        // Leaving V consults menvcfg.DTE, entering it henvcfg.DTE.
        let dte = if self.state.virt {
            self.state.menvcfg
        } else {
            self.state.henvcfg
        };
        if self.has(Extensions::SSDBLTRP) && dte & envcfg::DTE != 0 {
            mask |= mstatus::SDT;
        }
        mask
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::riscv::hart_tester::TestHartBuilder;

    #[test]
    fn test_rw_by_addr() {
        let mut hart = TestHartBuilder::new().build();
        hart.csr_write(csr_index::mcause, 3).unwrap();
        hart.csr_write(csr_index::mepc, 0x1234_5678).unwrap();

        assert_eq!(hart.csr_read(csr_index::mcause).unwrap(), 3);
        assert_eq!(hart.csr_read(csr_index::mepc).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_read_privilege() {
        let mut hart = TestHartBuilder::new().build();
        assert!(hart.csr_write(csr_index::mcause, 0xFEFE).is_ok());

        hart.set_mode(PrivilegeLevel::S, false);
        assert_eq!(
            hart.csr_write(csr_index::mcause, 0xFEFE),
            Err(Exception::IllegalInstruction)
        );
        assert_eq!(
            hart.csrrw_debug(csr_index::mcause, 0, 0).unwrap(),
            0xFEFE
        );
    }

    #[test]
    fn test_unpopulated_csr_is_illegal() {
        let mut hart = TestHartBuilder::new().build();
        for csrno in [0x0ffu16, 0x3ff, 0x7c5, 0xfff] {
            assert_eq!(hart.csr_read(csrno), Err(Exception::IllegalInstruction));
            assert_eq!(hart.csr_write(csrno, 1), Err(Exception::IllegalInstruction));
        }
    }

    #[test]
    fn test_read_only_write_is_illegal() {
        let mut hart = TestHartBuilder::new().build();
        assert_eq!(hart.csr_read(csr_index::mhartid).unwrap(), 0);
        assert_eq!(
            hart.csr_write(csr_index::mhartid, 1),
            Err(Exception::IllegalInstruction)
        );
        // csrrs with x0 does not write.
        assert!(hart.csrrw(csr_index::mhartid, !0, 0).is_ok());
    }

    #[test]
    fn test_hypervisor_csr_from_vs_is_virtual_fault() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.set_mode(PrivilegeLevel::S, false);
        assert!(hart.csr_read(csr_index::hstatus).is_ok());

        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(
            hart.csr_read(csr_index::hstatus),
            Err(Exception::VirtualInstruction)
        );
        hart.set_mode(PrivilegeLevel::U, false);
        assert_eq!(
            hart.csr_read(csr_index::hstatus),
            Err(Exception::IllegalInstruction)
        );
    }

    #[test]
    fn test_min_priv_version() {
        let mut hart = TestHartBuilder::new()
            .priv_version(PrivVersion::V1_11)
            .build();
        assert_eq!(
            hart.csr_read(csr_index::mconfigptr),
            Err(Exception::IllegalInstruction)
        );
        let mut hart = TestHartBuilder::new().build();
        assert_eq!(hart.csr_read(csr_index::mconfigptr), Ok(0));
    }

    #[test]
    fn test_lookup_by_name() {
        let table = CsrTable::new();
        assert_eq!(table.lookup("mstatus"), Some(csr_index::mstatus));
        assert_eq!(table.lookup("pmpaddr3"), Some(csr_index::pmpaddr0 + 3));
        assert_eq!(table.name(csr_index::vsatp), Some("vsatp"));
        assert_eq!(table.lookup("nonexistent"), None);
    }

    #[test]
    fn test_set_mode_swaps_supervisor_bank() {
        let mut hart = TestHartBuilder::new().with(Extensions::H).build();
        hart.csr_write(csr_index::stvec, 0x1000).unwrap();
        hart.csr_write(csr_index::vstvec, 0x2000).unwrap();

        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.state.bank.live.tvec, 0x2000);
        assert_eq!(hart.state.bank.parked.tvec, 0x1000);

        hart.set_mode(PrivilegeLevel::M, false);
        assert_eq!(hart.csr_read(csr_index::stvec).unwrap(), 0x1000);
        assert_eq!(hart.csr_read(csr_index::vstvec).unwrap(), 0x2000);
    }

    #[test]
    fn test_bank_swap_follows_envcfg_enables() {
        use fields::{envcfg, mstatus};
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H | Extensions::ZICFILP | Extensions::SSDBLTRP)
            .build();
        hart.state.mstatus |= mstatus::SPELP | mstatus::SDT;

        // Neither henvcfg.LPE nor henvcfg.DTE: both bits stay with the host.
        hart.set_mode(PrivilegeLevel::S, true);
        assert_ne!(hart.state.mstatus & mstatus::SPELP, 0);
        assert_ne!(hart.state.mstatus & mstatus::SDT, 0);
        hart.set_mode(PrivilegeLevel::M, false);

        hart.state.henvcfg |= envcfg::LPE | envcfg::DTE;
        hart.set_mode(PrivilegeLevel::S, true);
        assert_eq!(hart.state.mstatus & (mstatus::SPELP | mstatus::SDT), 0);
        assert_ne!(hart.state.bank.parked_status & mstatus::SPELP, 0);
        assert_ne!(hart.state.bank.parked_status & mstatus::SDT, 0);

        // Leaving V, SDT moves only under menvcfg.DTE.
        hart.state.mstatus |= mstatus::SDT;
        hart.set_mode(PrivilegeLevel::M, false);
        assert_ne!(hart.state.mstatus & mstatus::SPELP, 0);
        assert_ne!(hart.state.mstatus & mstatus::SDT, 0);
    }
}
