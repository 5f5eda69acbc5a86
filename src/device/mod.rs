use thiserror::Error;

use crate::{config::arch_config::WordType, utils::UnsignedInteger};

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum MemError {
    #[error("misaligned load")]
    LoadMisaligned,
    #[error("load access fault")]
    LoadFault,
    #[error("misaligned store")]
    StoreMisaligned,
    #[error("store access fault")]
    StoreFault,
    #[error("atomic update is not supported by this region")]
    AtomicUnsupported,
}

/// Physical memory as seen by the privileged core.
///
/// Accesses take `&self` so one backing store can be shared between harts;
/// implementations provide their own interior synchronization.
pub trait Mem: Send + Sync {
    fn load(&self, addr: WordType, size: usize) -> Result<u64, MemError>;

    fn store(&self, addr: WordType, size: usize, data: u64) -> Result<(), MemError>;

    /// Atomically replace `current` with `new`.
    ///
    /// Returns `Ok(Ok(current))` on success and `Ok(Err(actual))` when the
    /// location no longer holds `current`.
    fn compare_exchange(
        &self,
        _addr: WordType,
        _size: usize,
        _current: u64,
        _new: u64,
    ) -> Result<Result<u64, u64>, MemError> {
        Err(MemError::AtomicUnsupported)
    }
}

impl dyn Mem + '_ {
    pub fn read<T>(&self, addr: WordType) -> Result<T, MemError>
    where
        T: UnsignedInteger,
    {
        self.load(addr, T::BITS / 8).map(T::truncate_from)
    }

    pub fn write<T>(&self, addr: WordType, data: T) -> Result<(), MemError>
    where
        T: UnsignedInteger,
    {
        self.store(addr, T::BITS / 8, data.into())
    }
}

/// Register selector handed to an IMSIC interrupt file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImsicReg {
    /// Target privilege of the file, `3` for M and `1` for S/VS.
    pub priv_level: u8,
    pub virt: bool,
    /// Guest interrupt file number, meaningful when `virt` is set.
    pub vgein: u32,
    /// Indirect register number (`*iselect` value).
    pub isel: WordType,
    pub xlen: u32,
}

/// Incoming MSI controller attached to a hart.
pub trait ImsicFile: Send {
    /// Read-modify-write one register. `None` means the register does not exist.
    fn rmw(&mut self, reg: ImsicReg, new: WordType, wr_mask: WordType) -> Option<WordType>;
}

/// Core-local interrupt controller used in CLIC mode.
pub trait ClicController: Send {
    fn is_shv(&self, irq: u32) -> bool;
    fn is_edge_triggered(&self, irq: u32) -> bool;
    fn clean_pending(&mut self, irq: u32);
}

/// Physical entropy source behind the `seed` CSR.
pub trait EntropySource: Send {
    /// `None` reports a dead source.
    fn next_u16(&mut self) -> Option<u16>;
}

/// Platform timer read by the `time` CSR.
pub trait TimeSource: Send {
    fn mtime(&self) -> u64;
}

/// Software TLB of the execution layer.
pub trait TlbSink: Send {
    fn insert(
        &mut self,
        vaddr_page: WordType,
        paddr_page: WordType,
        prot: u8,
        mmu_idx: u32,
        size: WordType,
    );
    fn flush(&mut self);
}
