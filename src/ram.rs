use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    config::arch_config::WordType,
    device::{Mem, MemError},
    ram_config,
};

/// Guest RAM backed by 64-bit atomic cells, so page-table updates from
/// several harts can use compare-and-swap on the same words.
pub struct Ram {
    base: WordType,
    data: Box<[AtomicU64]>,
}

impl Ram {
    pub fn new() -> Self {
        Self::with_range(ram_config::BASE_ADDR, ram_config::SIZE)
    }

    pub fn with_range(base: WordType, size: usize) -> Self {
        let words = size.div_ceil(8);
        Self {
            base,
            data: (0..words).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn base(&self) -> WordType {
        self.base
    }

    pub fn size(&self) -> usize {
        self.data.len() * 8
    }

    pub fn insert_section(&self, section: &[u8], start_addr: WordType) -> Result<(), MemError> {
        for (offset, byte) in section.iter().enumerate() {
            self.store(start_addr + offset as WordType, 1, *byte as u64)?;
        }
        Ok(())
    }

    /// Locate the cell holding `addr` and the bit shift of the access inside it.
    fn locate(&self, addr: WordType, size: usize, store: bool) -> Result<(usize, u32), MemError> {
        let (misaligned, fault) = if store {
            (MemError::StoreMisaligned, MemError::StoreFault)
        } else {
            (MemError::LoadMisaligned, MemError::LoadFault)
        };
        if !matches!(size, 1 | 2 | 4 | 8) || addr % size as WordType != 0 {
            return Err(misaligned);
        }
        let offset = addr.checked_sub(self.base).ok_or(fault)?;
        let index = (offset / 8) as usize;
        if index >= self.data.len() {
            return Err(fault);
        }
        Ok((index, ((offset % 8) * 8) as u32))
    }

    #[inline]
    fn lane_mask(size: usize) -> u64 {
        if size == 8 {
            u64::MAX
        } else {
            (1u64 << (size * 8)) - 1
        }
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

impl Mem for Ram {
    fn load(&self, addr: WordType, size: usize) -> Result<u64, MemError> {
        let (index, shift) = self.locate(addr, size, false)?;
        let word = self.data[index].load(Ordering::Acquire);
        Ok((word >> shift) & Self::lane_mask(size))
    }

    fn store(&self, addr: WordType, size: usize, data: u64) -> Result<(), MemError> {
        let (index, shift) = self.locate(addr, size, true)?;
        let mask = Self::lane_mask(size) << shift;
        let lane = (data << shift) & mask;
        let _ = self.data[index].fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
            Some((old & !mask) | lane)
        });
        Ok(())
    }

    fn compare_exchange(
        &self,
        addr: WordType,
        size: usize,
        current: u64,
        new: u64,
    ) -> Result<Result<u64, u64>, MemError> {
        let (index, shift) = self.locate(addr, size, true)?;
        let lane_mask = Self::lane_mask(size);
        let mask = lane_mask << shift;
        let cell = &self.data[index];

        let mut observed = cell.load(Ordering::Acquire);
        loop {
            let actual = (observed >> shift) & lane_mask;
            if actual != current & lane_mask {
                return Ok(Err(actual));
            }
            let replaced = (observed & !mask) | ((new << shift) & mask);
            match cell.compare_exchange_weak(observed, replaced, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(Ok(actual)),
                // Neighbouring lanes changed underneath us; re-check our own.
                Err(now) => observed = now,
            }
        }
    }
}
