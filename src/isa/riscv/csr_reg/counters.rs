//! Performance counters: `cycle`, `time`, `instret`, the programmable
//! `hpmcounter`s and their machine-mode controls.
//!
//! Counters are not ticked. Each one keeps the value it was last given and
//! the clock reading at that moment, and a read adds how far the clock has
//! moved since. Inhibiting a counter folds the distance into the value.

use super::*;
use crate::{
    config::arch_config::WordType,
    isa::riscv::csr_reg::fields::{counteren, hpmevent},
};

const LOW_HALF: u64 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    Cycles,
    Instret,
}

/// Counter number encoded in the low five bits of every counter CSR.
#[inline]
fn counter_index(csrno: u16) -> usize {
    (csrno & 0x1f) as usize
}

/// RV32 `*h` registers alias the upper half of the 64-bit counter.
fn is_high_half(csrno: u16) -> bool {
    matches!(
        csrno,
        csr_index::cycleh..=csr_index::hpmcounter31h
            | csr_index::mcycleh..=csr_index::mhpmcounter31h
            | csr_index::htimedeltah
    )
}

/// Merge a 32-bit half into a 64-bit register, or take the whole value.
fn merge_half(hart: &Hart, csrno: u16, old: u64, value: WordType) -> u64 {
    if is_high_half(csrno) {
        (old & LOW_HALF) | (value << 32)
    } else if hart.cfg.is_rv32() {
        (old & !LOW_HALF) | (value & LOW_HALF)
    } else {
        value
    }
}

fn view_half(csrno: u16, value: u64) -> WordType {
    if is_high_half(csrno) { value >> 32 } else { value }
}

impl Hart {
    /// Account for `n` retired instructions, one cycle each.
    pub fn retire(&mut self, n: u64) {
        let pmu = &mut self.state.pmu;
        pmu.cycles = pmu.cycles.wrapping_add(n);
        pmu.instret = pmu.instret.wrapping_add(n);
    }

    /// Account for cycles in which nothing retired.
    pub fn stall(&mut self, cycles: u64) {
        self.state.pmu.cycles = self.state.pmu.cycles.wrapping_add(cycles);
    }

    fn counter_clock(&self, idx: usize) -> Option<Clock> {
        match idx {
            0 => Some(Clock::Cycles),
            2 => Some(Clock::Instret),
            3..=31 => match self.state.pmu.events[idx] & hpmevent::SELECTOR {
                hpmevent::CYCLES => Some(Clock::Cycles),
                hpmevent::INSTRET => Some(Clock::Instret),
                _ => None,
            },
            _ => None,
        }
    }

    /// Current clock reading when counter `idx` is running.
    fn counter_running(&self, idx: usize) -> Option<u64> {
        if self.state.pmu.mcountinhibit & 1 << idx != 0 {
            return None;
        }
        self.counter_clock(idx).map(|clock| match clock {
            Clock::Cycles => self.state.pmu.cycles,
            Clock::Instret => self.state.pmu.instret,
        })
    }

    pub fn counter_value(&self, idx: usize) -> u64 {
        let c = self.state.pmu.counters[idx];
        match self.counter_running(idx) {
            Some(now) => now.wrapping_sub(c.prev).wrapping_add(c.val),
            None => c.val,
        }
    }

    /// Set counter `idx` and anchor it to the clock it currently follows.
    fn set_counter(&mut self, idx: usize, value: u64) {
        let now = self.counter_running(idx).unwrap_or(0);
        let c = &mut self.state.pmu.counters[idx];
        c.val = value;
        c.prev = now;
    }

    /// Apply a change to the inhibit or event state of the counters in
    /// `affected` without losing their accumulated counts.
    fn reanchor_counters(&mut self, affected: WordType, update: impl FnOnce(&mut Hart)) {
        let mut values = [0u64; 32];
        for (idx, v) in values.iter_mut().enumerate() {
            *v = self.counter_value(idx);
        }
        update(self);
        for (idx, &v) in values.iter().enumerate() {
            if affected & 1 << idx != 0 {
                self.set_counter(idx, v);
            }
        }
    }

    /// Bits of `xcounteren` and `mcountinhibit` backed by a counter.
    fn counter_mask(&self) -> WordType {
        counteren::CY | counteren::TM | counteren::IR | self.cfg.pmu_avail() as WordType
    }

    fn mtime(&self) -> CsrResult<u64> {
        self.timer
            .as_ref()
            .map(|t| t.mtime())
            .ok_or(Exception::IllegalInstruction)
    }
}

pub(super) fn read_counter(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    Ok(view_half(csrno, hart.counter_value(counter_index(csrno))))
}

pub(super) fn write_counter(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let idx = counter_index(csrno);
    let full = merge_half(hart, csrno, hart.counter_value(idx), value);
    log::trace!("Counter {idx} set to {full:#x}");
    hart.set_counter(idx, full);
    Ok(())
}

/// `time` is the platform timer, offset by `htimedelta` inside a guest.
pub(super) fn read_time(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    let mut time = hart.mtime()?;
    if hart.state.virt {
        time = time.wrapping_add(hart.state.htimedelta);
    }
    Ok(view_half(csrno, time))
}

pub(super) fn read_htimedelta(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    Ok(view_half(csrno, hart.state.htimedelta))
}

pub(super) fn write_htimedelta(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    hart.state.htimedelta = merge_half(hart, csrno, hart.state.htimedelta, value);
    Ok(())
}

pub(super) fn read_mcountinhibit(hart: &mut Hart, _csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.pmu.mcountinhibit)
}

/// `time` cannot be inhibited.
pub(super) fn write_mcountinhibit(hart: &mut Hart, _csrno: u16, value: WordType) -> CsrResult<()> {
    let value = value & hart.counter_mask() & !counteren::TM;
    let changed = hart.state.pmu.mcountinhibit ^ value;
    hart.reanchor_counters(changed, |h| h.state.pmu.mcountinhibit = value);
    Ok(())
}

pub(super) fn read_mhpmevent(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    Ok(hart.state.pmu.events[counter_index(csrno)])
}

/// Events of unimplemented counters read as zero.
pub(super) fn write_mhpmevent(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let idx = counter_index(csrno);
    if hart.cfg.pmu_avail() & 1 << idx == 0 {
        return Ok(());
    }
    hart.reanchor_counters(1 << idx, |h| h.state.pmu.events[idx] = value);
    Ok(())
}

fn counteren_field(state: &mut HartState, csrno: u16) -> &mut WordType {
    match csrno {
        csr_index::scounteren => &mut state.scounteren,
        csr_index::hcounteren => &mut state.hcounteren,
        _ => &mut state.mcounteren,
    }
}

pub(super) fn read_counteren(hart: &mut Hart, csrno: u16) -> CsrResult<WordType> {
    Ok(*counteren_field(&mut hart.state, csrno))
}

pub(super) fn write_counteren(hart: &mut Hart, csrno: u16, value: WordType) -> CsrResult<()> {
    let mask = hart.counter_mask();
    *counteren_field(&mut hart.state, csrno) = value & mask;
    Ok(())
}
