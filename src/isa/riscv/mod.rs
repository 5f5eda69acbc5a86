//! RISC-V privileged architecture.

pub mod cfi;
pub mod csr_reg;
pub mod ctr;
pub mod hart;
mod hart_tester;
pub mod interrupt;
pub mod mmu;
pub mod state;
pub mod trap;
