//! Privileged architecture core of a RISC-V hart: the CSR file, interrupt
//! resolution, trap delivery and two-stage address translation with PMP and
//! MTT checks.
//!
//! The execution layer owns instruction decoding and the run loop. It calls
//! into [`Hart`] for CSR accesses, translations and trap entry.

pub mod config;
pub mod device;
pub mod isa;
#[cfg(all(feature = "native-log", not(target_arch = "wasm32")))]
pub mod logging;
pub mod ram;
pub mod utils;

pub use config::ram_config;
pub use isa::riscv::{
    hart::Hart,
    trap::{Exception, Interrupt, Trap, TrapError},
};
