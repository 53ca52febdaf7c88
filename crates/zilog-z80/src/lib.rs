//! Zilog Z80 CPU emulator.
//!
//! Each call to `step()` executes one instruction and returns the T-states
//! it consumed, contention included. Timing is driven through the bus: the
//! M1 fetch, every memory and I/O access, and every internal padding cycle
//! advance the bus clock, so the returned count is simply the clock delta.
//!
//! Block instructions (LDIR, CPIR, ...) execute one iteration per step and
//! rewind PC while they repeat, which keeps the interrupt check between
//! iterations exactly as the silicon does it.

mod alu;
mod cpu;
mod flags;
mod registers;

pub use cpu::Z80;
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::Registers;
