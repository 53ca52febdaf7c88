//! CPU core trait.

use crate::IoBus;

/// A CPU that executes one instruction per `step()`.
///
/// The bus is passed in, not owned, so it can be shared with video and
/// peripherals. Bus-generic methods take `B` per call, which keeps the
/// bus-independent accessors (`pc`, `is_halted`) free of type annotations.
pub trait Cpu {
    /// Execute one instruction. Returns T-states consumed, contention
    /// included.
    fn step<B: IoBus>(&mut self, bus: &mut B) -> u32;

    /// Reset the CPU to its power-on state.
    fn reset(&mut self);

    /// Signal a maskable interrupt. Returns true if it was accepted.
    fn interrupt<B: IoBus>(&mut self, bus: &mut B) -> bool;

    /// Signal a non-maskable interrupt.
    fn nmi<B: IoBus>(&mut self, bus: &mut B);

    /// Current program counter.
    fn pc(&self) -> u16;

    /// Whether the CPU is halted.
    fn is_halted(&self) -> bool;
}
