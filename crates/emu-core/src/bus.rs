//! Memory and I/O bus interfaces.

/// A bus that supports memory read/write operations.
///
/// All operations are cycle-accurate: reads and writes advance the system
/// clock (base cost plus any contention delay), and `tick()` covers internal
/// CPU cycles that don't touch the bus. `tstates()` exposes the clock so a
/// CPU can report the exact cost of an instruction.
pub trait Bus {
    /// Read a byte. Advances the clock by 3 T-states plus contention.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte. Advances the clock by 3 T-states plus contention.
    fn write(&mut self, address: u16, value: u8);

    /// Fetch an opcode byte (the memory portion of an M1 cycle).
    ///
    /// Separate from `read()` because M1 contention is checked at a
    /// different point in the cycle on contended systems. Covers 3 T-states;
    /// the caller issues `refresh()` for the fourth.
    fn fetch(&mut self, address: u16) -> u8 {
        self.read(address)
    }

    /// Advance the clock without a bus operation (internal CPU cycles).
    fn tick(&mut self, tstates: u32);

    /// Advance the clock during internal cycles that hold an address on the
    /// bus (e.g. the padding cycle of `INC (HL)`). Contended systems apply
    /// per-cycle wait states when the address is in shared memory.
    fn tick_address(&mut self, _address: u16, tstates: u32) {
        self.tick(tstates);
    }

    /// The refresh cycle after an M1 fetch. The Z80 puts IR on the address
    /// bus for this T-state.
    fn refresh(&mut self, _ir: u16) {
        self.tick(1);
    }

    /// The INT acknowledge cycle: 7 T-states (5 acknowledge + 2 internal)
    /// before the stack push begins, with IR on the address bus.
    fn interrupt_ack(&mut self, _ir: u16) {
        self.tick(7);
    }

    /// Current clock reading in T-states.
    fn tstates(&self) -> u64;
}

/// A bus with a separate 16-bit I/O address space (IN/OUT instructions).
///
/// I/O operations charge 4 T-states plus any port contention.
pub trait IoBus: Bus {
    /// Read a byte from the given I/O port.
    fn read_io(&mut self, port: u16) -> u8;

    /// Write a byte to the given I/O port.
    fn write_io(&mut self, port: u16, value: u8);
}
