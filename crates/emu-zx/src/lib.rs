//! ZX Spectrum 48K/128K emulator with Beta Disk Interface (TR-DOS).
//!
//! The machine is a single-threaded loop around one T-state clock: execute
//! a Z80 instruction, then catch every slower component up to the clock —
//! scanlines render as their 224-T-state boundaries pass, the tape deck
//! schedules EAR edges, the FDC counts down its head delays, and the audio
//! mixer marks sample boundaries. Only the audio sample queue crosses a
//! thread boundary (to the host audio callback), behind a mutex.

pub mod audio;
mod bus;
mod config;
mod memory;
pub mod sna;
pub mod tape;
mod spectrum;

pub use bus::SpectrumBus;
pub use config::{SpectrumConfig, SpectrumModel};
pub use memory::{Memory48K, Memory128K, SpectrumMemory};
pub use spectrum::Spectrum;
pub use tape::TapeDeck;
