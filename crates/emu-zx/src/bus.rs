//! The Spectrum bus: memory and I/O routing, with the system clock.
//!
//! The bus is the single timekeeper. Every memory access charges its base
//! cost plus ULA contention, every I/O access charges 4 T-states plus the
//! port contention rule, and internal CPU cycles arrive through `tick` /
//! `tick_address`. The CPU reads the consumed total back via `tstates()`.
//!
//! # Port decode
//!
//! - Any even port is the ULA: border/MIC/speaker on write, keyboard+EAR
//!   on read.
//! - $7FFD (bit 1 and bit 15 clear): the 128K paging latch.
//! - $FFFD / $BFFD: AY register select / data.
//! - $1F: Kempston joystick.
//! - With the TR-DOS ROM paged in, low bytes $1F/$3F/$5F/$7F/$FF decode to
//!   the FD1793 instead (the Beta Disk hides Kempston while active).
//! - Anything else undecoded reads the floating bus.
//!
//! # TR-DOS paging
//!
//! The Beta Disk Interface watches M1 fetches: executing anywhere in
//! $3D00-$3DFF with the 48K BASIC ROM selected pages the TR-DOS ROM into
//! slot 0; the first fetch at $4000 or above pages it back out.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{Bus, Clock, IoBus};
use gi_ay_3_8912::Ay3_8912;
use sinclair_ula::Ula;
use wd_fd1793::Fd1793;

use crate::audio::AudioMixer;
use crate::memory::SpectrumMemory;
use crate::tape::TapeDeck;

/// The Spectrum bus.
pub struct SpectrumBus {
    pub clock: Clock,
    pub memory: Box<dyn SpectrumMemory>,
    pub ula: Ula,
    pub tape: TapeDeck,
    pub mixer: AudioMixer,
    /// AY-3-8912 (128K only).
    pub ay: Option<Ay3_8912>,
    /// FD1793 FDC (present when a Beta Disk ROM is configured).
    pub fdc: Option<Fd1793>,
    /// Kempston joystick bits 0-4: right, left, down, up, fire (active
    /// high).
    pub kempston: u8,
    trdos_rom: Option<Vec<u8>>,
    trdos_active: bool,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(
        frame_len: u64,
        memory: Box<dyn SpectrumMemory>,
        ula: Ula,
        tape: TapeDeck,
    ) -> Self {
        Self {
            clock: Clock::new(frame_len),
            memory,
            ula,
            tape,
            mixer: AudioMixer::new(),
            ay: None,
            fdc: None,
            kempston: 0,
            trdos_rom: None,
            trdos_active: false,
        }
    }

    /// Attach a Beta Disk Interface: its ROM and an FDC with four slots.
    pub fn attach_beta_disk(&mut self, rom: Vec<u8>) {
        self.trdos_rom = Some(rom);
        self.fdc = Some(Fd1793::new());
    }

    #[must_use]
    pub fn has_beta_disk(&self) -> bool {
        self.trdos_rom.is_some()
    }

    #[must_use]
    pub fn trdos_active(&self) -> bool {
        self.trdos_active
    }

    /// Force the TR-DOS ROM in or out (the F9 hotkey).
    pub fn set_trdos_active(&mut self, active: bool) {
        self.trdos_active = active && self.trdos_rom.is_some();
    }

    /// Whether this port belongs to the FDC while TR-DOS is paged in.
    fn is_fdc_port(&self, port: u16) -> bool {
        self.trdos_active
            && self.fdc.is_some()
            && matches!(port as u8, 0x1F | 0x3F | 0x5F | 0x7F | 0xFF)
    }

    /// Charge contention for a memory access starting now.
    fn memory_contention(&mut self, addr: u16) {
        if self.memory.contended(addr) {
            let delay = Ula::contention(self.clock.frame_tstate());
            self.clock.advance(u64::from(delay));
        }
    }
}

impl Bus for SpectrumBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.memory_contention(addr);
        self.clock.advance(3);
        if self.trdos_active && addr < 0x4000 {
            if let Some(rom) = &self.trdos_rom {
                return rom[usize::from(addr)];
            }
        }
        self.memory.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory_contention(addr);
        self.clock.advance(3);
        self.memory.write(addr, value);
    }

    fn fetch(&mut self, addr: u16) -> u8 {
        // The Beta Disk watches M1 cycles for its paging window
        if self.trdos_rom.is_some() {
            if !self.trdos_active
                && addr & 0xFF00 == 0x3D00
                && self.memory.basic48_rom_selected()
            {
                self.trdos_active = true;
            } else if self.trdos_active && addr >= 0x4000 {
                self.trdos_active = false;
            }
        }
        self.read(addr)
    }

    fn tick(&mut self, tstates: u32) {
        self.clock.advance(u64::from(tstates));
    }

    fn tick_address(&mut self, addr: u16, tstates: u32) {
        if self.memory.contended(addr) {
            for _ in 0..tstates {
                let delay = Ula::contention(self.clock.frame_tstate());
                self.clock.advance(u64::from(delay) + 1);
            }
        } else {
            self.clock.advance(u64::from(tstates));
        }
    }

    fn refresh(&mut self, _ir: u16) {
        self.clock.advance(1);
    }

    fn interrupt_ack(&mut self, _ir: u16) {
        self.clock.advance(7);
    }

    fn tstates(&self) -> u64 {
        self.clock.now()
    }
}

impl IoBus for SpectrumBus {
    fn read_io(&mut self, port: u16) -> u8 {
        let frame_tstate = self.clock.frame_tstate();
        let ula_port = port & 0x01 == 0;
        let contended_high = self.memory.contended(port);
        let wait = Ula::io_contention(frame_tstate, ula_port, contended_high);
        self.clock.advance(4 + u64::from(wait));

        if self.is_fdc_port(port) {
            if let Some(fdc) = &mut self.fdc {
                return fdc.read_port(port as u8);
            }
        }

        if ula_port {
            let now = self.clock.now();
            let tape_ear = if self.tape.is_playing() {
                Some(self.tape.ear_level_at(now))
            } else {
                None
            };
            return self.ula.read_fe((port >> 8) as u8, tape_ear);
        }

        // Kempston joystick
        if port & 0xFF == 0x1F {
            return self.kempston;
        }

        // $FFFD: AY register read
        if port & 0xC002 == 0xC000 {
            return self.ay.as_ref().map_or(0xFF, Ay3_8912::read_data);
        }

        // Undecoded: the ULA's data bus leaks through
        Ula::floating_bus(frame_tstate, |a| self.memory.vram_peek(a))
    }

    fn write_io(&mut self, port: u16, value: u8) {
        let frame_tstate = self.clock.frame_tstate();
        let ula_port = port & 0x01 == 0;
        let contended_high = self.memory.contended(port);
        let wait = Ula::io_contention(frame_tstate, ula_port, contended_high);
        self.clock.advance(4 + u64::from(wait));

        if self.is_fdc_port(port) {
            if let Some(fdc) = &mut self.fdc {
                fdc.write_port(port as u8, value);
            }
            return;
        }

        if ula_port {
            // Border, MIC and speaker; a speaker toggle is a beeper edge
            if self.ula.write_fe(value) {
                let now = self.clock.now();
                let level = self.ula.speaker_level();
                self.mixer.push_beeper_edge(now, level);
            }
            return;
        }

        // $7FFD: 128K paging latch
        if port & 0x8002 == 0x0000 {
            self.memory.write_bank_register(value);
        }

        // $FFFD: AY register select; $BFFD: AY data
        if port & 0xC002 == 0xC000
            && let Some(ay) = &mut self.ay
        {
            ay.select_register(value);
        }
        if port & 0xC002 == 0x8000
            && let Some(ay) = &mut self.ay
        {
            ay.write_data(value);
        }
    }
}
