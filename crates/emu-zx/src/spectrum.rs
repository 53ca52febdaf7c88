//! The top-level Spectrum machine.
//!
//! One frame is 69,888 T-states at 3.5 MHz, 50 frames per second. The
//! frame loop executes Z80 instructions and, after each one, catches the
//! slower components up to the clock: the ULA renders every scanline whose
//! 224-T-state boundary passed, the FDC counts down its head delay, and
//! the mixer emits the audio samples that fell due. At the frame boundary
//! the ULA's INT line is asserted for 32 T-states and the clock rebases by
//! one frame length.

#![allow(clippy::cast_possible_truncation)]

use emu_core::Cpu;
use format_sna::SnaSnapshot;
use format_spectrum_tap::TapFile;
use format_trd::{TrdImage, scl_to_trd};
use format_tzx::TzxFile;
use sinclair_ula::{LINES_PER_FRAME, TSTATES_PER_LINE, Ula};
use zilog_z80::Z80;

use crate::audio::SampleQueue;
use crate::bus::SpectrumBus;
use crate::config::{SpectrumConfig, SpectrumModel};
use crate::memory::{Memory48K, Memory128K, SpectrumMemory};
use crate::tape::TapeDeck;

/// T-states per 50 Hz frame.
pub const TSTATES_PER_FRAME: u64 = 69_888;

/// ZX Spectrum system.
pub struct Spectrum {
    cpu: Z80,
    pub bus: SpectrumBus,
    model: SpectrumModel,
    /// Drive slots exposed to mounts (1-4).
    drive_count: usize,
    /// Force every mounted disk read-only.
    disks_read_only: bool,
    /// Next scanline awaiting rendering this frame.
    next_line: u32,
    /// Clock position of the last peripheral catch-up.
    last_catch_up: u64,
    frame_count: u64,
}

impl Spectrum {
    /// Create a machine from the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the ROM size doesn't match the model (16,384 bytes for
    /// 48K, 32,768 for 128K) or the Beta Disk ROM isn't 16,384 bytes.
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        let memory: Box<dyn SpectrumMemory> = match config.model {
            SpectrumModel::Spectrum48K => Box::new(Memory48K::new(&config.rom)),
            SpectrumModel::Spectrum128K => Box::new(Memory128K::new(&config.rom)),
        };

        let is_48k = config.model == SpectrumModel::Spectrum48K;
        let tape = TapeDeck::new(is_48k);
        let mut bus = SpectrumBus::new(TSTATES_PER_FRAME, memory, Ula::new(), tape);

        if config.model == SpectrumModel::Spectrum128K {
            bus.ay = Some(gi_ay_3_8912::Ay3_8912::new());
        }

        if let Some(rom) = &config.trdos_rom {
            assert!(
                rom.len() == 0x4000,
                "Beta Disk ROM must be exactly 16384 bytes, got {}",
                rom.len()
            );
            bus.attach_beta_disk(rom.clone());
        }

        Self {
            cpu: Z80::new(),
            bus,
            model: config.model,
            drive_count: config.drive_count.clamp(1, 4),
            disks_read_only: config.disks_read_only,
            next_line: 0,
            last_catch_up: 0,
            frame_count: 0,
        }
    }

    /// Run one complete frame. Returns the CPU T-states executed.
    pub fn run_frame(&mut self) -> u64 {
        let start = self.bus.clock.now();

        while !self.bus.clock.frame_done() {
            if Ula::int_active(self.bus.clock.frame_tstate()) {
                self.cpu.interrupt(&mut self.bus);
            }
            self.cpu.step(&mut self.bus);
            self.catch_up();
        }

        let executed = self.bus.clock.now() - start;
        self.end_frame();
        executed
    }

    /// Execute a single instruction (tests and debugging).
    pub fn step(&mut self) -> u32 {
        let tstates = self.cpu.step(&mut self.bus);
        self.catch_up();
        if self.bus.clock.frame_done() {
            self.end_frame();
        }
        tstates
    }

    /// Bring scanlines, the FDC and the audio mixer up to the clock.
    fn catch_up(&mut self) {
        let now = self.bus.clock.now();

        while self.next_line < LINES_PER_FRAME
            && now >= u64::from((self.next_line + 1) * TSTATES_PER_LINE)
        {
            let SpectrumBus { ula, memory, .. } = &mut self.bus;
            let memory = &**memory;
            ula.render_scanline(self.next_line, |addr| memory.vram_peek(addr));
            self.next_line += 1;
        }

        let elapsed = (now - self.last_catch_up) as u32;
        self.last_catch_up = now;
        if let Some(fdc) = &mut self.bus.fdc {
            fdc.step(elapsed);
        }

        let SpectrumBus {
            mixer, ay, tape, ..
        } = &mut self.bus;
        mixer.catch_up(now, ay.as_mut(), tape);
    }

    fn end_frame(&mut self) {
        self.bus.ula.end_frame();

        // Pull the tape fully up to date so the rebase below is safe
        let now = self.bus.clock.now();
        if self.bus.tape.is_playing() {
            let _ = self.bus.tape.ear_level_at(now);
        }

        let frame_len = self.bus.clock.frame_len();
        self.bus.clock.end_frame();
        self.bus.tape.rebase(frame_len);
        self.bus.mixer.rebase(frame_len);
        self.last_catch_up = self.last_catch_up.saturating_sub(frame_len);
        self.next_line = 0;
        self.frame_count += 1;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn model(&self) -> SpectrumModel {
        self.model
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The 320×288 ARGB32 framebuffer.
    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        self.bus.ula.framebuffer()
    }

    /// Handle to the audio sample queue for the host callback.
    #[must_use]
    pub fn audio_queue(&self) -> SampleQueue {
        self.bus.mixer.queue_handle()
    }

    /// Press or release a key in the 8×5 matrix.
    pub fn set_key(&mut self, row: usize, bit: u8, pressed: bool) {
        self.bus.ula.keyboard.set_key(row, bit, pressed);
    }

    /// CPU reset (F12): registers and paging reset, media stays mounted.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.memory.reset();
        self.bus.set_trdos_active(false);
        if let Some(fdc) = &mut self.bus.fdc {
            fdc.reset();
        }
    }

    // -----------------------------------------------------------------------
    // Tape
    // -----------------------------------------------------------------------

    pub fn insert_tap(&mut self, tap: &TapFile) {
        self.bus.tape.load_tap(tap);
    }

    pub fn insert_tzx(&mut self, tzx: TzxFile) {
        self.bus.tape.load_tzx(tzx);
    }

    /// Start tape playback from the current position.
    pub fn tape_play(&mut self) {
        let now = self.bus.clock.now();
        self.bus.tape.play(now);
    }

    /// Toggle tape play/pause (F7).
    pub fn tape_toggle(&mut self) {
        if self.bus.tape.is_playing() {
            self.bus.tape.stop();
        } else {
            self.tape_play();
        }
    }

    /// Rewind the tape to the start (F6).
    pub fn tape_rewind(&mut self) {
        self.bus.tape.rewind();
    }

    // -----------------------------------------------------------------------
    // Disks
    // -----------------------------------------------------------------------

    /// Number of drive slots this machine exposes.
    #[must_use]
    pub fn drive_count(&self) -> usize {
        self.drive_count
    }

    /// Mount a TRD image in a drive. The machine's `--ro` configuration
    /// overrides `read_only = false`.
    ///
    /// # Errors
    ///
    /// Fails when no Beta Disk is configured, the drive index is outside
    /// the configured slots, or the image is invalid.
    pub fn mount_trd(
        &mut self,
        drive: usize,
        data: &[u8],
        read_only: bool,
    ) -> Result<(), String> {
        let image = TrdImage::parse(data, read_only || self.disks_read_only)?;
        self.mount_image(drive, image)
    }

    /// Convert and mount an SCL archive (always read-only).
    ///
    /// # Errors
    ///
    /// Fails when no Beta Disk is configured or the archive is invalid.
    pub fn mount_scl(&mut self, drive: usize, data: &[u8]) -> Result<(), String> {
        let image = scl_to_trd(data)?;
        self.mount_image(drive, image)
    }

    fn mount_image(&mut self, drive: usize, image: TrdImage) -> Result<(), String> {
        if drive >= self.drive_count {
            return Err(format!(
                "drive index {drive} out of range ({} slot(s) configured)",
                self.drive_count
            ));
        }
        let Some(fdc) = &mut self.bus.fdc else {
            return Err("no Beta Disk Interface configured (need --trdos-rom)".to_string());
        };
        fdc.insert_disk(drive, image);
        Ok(())
    }

    /// Unmount a drive, returning the image (for flushing).
    pub fn unmount_disk(&mut self, drive: usize) -> Option<TrdImage> {
        self.bus.fdc.as_mut().and_then(|fdc| fdc.eject_disk(drive))
    }

    /// Format the catalogs of all mounted disks (F8).
    #[must_use]
    pub fn dump_catalogs(&self) -> String {
        let Some(fdc) = &self.bus.fdc else {
            return "No Beta Disk Interface configured\n".to_string();
        };

        let mut out = String::new();
        for drive in 0..4 {
            let Some(disk) = fdc.disk(drive) else {
                continue;
            };
            let info = disk.disk_info();
            let label = String::from_utf8_lossy(&info.label).trim_end().to_string();
            out.push_str(&format!(
                "Drive {}: \"{label}\" — {} files, {} free sectors\n",
                char::from(b'A' + drive as u8),
                info.file_count,
                info.free_sectors,
            ));
            for entry in disk.catalog() {
                out.push_str(&format!(
                    "  {:<8}.{}  start {:5}  length {:5}  {:3} sectors  at {}:{}\n",
                    entry.name_str(),
                    char::from(entry.ext),
                    entry.start,
                    entry.length,
                    entry.sectors_used,
                    entry.start_track,
                    entry.start_sector,
                ));
            }
        }
        if out.is_empty() {
            out.push_str("No disks mounted\n");
        }
        out
    }

    /// Toggle the TR-DOS ROM paging (F9).
    pub fn toggle_trdos(&mut self) {
        let active = self.bus.trdos_active();
        self.bus.set_trdos_active(!active);
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Apply a 48K SNA snapshot.
    ///
    /// # Errors
    ///
    /// Fails on a 128K machine (48K SNA only).
    pub fn apply_sna(&mut self, snapshot: &SnaSnapshot) -> Result<(), String> {
        if self.model != SpectrumModel::Spectrum48K {
            return Err("48K SNA snapshots require the 48K model".to_string());
        }
        crate::sna::apply(self, snapshot);
        Ok(())
    }
}
