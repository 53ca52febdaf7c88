//! Western Digital FD1793 floppy disk controller, as wired in the Beta
//! Disk Interface (TR-DOS).
//!
//! # Register interface (port low bytes, TR-DOS decode)
//!
//! | Port | Read     | Write    |
//! |------|----------|----------|
//! | $1F  | Status   | Command  |
//! | $3F  | Track    | Track    |
//! | $5F  | Sector   | Sector   |
//! | $7F  | Data     | Data     |
//! | $FF  | Control  | Control (bits 0-1 drive, bit 4 side, bit 6 density) |
//!
//! # State machine
//!
//! Type I commands (Restore/Seek/Step) set BUSY and charge a modeled head
//! delay; `step()` counts it down and raises IRQ on completion. Type II
//! commands stream the 256-byte sector buffer through the data register
//! under DRQ; draining (or filling) the buffer clears BUSY/DRQ and raises
//! IRQ. IRQ and DRQ are pollable flags, not callback lines — the machine
//! inspects them between instructions.
//!
//! The sector register is 1-based on the wire and 0-based against the
//! image, matching TR-DOS.

#![allow(clippy::cast_possible_truncation)]

use format_trd::{SECTOR_SIZE, TrdImage};

/// Status register bits.
pub mod status {
    pub const BUSY: u8 = 0x01;
    pub const DRQ: u8 = 0x02;
    pub const LOST_DATA: u8 = 0x04;
    pub const CRC_ERROR: u8 = 0x08;
    pub const RNF: u8 = 0x10;
    pub const WRITE_PROTECT: u8 = 0x40;
    pub const NOT_READY: u8 = 0x80;
}

/// Port low bytes.
pub const PORT_COMMAND: u8 = 0x1F;
pub const PORT_TRACK: u8 = 0x3F;
pub const PORT_SECTOR: u8 = 0x5F;
pub const PORT_DATA: u8 = 0x7F;
pub const PORT_CONTROL: u8 = 0xFF;

/// T-states per millisecond at 3.5 MHz.
const TSTATES_PER_MS: u32 = 3500;

/// Modeled head-step time.
const STEP_MS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FdcState {
    Idle,
    /// Type I command in progress (delay counting down).
    Busy,
    ReadData,
    WriteData,
}

/// FD1793 floppy disk controller with four drive slots.
pub struct Fd1793 {
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    command: u8,
    control: u8,
    drive: usize,
    side: u8,
    state: FdcState,
    delay_tstates: u32,
    buffer: [u8; SECTOR_SIZE],
    buffer_pos: usize,
    buffer_len: usize,
    irq: bool,
    step_out: bool,
    drives: [Option<TrdImage>; 4],
}

impl Fd1793 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: status::NOT_READY,
            track: 0,
            sector: 1,
            data: 0,
            command: 0,
            control: 0,
            drive: 0,
            side: 0,
            state: FdcState::Idle,
            delay_tstates: 0,
            buffer: [0; SECTOR_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            irq: false,
            step_out: false,
            drives: [None, None, None, None],
        }
    }

    pub fn reset(&mut self) {
        self.status = if self.current_drive().is_some() {
            0
        } else {
            status::NOT_READY
        };
        self.track = 0;
        self.sector = 1;
        self.data = 0;
        self.command = 0;
        self.state = FdcState::Idle;
        self.delay_tstates = 0;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        self.irq = false;
    }

    // -----------------------------------------------------------------------
    // Drives
    // -----------------------------------------------------------------------

    /// Mount an image in a drive slot (0-3).
    pub fn insert_disk(&mut self, drive: usize, image: TrdImage) {
        if drive < 4 {
            self.drives[drive] = Some(image);
            if drive == self.drive {
                self.status &= !status::NOT_READY;
            }
        }
    }

    /// Remove and return a drive's image.
    pub fn eject_disk(&mut self, drive: usize) -> Option<TrdImage> {
        let image = if drive < 4 {
            self.drives[drive].take()
        } else {
            None
        };
        if drive == self.drive && self.drives[self.drive].is_none() {
            self.status |= status::NOT_READY;
        }
        image
    }

    #[must_use]
    pub fn disk(&self, drive: usize) -> Option<&TrdImage> {
        self.drives.get(drive).and_then(Option::as_ref)
    }

    pub fn disk_mut(&mut self, drive: usize) -> Option<&mut TrdImage> {
        self.drives.get_mut(drive).and_then(Option::as_mut)
    }

    fn current_drive(&self) -> Option<&TrdImage> {
        self.drives[self.drive].as_ref()
    }

    // -----------------------------------------------------------------------
    // Lines
    // -----------------------------------------------------------------------

    /// Take (clear) the pending interrupt, returning whether one was set.
    pub fn take_irq(&mut self) -> bool {
        let was = self.irq;
        self.irq = false;
        was
    }

    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn drq(&self) -> bool {
        self.status & status::DRQ != 0
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        self.status & status::BUSY != 0
    }

    /// Count down the Type I delay by elapsed T-states.
    pub fn step(&mut self, tstates: u32) {
        if self.delay_tstates == 0 {
            return;
        }
        if tstates >= self.delay_tstates {
            self.delay_tstates = 0;
            if self.state == FdcState::Busy {
                self.status &= !status::BUSY;
                self.state = FdcState::Idle;
                self.irq = true;
            }
        } else {
            self.delay_tstates -= tstates;
        }
    }

    // -----------------------------------------------------------------------
    // Port interface
    // -----------------------------------------------------------------------

    /// Read one of the five controller ports (selected by low byte).
    pub fn read_port(&mut self, port_low: u8) -> u8 {
        match port_low {
            PORT_COMMAND => self.status,
            PORT_TRACK => self.track,
            PORT_SECTOR => self.sector,
            PORT_DATA => {
                if self.state == FdcState::ReadData && self.buffer_pos < self.buffer_len {
                    self.data = self.buffer[self.buffer_pos];
                    self.buffer_pos += 1;
                    if self.buffer_pos >= self.buffer_len {
                        self.status &= !(status::DRQ | status::BUSY);
                        self.state = FdcState::Idle;
                        self.irq = true;
                    }
                }
                self.data
            }
            PORT_CONTROL => self.control,
            _ => 0xFF,
        }
    }

    /// Write one of the five controller ports (selected by low byte).
    pub fn write_port(&mut self, port_low: u8, value: u8) {
        match port_low {
            PORT_COMMAND => self.execute_command(value),
            PORT_TRACK => self.track = value,
            PORT_SECTOR => self.sector = value,
            PORT_DATA => {
                if self.state == FdcState::WriteData && self.buffer_pos < self.buffer_len {
                    self.buffer[self.buffer_pos] = value;
                    self.buffer_pos += 1;
                    if self.buffer_pos >= self.buffer_len {
                        self.commit_write();
                    }
                } else {
                    self.data = value;
                }
            }
            PORT_CONTROL => {
                self.control = value;
                self.drive = usize::from(value & 0x03);
                self.side = u8::from(value & 0x10 != 0);
                if self.current_drive().is_some() {
                    self.status &= !status::NOT_READY;
                } else {
                    self.status |= status::NOT_READY;
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn execute_command(&mut self, cmd: u8) {
        self.command = cmd;
        self.status |= status::BUSY;
        self.status &= !(status::DRQ
            | status::LOST_DATA
            | status::CRC_ERROR
            | status::RNF
            | status::WRITE_PROTECT);

        match cmd >> 4 {
            // Type I: Restore
            0x0 => {
                self.track = 0;
                self.begin_seek_delay(STEP_MS);
            }
            // Type I: Seek to the track in the data register
            0x1 => {
                let distance = self.track.abs_diff(self.data);
                self.track = self.data;
                self.begin_seek_delay(STEP_MS + u32::from(distance));
            }
            // Type I: Step (repeat last direction), bit 4 = update track
            0x2 | 0x3 => {
                let out = self.step_out;
                self.step_head(out, cmd & 0x10 != 0);
            }
            // Type I: Step In
            0x4 | 0x5 => self.step_head(false, cmd & 0x10 != 0),
            // Type I: Step Out
            0x6 | 0x7 => self.step_head(true, cmd & 0x10 != 0),
            // Type II: Read Sector
            0x8 | 0x9 => self.begin_read_sector(),
            // Type II: Write Sector
            0xA | 0xB => self.begin_write_sector(),
            // Type III: Read Address
            0xC => self.begin_read_address(),
            // Type IV: Force Interrupt
            0xD => {
                self.status &= !status::BUSY;
                self.state = FdcState::Idle;
                self.delay_tstates = 0;
                if cmd & 0x0F != 0 {
                    self.irq = true;
                }
            }
            // Read Track / Write Track are not used by TR-DOS
            _ => {
                self.status &= !status::BUSY;
                self.state = FdcState::Idle;
            }
        }
    }

    fn begin_seek_delay(&mut self, ms: u32) {
        self.delay_tstates = ms * TSTATES_PER_MS;
        self.state = FdcState::Busy;
    }

    fn step_head(&mut self, out: bool, update_track: bool) {
        self.step_out = out;
        if out {
            if self.track > 0 && update_track {
                self.track -= 1;
            }
        } else if self.track < 79 && update_track {
            self.track += 1;
        }
        self.begin_seek_delay(STEP_MS);
    }

    /// Fail the current command: set an error bit, idle, raise IRQ.
    fn abort_command(&mut self, error: u8) {
        self.status |= error;
        self.status &= !status::BUSY;
        self.state = FdcState::Idle;
        self.irq = true;
    }

    fn begin_read_sector(&mut self) {
        // TR-DOS sector numbers are 1-based on the wire
        let sector = self.sector.saturating_sub(1);
        let (track, side) = (self.track, self.side);

        let mut buffer = [0u8; SECTOR_SIZE];
        let found = match self.drives[self.drive].as_ref() {
            Some(image) => image.read_sector(track, side, sector, &mut buffer),
            None => false,
        };

        if found {
            self.buffer = buffer;
            self.buffer_pos = 0;
            self.buffer_len = SECTOR_SIZE;
            self.state = FdcState::ReadData;
            self.status |= status::DRQ;
        } else {
            self.abort_command(status::RNF);
        }
    }

    fn begin_write_sector(&mut self) {
        let read_only = match self.drives[self.drive].as_ref() {
            Some(image) => image.is_read_only(),
            None => {
                self.abort_command(status::RNF);
                return;
            }
        };
        if read_only {
            self.abort_command(status::WRITE_PROTECT);
            return;
        }

        self.buffer_pos = 0;
        self.buffer_len = SECTOR_SIZE;
        self.state = FdcState::WriteData;
        self.status |= status::DRQ;
    }

    /// The 256th data write: commit the buffer to the image.
    fn commit_write(&mut self) {
        let sector = self.sector.saturating_sub(1);
        let (track, side) = (self.track, self.side);
        let buffer = self.buffer;

        let result = match self.drives[self.drive].as_mut() {
            Some(image) => image.write_sector(track, side, sector, &buffer),
            None => Err("no disk".to_string()),
        };

        match result {
            Ok(()) => {
                self.status &= !(status::DRQ | status::BUSY);
                self.state = FdcState::Idle;
                self.irq = true;
            }
            Err(_) => {
                let error = if self.current_drive().is_some_and(TrdImage::is_read_only) {
                    status::WRITE_PROTECT
                } else {
                    status::CRC_ERROR
                };
                self.status &= !status::DRQ;
                self.abort_command(error);
            }
        }
    }

    fn begin_read_address(&mut self) {
        if self.current_drive().is_none() {
            self.abort_command(status::RNF);
            return;
        }

        // 6-byte ID field: track, side, sector, size code (1 = 256), CRC
        self.buffer[0] = self.track;
        self.buffer[1] = self.side;
        self.buffer[2] = self.sector;
        self.buffer[3] = 1;
        self.buffer[4] = 0;
        self.buffer[5] = 0;
        self.buffer_pos = 0;
        self.buffer_len = 6;
        self.state = FdcState::ReadData;
        self.status |= status::DRQ;
    }
}

impl Default for Fd1793 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_trd::Geometry;

    fn fdc_with_disk() -> Fd1793 {
        let mut fdc = Fd1793::new();
        let mut image = TrdImage::blank(Geometry { tracks: 80, sides: 2 }, b"TEST    ");
        let mut payload = [0u8; SECTOR_SIZE];
        payload[0] = 0xA5;
        payload[255] = 0x5A;
        image.write_sector(1, 0, 0, &payload).expect("seed sector");
        fdc.insert_disk(0, image);
        fdc
    }

    #[test]
    fn not_ready_without_disk() {
        let mut fdc = Fd1793::new();
        assert_ne!(fdc.read_port(PORT_COMMAND) & status::NOT_READY, 0);

        let mut fdc = fdc_with_disk();
        assert_eq!(fdc.read_port(PORT_COMMAND) & status::NOT_READY, 0);
    }

    #[test]
    fn seek_charges_distance_delay_and_raises_irq() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_DATA, 40);
        fdc.write_port(PORT_COMMAND, 0x10); // Seek

        assert!(fdc.busy());
        let expected = (6 + 40) * TSTATES_PER_MS;

        // One T-state short: still busy
        fdc.step(expected - 1);
        assert!(fdc.busy());
        assert!(!fdc.irq_pending());

        fdc.step(1);
        assert!(!fdc.busy());
        assert!(fdc.take_irq());
        assert_eq!(fdc.read_port(PORT_TRACK), 40);
    }

    #[test]
    fn restore_returns_to_track_zero() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_TRACK, 33);
        fdc.write_port(PORT_COMMAND, 0x00); // Restore
        fdc.step(6 * TSTATES_PER_MS);
        assert_eq!(fdc.read_port(PORT_TRACK), 0);
        assert!(fdc.take_irq());
    }

    #[test]
    fn step_in_and_out_update_track() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_COMMAND, 0x50); // Step In with update
        fdc.step(6 * TSTATES_PER_MS);
        assert_eq!(fdc.read_port(PORT_TRACK), 1);

        fdc.write_port(PORT_COMMAND, 0x70); // Step Out with update
        fdc.step(6 * TSTATES_PER_MS);
        assert_eq!(fdc.read_port(PORT_TRACK), 0);

        // Step Out at track 0 stays put
        fdc.write_port(PORT_COMMAND, 0x70);
        fdc.step(6 * TSTATES_PER_MS);
        assert_eq!(fdc.read_port(PORT_TRACK), 0);
    }

    #[test]
    fn step_without_update_keeps_track_register() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_COMMAND, 0x40); // Step In, no update
        fdc.step(6 * TSTATES_PER_MS);
        assert_eq!(fdc.read_port(PORT_TRACK), 0);
    }

    #[test]
    fn read_sector_streams_256_bytes() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_TRACK, 1);
        fdc.write_port(PORT_SECTOR, 1); // 1-based → physical sector 0
        fdc.write_port(PORT_COMMAND, 0x80);

        assert!(fdc.drq());
        assert!(fdc.busy());

        assert_eq!(fdc.read_port(PORT_DATA), 0xA5, "first byte");
        for _ in 1..255 {
            let _ = fdc.read_port(PORT_DATA);
        }
        assert!(fdc.drq(), "DRQ until the last byte");
        assert_eq!(fdc.read_port(PORT_DATA), 0x5A, "last byte");

        assert!(!fdc.drq());
        assert!(!fdc.busy());
        assert!(fdc.take_irq());
    }

    #[test]
    fn read_sector_without_disk_sets_rnf() {
        let mut fdc = Fd1793::new();
        fdc.write_port(PORT_COMMAND, 0x80);
        let st = fdc.read_port(PORT_COMMAND);
        assert_ne!(st & status::RNF, 0);
        assert_eq!(st & status::BUSY, 0);
        assert!(fdc.take_irq());
    }

    #[test]
    fn read_sector_out_of_range_sets_rnf() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_TRACK, 99);
        fdc.write_port(PORT_SECTOR, 1);
        fdc.write_port(PORT_COMMAND, 0x80);
        assert_ne!(fdc.read_port(PORT_COMMAND) & status::RNF, 0);
    }

    #[test]
    fn write_sector_commits_buffer() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_TRACK, 2);
        fdc.write_port(PORT_SECTOR, 3); // physical sector 2
        fdc.write_port(PORT_COMMAND, 0xA0);

        assert!(fdc.drq());
        for i in 0..256u16 {
            fdc.write_port(PORT_DATA, i as u8);
        }
        assert!(!fdc.drq());
        assert!(!fdc.busy());
        assert!(fdc.take_irq());

        let mut sector = [0u8; SECTOR_SIZE];
        assert!(fdc.disk(0).expect("disk").read_sector(2, 0, 2, &mut sector));
        assert_eq!(sector[0], 0);
        assert_eq!(sector[255], 255);
        assert!(fdc.disk(0).expect("disk").is_dirty());
    }

    #[test]
    fn write_to_read_only_disk_sets_write_protect() {
        let mut fdc = fdc_with_disk();
        fdc.disk_mut(0).expect("disk").set_read_only(true);
        fdc.write_port(PORT_COMMAND, 0xA0);

        let st = fdc.read_port(PORT_COMMAND);
        assert_ne!(st & status::WRITE_PROTECT, 0);
        assert_eq!(st & status::BUSY, 0);
        assert!(fdc.take_irq());
    }

    #[test]
    fn read_address_returns_id_field() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_TRACK, 5);
        fdc.write_port(PORT_SECTOR, 9);
        fdc.write_port(PORT_COMMAND, 0xC0);

        let id: Vec<u8> = (0..6).map(|_| fdc.read_port(PORT_DATA)).collect();
        assert_eq!(id, vec![5, 0, 9, 1, 0, 0]);
        assert!(!fdc.busy());
        assert!(fdc.take_irq());
    }

    #[test]
    fn force_interrupt_idles_and_optionally_interrupts() {
        let mut fdc = fdc_with_disk();
        fdc.write_port(PORT_DATA, 40);
        fdc.write_port(PORT_COMMAND, 0x10); // long seek in progress
        assert!(fdc.busy());

        fdc.write_port(PORT_COMMAND, 0xD0); // Force Interrupt, no condition
        assert!(!fdc.busy());
        assert!(!fdc.take_irq(), "D0 with no condition bits raises no IRQ");

        fdc.write_port(PORT_COMMAND, 0xD8); // Immediate interrupt condition
        assert!(fdc.take_irq());
    }

    #[test]
    fn control_port_selects_drive_and_side() {
        let mut fdc = fdc_with_disk();

        // Select drive 1 (empty): not ready
        fdc.write_port(PORT_CONTROL, 0x01);
        assert_ne!(fdc.read_port(PORT_COMMAND) & status::NOT_READY, 0);

        // Back to drive 0, side 1
        fdc.write_port(PORT_CONTROL, 0x10);
        assert_eq!(fdc.read_port(PORT_COMMAND) & status::NOT_READY, 0);

        // A read on side 1 of track 1 misses the seeded sector (side 0)
        fdc.write_port(PORT_TRACK, 1);
        fdc.write_port(PORT_SECTOR, 1);
        fdc.write_port(PORT_COMMAND, 0x80);
        assert_eq!(fdc.read_port(PORT_DATA), 0, "side 1 sector is blank");
    }
}
