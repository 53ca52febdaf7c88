//! Standard Sinclair ULA (Uncommitted Logic Array).
//!
//! The ULA handles video generation, memory contention, the keyboard
//! matrix, border colour, the speaker/MIC bits, and the INT line. This
//! crate is a standalone IC: VRAM is reached through closures passed by
//! the caller, keeping it decoupled from any memory model.
//!
//! # Timing (48K PAL)
//!
//! - 224 CPU T-states per line, 312 lines per frame = 69,888 T-states
//! - Top border 64 lines, active display 192 lines, bottom border 56
//! - INT asserted for the first 32 T-states of the frame
//!
//! Rendering is scanline-synchronous: the machine calls
//! `render_scanline()` for every line boundary the clock crossed, so a
//! border change between scanlines lands on the correct line.
//!
//! # Framebuffer
//!
//! 320×288 ARGB32: 256 active + 32 border pixels per side, 192 active +
//! 48 border lines top and bottom (scanlines 16-303 are visible).
//!
//! # Contention
//!
//! During screen fetch (lines 64-255, T-states 0-127 of the line) the ULA
//! steals the bus. The delay pattern repeats every 8 T-states:
//! `[6, 5, 4, 3, 2, 1, 0, 0]`.

#![allow(clippy::cast_possible_truncation)]

mod keyboard;
mod palette;

pub use keyboard::KeyboardState;
pub use palette::PALETTE;

/// Framebuffer dimensions.
pub const FB_WIDTH: u32 = 320;
pub const FB_HEIGHT: u32 = 288;

/// CPU T-states per line.
pub const TSTATES_PER_LINE: u32 = 224;
/// Lines per frame.
pub const LINES_PER_FRAME: u32 = 312;
/// CPU T-states per frame.
pub const TSTATES_PER_FRAME: u32 = TSTATES_PER_LINE * LINES_PER_FRAME;

/// Display area.
const BORDER_LEFT: u32 = 32;
const SCREEN_WIDTH: u32 = 256;
const SCREEN_HEIGHT: u32 = 192;

/// First scanline of the active display (after the 64-line top border).
const FIRST_SCREEN_LINE: u32 = 64;

/// First visible scanline (top of the framebuffer's 48 border lines).
const FIRST_VISIBLE_LINE: u32 = 16;

/// INT is asserted for the first 32 T-states of the frame.
const INT_LENGTH_TSTATES: u64 = 32;

/// Contention window within a line, in CPU T-states.
const CONTENTION_END_TSTATE: u64 = 128;

/// Contention delay pattern (repeats every 8 T-states).
const CONTENTION_PATTERN: [u8; 8] = [6, 5, 4, 3, 2, 1, 0, 0];

/// Frames between FLASH toggles (≈1.56 Hz at 50 frames/s).
const FLASH_FRAME_COUNT: u8 = 16;

/// Standard Sinclair ULA.
pub struct Ula {
    /// Current border colour (0-7).
    border: u8,
    /// Last value written to port $FE (MIC/EAR readback, speaker bit).
    last_fe_write: u8,
    /// Issue-2 board: EAR readback mirrors MIC (bit 3); Issue-3 mirrors
    /// the speaker bit (bit 4).
    issue2: bool,
    /// FLASH state: false = normal, true = inverted.
    flash_state: bool,
    flash_counter: u8,
    /// ARGB32 framebuffer.
    framebuffer: Vec<u32>,
    /// The 8×5 keyboard matrix.
    pub keyboard: KeyboardState,
}

impl Ula {
    #[must_use]
    pub fn new() -> Self {
        Self {
            border: 7, // White border on power-up
            last_fe_write: 0,
            issue2: true,
            flash_state: false,
            flash_counter: 0,
            framebuffer: vec![0xFF00_0000; (FB_WIDTH * FB_HEIGHT) as usize],
            keyboard: KeyboardState::new(),
        }
    }

    /// Select Issue-2 (default) or Issue-3 EAR readback behaviour.
    pub fn set_issue2(&mut self, issue2: bool) {
        self.issue2 = issue2;
    }

    // -----------------------------------------------------------------------
    // Port $FE
    // -----------------------------------------------------------------------

    /// Handle a write to port $FE. Returns true when the speaker bit
    /// (bit 4) toggled, so the machine can timestamp a beeper edge.
    pub fn write_fe(&mut self, value: u8) -> bool {
        let toggled = (value ^ self.last_fe_write) & 0x10 != 0;
        self.border = value & 0x07;
        self.last_fe_write = value;
        toggled
    }

    /// Read port $FE: keyboard rows selected by the address high byte,
    /// EAR on bit 6 (from the tape when one is playing, otherwise the
    /// write-back mirror), bits 5 and 7 high.
    #[must_use]
    pub fn read_fe(&self, addr_high: u8, tape_ear: Option<bool>) -> u8 {
        let keys = self.keyboard.read(addr_high);
        let ear = match tape_ear {
            Some(level) => {
                if level {
                    0x40
                } else {
                    0x00
                }
            }
            None => {
                let mirror_bit = if self.issue2 { 0x08 } else { 0x10 };
                if self.last_fe_write & mirror_bit != 0 {
                    0x40
                } else {
                    0x00
                }
            }
        };
        keys | 0xA0 | ear
    }

    /// Current speaker level (bit 4 of the last $FE write).
    #[must_use]
    pub fn speaker_level(&self) -> bool {
        self.last_fe_write & 0x10 != 0
    }

    #[must_use]
    pub fn border_colour(&self) -> u8 {
        self.border
    }

    pub fn set_border_colour(&mut self, colour: u8) {
        self.border = colour & 0x07;
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Whether the INT line is active at the given frame T-state.
    #[must_use]
    pub fn int_active(frame_tstate: u64) -> bool {
        frame_tstate < INT_LENGTH_TSTATES
    }

    /// Whether a frame position falls inside the screen-fetch window.
    fn in_fetch_window(frame_tstate: u64) -> bool {
        let line = frame_tstate / u64::from(TSTATES_PER_LINE);
        let line_tstate = frame_tstate % u64::from(TSTATES_PER_LINE);
        line >= u64::from(FIRST_SCREEN_LINE)
            && line < u64::from(FIRST_SCREEN_LINE + SCREEN_HEIGHT)
            && line_tstate < CONTENTION_END_TSTATE
    }

    /// Memory contention delay for an access starting at `frame_tstate`.
    /// The caller has already decided the address is in a contended page.
    #[must_use]
    pub fn contention(frame_tstate: u64) -> u8 {
        if !Self::in_fetch_window(frame_tstate) {
            return 0;
        }
        let line_tstate = frame_tstate % u64::from(TSTATES_PER_LINE);
        CONTENTION_PATTERN[(line_tstate % 8) as usize]
    }

    /// I/O contention for a 4-T-state I/O cycle starting at `frame_tstate`.
    ///
    /// Two address properties matter: whether the high byte lies in a
    /// contended page, and whether bit 0 is clear (the ULA decodes the
    /// port). Four cases:
    ///
    /// | High contended? | ULA port? | Pattern          |
    /// |-----------------|-----------|------------------|
    /// | No              | No        | N:4              |
    /// | No              | Yes       | N:1, C:3         |
    /// | Yes             | Yes       | C:1, C:3         |
    /// | Yes             | No        | C:1 C:1 C:1 C:1  |
    #[must_use]
    pub fn io_contention(frame_tstate: u64, ula_port: bool, contended_high: bool) -> u8 {
        if !Self::in_fetch_window(frame_tstate) {
            return 0;
        }

        let delay_at = |offset: u64| -> u8 { Self::contention(frame_tstate + offset) };

        match (contended_high, ula_port) {
            (false, false) => 0,
            (false, true) => delay_at(1),
            (true, true) => {
                let d0 = delay_at(0);
                d0 + delay_at(1 + u64::from(d0))
            }
            (true, false) => {
                let d0 = delay_at(0);
                let d1 = delay_at(1 + u64::from(d0));
                let d2 = delay_at(2 + u64::from(d0) + u64::from(d1));
                let d3 = delay_at(3 + u64::from(d0) + u64::from(d1) + u64::from(d2));
                d0 + d1 + d2 + d3
            }
        }
    }

    /// The value an undecoded port read picks up from the ULA's data bus.
    ///
    /// During the fetch window the ULA reads bitmap/attribute pairs in the
    /// first four T-states of each 8-T-state group (two character columns
    /// per group); outside it the bus floats high.
    #[must_use]
    pub fn floating_bus(frame_tstate: u64, vram: impl Fn(u16) -> u8) -> u8 {
        if !Self::in_fetch_window(frame_tstate) {
            return 0xFF;
        }

        let line = (frame_tstate / u64::from(TSTATES_PER_LINE)) as u32;
        let line_tstate = frame_tstate % u64::from(TSTATES_PER_LINE);
        let phase = line_tstate % 8;
        if phase >= 4 {
            return 0xFF;
        }

        let screen_y = (line - FIRST_SCREEN_LINE) as u8;
        let column = ((line_tstate / 8) * 2 + phase / 2) as u8;
        if column >= 32 {
            return 0xFF;
        }

        if phase % 2 == 0 {
            vram(bitmap_addr(screen_y, column))
        } else {
            vram(attr_addr(screen_y, column))
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Render one scanline (0-311) into the framebuffer.
    pub fn render_scanline(&mut self, line: u32, vram: impl Fn(u16) -> u8) {
        if !(FIRST_VISIBLE_LINE..FIRST_VISIBLE_LINE + FB_HEIGHT).contains(&line) {
            return;
        }
        let fb_y = line - FIRST_VISIBLE_LINE;
        let row_start = (fb_y * FB_WIDTH) as usize;
        let border_colour = PALETTE[self.border as usize];

        let in_screen =
            (FIRST_SCREEN_LINE..FIRST_SCREEN_LINE + SCREEN_HEIGHT).contains(&line);
        if !in_screen {
            self.framebuffer[row_start..row_start + FB_WIDTH as usize].fill(border_colour);
            return;
        }

        let screen_y = (line - FIRST_SCREEN_LINE) as u8;
        self.framebuffer[row_start..row_start + BORDER_LEFT as usize].fill(border_colour);
        self.framebuffer
            [row_start + (BORDER_LEFT + SCREEN_WIDTH) as usize..row_start + FB_WIDTH as usize]
            .fill(border_colour);

        for column in 0u8..32 {
            let bitmap = vram(bitmap_addr(screen_y, column));
            let attr = vram(attr_addr(screen_y, column));

            let flash = attr & 0x80 != 0;
            let bright: u8 = if attr & 0x40 != 0 { 8 } else { 0 };
            let paper = (attr >> 3) & 0x07;
            let ink = attr & 0x07;

            let (fg, bg) = if flash && self.flash_state {
                (paper, ink)
            } else {
                (ink, paper)
            };
            let fg_colour = PALETTE[(fg + bright) as usize];
            let bg_colour = PALETTE[(bg + bright) as usize];

            let base = row_start + (BORDER_LEFT as usize) + usize::from(column) * 8;
            for bit in 0..8 {
                self.framebuffer[base + bit] = if bitmap & (0x80 >> bit) != 0 {
                    fg_colour
                } else {
                    bg_colour
                };
            }
        }
    }

    /// Advance the FLASH counter at a frame boundary.
    pub fn end_frame(&mut self) {
        self.flash_counter += 1;
        if self.flash_counter >= FLASH_FRAME_COUNT {
            self.flash_counter = 0;
            self.flash_state = !self.flash_state;
        }
    }

    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }
}

impl Default for Ula {
    fn default() -> Self {
        Self::new()
    }
}

/// Bitmap address for a screen row and character column:
/// `010Y7Y6 Y2Y1Y0 Y5Y4Y3 X4X3X2X1X0`.
#[must_use]
pub fn bitmap_addr(screen_y: u8, column: u8) -> u16 {
    let third = u16::from((screen_y & 0x38) >> 3) | u16::from((screen_y & 0x07) << 3);
    0x4000 | (u16::from(screen_y & 0xC0) << 5) | (third << 5) | u16::from(column)
}

/// Attribute address for a screen row and character column.
#[must_use]
pub fn attr_addr(screen_y: u8, column: u8) -> u16 {
    0x5800 | (u16::from(screen_y >> 3) << 5) | u16::from(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame T-state at (line, t-in-line).
    fn at(line: u64, tstate: u64) -> u64 {
        line * u64::from(TSTATES_PER_LINE) + tstate
    }

    #[test]
    fn frame_timing_constants() {
        assert_eq!(TSTATES_PER_FRAME, 69_888);
        assert_eq!(TSTATES_PER_LINE * LINES_PER_FRAME, 69_888);
    }

    #[test]
    fn bitmap_address_mapping() {
        assert_eq!(bitmap_addr(0, 0), 0x4000);
        assert_eq!(bitmap_addr(1, 0), 0x4100);
        assert_eq!(bitmap_addr(8, 0), 0x4020);
        assert_eq!(bitmap_addr(64, 0), 0x4800);
        assert_eq!(bitmap_addr(191, 31), 0x57FF);
    }

    #[test]
    fn attr_address_mapping() {
        assert_eq!(attr_addr(0, 0), 0x5800);
        assert_eq!(attr_addr(7, 31), 0x581F);
        assert_eq!(attr_addr(8, 0), 0x5820);
        assert_eq!(attr_addr(191, 31), 0x5AFF);
    }

    #[test]
    fn int_active_in_first_32_tstates() {
        assert!(Ula::int_active(0));
        assert!(Ula::int_active(31));
        assert!(!Ula::int_active(32));
    }

    #[test]
    fn contention_pattern_in_window() {
        assert_eq!(Ula::contention(at(64, 0)), 6);
        assert_eq!(Ula::contention(at(64, 1)), 5);
        assert_eq!(Ula::contention(at(64, 5)), 1);
        assert_eq!(Ula::contention(at(64, 6)), 0);
        assert_eq!(Ula::contention(at(64, 7)), 0);
        assert_eq!(Ula::contention(at(64, 8)), 6);
        assert_eq!(Ula::contention(at(255, 0)), 6);
    }

    #[test]
    fn no_contention_outside_window() {
        assert_eq!(Ula::contention(at(0, 0)), 0, "top border");
        assert_eq!(Ula::contention(at(63, 0)), 0, "last border line");
        assert_eq!(Ula::contention(at(256, 0)), 0, "bottom border");
        assert_eq!(Ula::contention(at(64, 128)), 0, "past the fetch window");
    }

    #[test]
    fn io_contention_four_cases() {
        let t = at(64, 0);
        // Neither contended-high nor ULA port: free
        assert_eq!(Ula::io_contention(t, false, false), 0);
        // ULA port, uncontended high: one check at offset 1
        assert_eq!(Ula::io_contention(t, true, false), 5);
        // Contended high, ULA port: C:1, C:3
        // d0 = pattern[0] = 6, d1 = pattern[(1+6)%8] = pattern[7] = 0
        assert_eq!(Ula::io_contention(t, true, true), 6);
        // Contended high, non-ULA port: four checks
        // d0=6, d1=pat[7]=0, d2=pat[(2+6)%8]=6, d3=pat[(3+12)%8]=pat[7]=0
        assert_eq!(Ula::io_contention(t, false, true), 12);
    }

    #[test]
    fn io_contention_free_outside_window() {
        assert_eq!(Ula::io_contention(at(0, 0), true, true), 0);
    }

    #[test]
    fn floating_bus_returns_fetch_bytes() {
        let mut vram = vec![0u8; 0x1B00];
        vram[0] = 0xAA; // bitmap (0,0)
        vram[1] = 0x55; // bitmap (0,1)
        vram[0x1800] = 0x38; // attr (0,0)
        vram[0x1801] = 0x47; // attr (0,1)
        let peek = |addr: u16| vram[usize::from(addr - 0x4000)];

        assert_eq!(Ula::floating_bus(at(64, 0), peek), 0xAA);
        assert_eq!(Ula::floating_bus(at(64, 1), peek), 0x38);
        assert_eq!(Ula::floating_bus(at(64, 2), peek), 0x55);
        assert_eq!(Ula::floating_bus(at(64, 3), peek), 0x47);
        // Idle phases float high
        assert_eq!(Ula::floating_bus(at(64, 4), peek), 0xFF);
        assert_eq!(Ula::floating_bus(at(64, 7), peek), 0xFF);
        // Outside the display entirely
        assert_eq!(Ula::floating_bus(at(0, 0), peek), 0xFF);
        assert_eq!(Ula::floating_bus(at(64, 128), peek), 0xFF);
    }

    #[test]
    fn write_fe_reports_speaker_edges() {
        let mut ula = Ula::new();
        assert!(ula.write_fe(0x10), "0→1 is an edge");
        assert!(!ula.write_fe(0x17), "speaker unchanged");
        assert!(ula.write_fe(0x07), "1→0 is an edge");
        assert_eq!(ula.border_colour(), 7);
    }

    #[test]
    fn read_fe_keyboard_and_idle_bits() {
        let mut ula = Ula::new();
        assert_eq!(ula.read_fe(0x00, None), 0xBF);

        ula.keyboard.set_key(0, 0, true);
        let value = ula.read_fe(0xFE, None);
        assert_eq!(value & 0x01, 0, "shift pressed, active low");
        assert_eq!(value & 0xA0, 0xA0, "bits 5 and 7 high");
    }

    #[test]
    fn ear_follows_tape_when_playing() {
        let ula = Ula::new();
        assert_eq!(ula.read_fe(0x00, Some(true)) & 0x40, 0x40);
        assert_eq!(ula.read_fe(0x00, Some(false)) & 0x40, 0x00);
    }

    #[test]
    fn ear_mirrors_mic_on_issue2() {
        let mut ula = Ula::new();
        ula.write_fe(0x08); // MIC high
        assert_eq!(ula.read_fe(0x00, None) & 0x40, 0x40);
        ula.write_fe(0x00);
        assert_eq!(ula.read_fe(0x00, None) & 0x40, 0x00);
    }

    #[test]
    fn ear_mirrors_speaker_on_issue3() {
        let mut ula = Ula::new();
        ula.set_issue2(false);
        ula.write_fe(0x08); // MIC high — ignored on Issue 3
        assert_eq!(ula.read_fe(0x00, None) & 0x40, 0x00);
        ula.write_fe(0x10); // Speaker high
        assert_eq!(ula.read_fe(0x00, None) & 0x40, 0x40);
    }

    #[test]
    fn render_border_line() {
        let mut ula = Ula::new();
        ula.set_border_colour(2);
        let vram = |_: u16| 0u8;
        ula.render_scanline(20, vram); // top border, fb row 4

        let row = &ula.framebuffer()[4 * FB_WIDTH as usize..5 * FB_WIDTH as usize];
        assert!(row.iter().all(|&p| p == PALETTE[2]));
    }

    #[test]
    fn render_screen_line_with_attributes() {
        let mut ula = Ula::new();
        // Column 0 of row 0: bitmap $AA, ink 1 paper 2, no bright
        let vram = |addr: u16| match addr {
            0x4000 => 0xAA,
            0x5800 => 0x11, // paper 2, ink 1
            _ => 0,
        };
        ula.render_scanline(64, vram); // first screen line, fb row 48

        let row_start = 48 * FB_WIDTH as usize;
        let pixels = &ula.framebuffer()[row_start + 32..row_start + 40];
        for (i, &pixel) in pixels.iter().enumerate() {
            let expected = if i % 2 == 0 { PALETTE[1] } else { PALETTE[2] };
            assert_eq!(pixel, expected, "pixel {i} of $AA pattern");
        }
        // Border pixels on both flanks
        assert_eq!(ula.framebuffer()[row_start], PALETTE[7]);
        assert_eq!(ula.framebuffer()[row_start + 319], PALETTE[7]);
    }

    #[test]
    fn flash_swaps_ink_and_paper_after_16_frames() {
        let mut ula = Ula::new();
        let vram = |addr: u16| match addr {
            0x4000 => 0xFF,
            0x5800 => 0x80 | 0x08, // flash, paper 1, ink 0
            _ => 0,
        };

        ula.render_scanline(64, vram);
        let row_start = 48 * FB_WIDTH as usize;
        assert_eq!(ula.framebuffer()[row_start + 32], PALETTE[0], "ink before flash");

        for _ in 0..16 {
            ula.end_frame();
        }
        ula.render_scanline(64, vram);
        assert_eq!(ula.framebuffer()[row_start + 32], PALETTE[1], "paper after flash");
    }
}
