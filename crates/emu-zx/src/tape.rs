//! The tape deck: a pulse engine driving the EAR line from TAP or TZX
//! block descriptions.
//!
//! The deck owns a schedule of edges in absolute clock T-states. Every
//! call to `ear_level_at(now)` lazily advances the state machine through
//! each edge whose scheduled time is ≤ `now`, toggling the EAR level at
//! each one and computing the next edge from the current block and phase.
//! Rapid CPU polling therefore sees stable levels, and a read at clock
//! `c` has consumed exactly the edges scheduled at or before `c`.
//!
//! A TAP file loads as a sequence of standard-speed blocks with the ROM
//! loader timings (8063 pilot pulses for a header, 3223 for data) and a
//! one-second pause after each block.
//!
//! Pulse-list blocks (pulse sequences, CSW, direct recordings, and
//! generalized data) flatten to a half-wave list when the block starts;
//! generalized-data symbols resolve their polarity flags against the live
//! EAR level at that moment, fusing a symbol's first half-wave into the
//! previous one whenever a toggle would land on the wrong level.

#![allow(clippy::cast_possible_truncation)]

use format_spectrum_tap::TapFile;
use format_tzx::{GdbSymbol, TzxBlock, TzxFile, bits_per_symbol};

// Standard ROM timings (T-states)
const PILOT_PULSE: u32 = 2168;
const SYNC1_PULSE: u32 = 667;
const SYNC2_PULSE: u32 = 735;
const ZERO_PULSE: u32 = 855;
const ONE_PULSE: u32 = 1710;
const HEADER_PILOT_COUNT: u32 = 8063;
const DATA_PILOT_COUNT: u32 = 3223;

/// Pause after every TAP block.
const TAP_PAUSE_MS: u16 = 1000;

/// T-states per millisecond at 3.5 MHz.
const TSTATES_PER_MS: u64 = 3500;

/// Position within the current block's pulse train.
#[derive(Debug, Clone)]
enum Phase {
    /// Between blocks: the next boundary starts the next block.
    Idle,
    /// Pilot tone: `remaining` equal pulses left, current one included.
    Pilot { pulse: u32, remaining: u32 },
    /// First sync pulse playing; the second's length rides along.
    Sync1 { sync2: u32 },
    /// Second sync pulse playing.
    Sync2,
    /// Data bits: two equal half-waves per bit, MSB first.
    Data {
        zero_pulse: u32,
        one_pulse: u32,
        data: Vec<u8>,
        byte_idx: usize,
        /// Bit position 7..0 within the current byte.
        bit_idx: u8,
        used_bits_last: u8,
        second_half: bool,
        pause_ms: u16,
    },
    /// Pure tone: like pilot but with nothing after it.
    Tone { pulse: u32, remaining: u32 },
    /// Pre-flattened half-wave list (pulse seq / CSW / DRB / GDB).
    Pulses {
        list: Vec<u32>,
        index: usize,
        pause_ms: u16,
    },
    /// Silence; the boundary at its end emits no edge.
    Pause,
    /// Tape stopped, waiting for play().
    Stopped,
}

/// Tape deck state machine.
pub struct TapeDeck {
    blocks: Vec<TzxBlock>,
    block_index: usize,
    phase: Phase,
    /// Current EAR level. Idle and stopped tapes read high.
    level: bool,
    /// Absolute clock T-state of the next scheduled edge.
    next_edge: u64,
    playing: bool,
    loop_stack: Vec<(usize, u16)>,
    is_48k: bool,
}

impl TapeDeck {
    #[must_use]
    pub fn new(is_48k: bool) -> Self {
        Self {
            blocks: Vec::new(),
            block_index: 0,
            phase: Phase::Idle,
            level: true,
            next_edge: 0,
            playing: false,
            loop_stack: Vec::new(),
            is_48k,
        }
    }

    /// Load a TAP file, replacing any loaded tape.
    pub fn load_tap(&mut self, tap: &TapFile) {
        self.blocks = tap
            .blocks
            .iter()
            .map(|block| TzxBlock::StandardSpeed {
                pause_ms: TAP_PAUSE_MS,
                data: block.data.clone(),
            })
            .collect();
        self.rewind();
    }

    /// Load a TZX file, replacing any loaded tape.
    pub fn load_tzx(&mut self, tzx: TzxFile) {
        self.blocks = tzx.blocks;
        self.rewind();
    }

    /// Eject the tape.
    pub fn eject(&mut self) {
        self.blocks.clear();
        self.rewind();
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !self.blocks.is_empty()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[must_use]
    pub fn block_index(&self) -> usize {
        self.block_index
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Start (or resume) playback, anchored at the given clock.
    pub fn play(&mut self, now: u64) {
        if self.blocks.is_empty() {
            return;
        }
        if matches!(self.phase, Phase::Stopped) {
            self.phase = Phase::Idle;
        }
        self.playing = true;
        self.next_edge = now;
    }

    /// Pause playback; the EAR line holds its level.
    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Rewind to the start of the tape.
    pub fn rewind(&mut self) {
        self.block_index = 0;
        self.phase = Phase::Idle;
        self.level = true;
        self.next_edge = 0;
        self.playing = false;
        self.loop_stack.clear();
    }

    /// Shift the edge schedule down at a frame boundary.
    pub fn rebase(&mut self, frame_len: u64) {
        self.next_edge = self.next_edge.saturating_sub(frame_len);
    }

    /// The EAR level at clock `now`, consuming every edge scheduled ≤ now.
    pub fn ear_level_at(&mut self, now: u64) -> bool {
        while self.playing && self.next_edge <= now {
            self.advance();
        }
        self.level
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// Process the boundary at `next_edge`: the end of the current
    /// half-wave (or pause), or block setup when idle.
    fn advance(&mut self) {
        match self.phase.clone() {
            Phase::Idle => self.next_block(),

            Phase::Pilot { pulse, remaining } => {
                self.level = !self.level;
                if remaining <= 1 {
                    self.finish_pilot();
                } else {
                    self.next_edge += u64::from(pulse);
                    self.phase = Phase::Pilot {
                        pulse,
                        remaining: remaining - 1,
                    };
                }
            }

            Phase::Sync1 { sync2 } => {
                self.level = !self.level;
                self.next_edge += u64::from(sync2);
                self.phase = Phase::Sync2;
            }

            Phase::Sync2 => {
                self.level = !self.level;
                self.start_data_from_current_block();
            }

            Phase::Data {
                zero_pulse,
                one_pulse,
                data,
                byte_idx,
                bit_idx,
                used_bits_last,
                second_half,
                pause_ms,
            } => {
                self.level = !self.level;
                if !second_half {
                    // Same bit, second half-wave
                    let bit = (data[byte_idx] >> bit_idx) & 1;
                    let pulse = if bit == 1 { one_pulse } else { zero_pulse };
                    self.next_edge += u64::from(pulse);
                    self.phase = Phase::Data {
                        zero_pulse,
                        one_pulse,
                        data,
                        byte_idx,
                        bit_idx,
                        used_bits_last,
                        second_half: true,
                        pause_ms,
                    };
                    return;
                }

                // Bit complete — move on
                let is_last_byte = byte_idx == data.len() - 1;
                if bit_idx == 0 {
                    if is_last_byte {
                        self.finish_block(pause_ms);
                        return;
                    }
                    let byte_idx = byte_idx + 1;
                    let bits = if byte_idx == data.len() - 1 {
                        used_bits_last
                    } else {
                        8
                    };
                    let bit_idx = bits - 1;
                    let bit = (data[byte_idx] >> bit_idx) & 1;
                    let pulse = if bit == 1 { one_pulse } else { zero_pulse };
                    self.next_edge += u64::from(pulse);
                    self.phase = Phase::Data {
                        zero_pulse,
                        one_pulse,
                        data,
                        byte_idx,
                        bit_idx,
                        used_bits_last,
                        second_half: false,
                        pause_ms,
                    };
                } else {
                    let bit_idx = bit_idx - 1;
                    let bit = (data[byte_idx] >> bit_idx) & 1;
                    let pulse = if bit == 1 { one_pulse } else { zero_pulse };
                    self.next_edge += u64::from(pulse);
                    self.phase = Phase::Data {
                        zero_pulse,
                        one_pulse,
                        data,
                        byte_idx,
                        bit_idx,
                        used_bits_last,
                        second_half: false,
                        pause_ms,
                    };
                }
            }

            Phase::Tone { pulse, remaining } => {
                self.level = !self.level;
                if remaining <= 1 {
                    self.phase = Phase::Idle;
                } else {
                    self.next_edge += u64::from(pulse);
                    self.phase = Phase::Tone {
                        pulse,
                        remaining: remaining - 1,
                    };
                }
            }

            Phase::Pulses {
                list,
                index,
                pause_ms,
            } => {
                self.level = !self.level;
                let index = index + 1;
                if index >= list.len() {
                    self.finish_block(pause_ms);
                } else {
                    self.next_edge += u64::from(list[index]);
                    self.phase = Phase::Pulses {
                        list,
                        index,
                        pause_ms,
                    };
                }
            }

            // Pause boundaries emit no edge
            Phase::Pause => self.phase = Phase::Idle,

            Phase::Stopped => self.playing = false,
        }
    }

    /// Stop the tape: Idle phase, EAR high.
    fn halt_tape(&mut self) {
        self.playing = false;
        self.phase = Phase::Stopped;
        self.level = true;
    }

    /// End-of-block: pause (EAR held high) or straight to the next block.
    fn finish_block(&mut self, pause_ms: u16) {
        if pause_ms > 0 {
            self.level = true;
            self.next_edge += u64::from(pause_ms) * TSTATES_PER_MS;
            self.phase = Phase::Pause;
        } else {
            self.phase = Phase::Idle;
        }
    }

    /// The pilot finished: move to Sync1 using the current block's values
    /// (the block cursor already advanced past it).
    fn finish_pilot(&mut self) {
        match &self.blocks[self.block_index - 1] {
            TzxBlock::StandardSpeed { .. } => {
                self.next_edge += u64::from(SYNC1_PULSE);
                self.phase = Phase::Sync1 { sync2: SYNC2_PULSE };
            }
            TzxBlock::TurboSpeed { sync1, sync2, .. } => {
                self.next_edge += u64::from(*sync1);
                self.phase = Phase::Sync1 {
                    sync2: u32::from(*sync2),
                };
            }
            _ => self.phase = Phase::Idle,
        }
    }

    /// Enter the Data phase from the current block.
    fn start_data_from_current_block(&mut self) {
        let (zero, one, used_bits, pause_ms, data) = match &self.blocks[self.block_index - 1] {
            TzxBlock::StandardSpeed { pause_ms, data } => {
                (ZERO_PULSE, ONE_PULSE, 8u8, *pause_ms, data.clone())
            }
            TzxBlock::TurboSpeed {
                zero_pulse,
                one_pulse,
                used_bits,
                pause_ms,
                data,
                ..
            } => (
                u32::from(*zero_pulse),
                u32::from(*one_pulse),
                *used_bits,
                *pause_ms,
                data.clone(),
            ),
            _ => {
                self.phase = Phase::Idle;
                return;
            }
        };
        self.start_data_phase(zero, one, used_bits, pause_ms, data);
    }

    fn start_data_phase(
        &mut self,
        zero_pulse: u32,
        one_pulse: u32,
        used_bits: u8,
        pause_ms: u16,
        data: Vec<u8>,
    ) {
        if data.is_empty() {
            self.finish_block(pause_ms);
            return;
        }

        let used = if used_bits == 0 || used_bits > 8 { 8 } else { used_bits };
        let bits_first = if data.len() == 1 { used } else { 8 };
        let bit_idx = bits_first - 1;
        let bit = (data[0] >> bit_idx) & 1;
        let pulse = if bit == 1 { one_pulse } else { zero_pulse };

        self.next_edge += u64::from(pulse);
        self.phase = Phase::Data {
            zero_pulse,
            one_pulse,
            data,
            byte_idx: 0,
            bit_idx,
            used_bits_last: used,
            second_half: false,
            pause_ms,
        };
    }

    /// Start a pre-flattened half-wave list.
    fn start_pulses(&mut self, list: Vec<u32>, pause_ms: u16) {
        if list.is_empty() {
            self.finish_block(pause_ms);
            return;
        }
        self.next_edge += u64::from(list[0]);
        self.phase = Phase::Pulses {
            list,
            index: 0,
            pause_ms,
        };
    }

    /// Set up the next block for playback.
    fn next_block(&mut self) {
        if self.block_index >= self.blocks.len() {
            self.halt_tape();
            return;
        }

        let block = self.blocks[self.block_index].clone();
        self.block_index += 1;

        match block {
            TzxBlock::StandardSpeed { data, pause_ms } => {
                if data.is_empty() {
                    self.finish_block(pause_ms);
                    return;
                }
                let count = if data[0] == 0x00 {
                    HEADER_PILOT_COUNT
                } else {
                    DATA_PILOT_COUNT
                };
                self.next_edge += u64::from(PILOT_PULSE);
                self.phase = Phase::Pilot {
                    pulse: PILOT_PULSE,
                    remaining: count,
                };
            }

            TzxBlock::TurboSpeed {
                pilot_pulse,
                pilot_count,
                sync1,
                sync2,
                ..
            } => {
                if pilot_count == 0 {
                    // No pilot: straight into the sync pair
                    self.next_edge += u64::from(sync1);
                    self.phase = Phase::Sync1 {
                        sync2: u32::from(sync2),
                    };
                } else {
                    self.next_edge += u64::from(pilot_pulse);
                    self.phase = Phase::Pilot {
                        pulse: u32::from(pilot_pulse),
                        remaining: u32::from(pilot_count),
                    };
                }
            }

            TzxBlock::PureTone { pulse_len, count } => {
                if count == 0 {
                    return; // stays Idle, next boundary reads the next block
                }
                self.next_edge += u64::from(pulse_len);
                self.phase = Phase::Tone {
                    pulse: u32::from(pulse_len),
                    remaining: u32::from(count),
                };
            }

            TzxBlock::PulseSequence { pulses } => {
                let list = pulses.iter().map(|&p| u32::from(p)).collect();
                self.start_pulses(list, 0);
            }

            TzxBlock::PureData {
                zero_pulse,
                one_pulse,
                used_bits,
                pause_ms,
                data,
            } => self.start_data_phase(
                u32::from(zero_pulse),
                u32::from(one_pulse),
                used_bits,
                pause_ms,
                data,
            ),

            TzxBlock::DirectRecording {
                tstates_per_sample,
                pause_ms,
                used_bits,
                data,
            } => {
                let (initial, list) =
                    flatten_direct_recording(&data, used_bits, u32::from(tstates_per_sample));
                // The sample level is the bit value, so the line is forced
                self.level = initial;
                self.start_pulses(list, pause_ms);
            }

            TzxBlock::CswRecording { pause_ms, pulses } => {
                self.start_pulses(pulses, pause_ms);
            }

            TzxBlock::GeneralizedData {
                pause_ms,
                pilot_symbols,
                pilot_stream,
                data_symbols,
                data_symbol_count,
                data_stream,
            } => {
                let mut flat = GdbFlattener::new(self.level);
                for &(sym, repeats) in &pilot_stream {
                    let Some(symbol) = pilot_symbols.get(usize::from(sym)) else {
                        self.halt_tape();
                        return;
                    };
                    for _ in 0..repeats.max(1) {
                        flat.emit(symbol);
                    }
                }
                if data_symbol_count > 0 && !data_symbols.is_empty() {
                    let nbits = bits_per_symbol(data_symbols.len());
                    for i in 0..data_symbol_count as usize {
                        let sym = extract_bits(&data_stream, i, nbits);
                        let Some(symbol) = data_symbols.get(usize::from(sym)) else {
                            self.halt_tape();
                            return;
                        };
                        flat.emit(symbol);
                    }
                }
                let (initial, list) = flat.finish();
                self.level = initial;
                self.start_pulses(list, pause_ms);
            }

            TzxBlock::Pause { duration_ms: 0 } => self.halt_tape(),
            TzxBlock::Pause { duration_ms } => {
                self.level = true;
                self.next_edge += u64::from(duration_ms) * TSTATES_PER_MS;
                self.phase = Phase::Pause;
            }

            TzxBlock::LoopStart { repetitions } => {
                self.loop_stack.push((self.block_index, repetitions));
            }
            TzxBlock::LoopEnd => {
                if let Some((start, remaining)) = self.loop_stack.pop()
                    && remaining > 1
                {
                    self.loop_stack.push((start, remaining - 1));
                    self.block_index = start;
                }
            }

            TzxBlock::StopIf48K => {
                if self.is_48k {
                    self.halt_tape();
                }
            }

            TzxBlock::SetSignalLevel { level } => self.level = level,

            // Informational blocks
            TzxBlock::GroupStart { .. }
            | TzxBlock::GroupEnd
            | TzxBlock::TextDescription { .. }
            | TzxBlock::Message { .. }
            | TzxBlock::ArchiveInfo { .. } => {}

            TzxBlock::Unknown { block_id } => match block_id {
                // Hardware type, custom info, glue: skip
                0x33 | 0x35 | 0x5A => {}
                // Anything the engine cannot play stops the tape
                _ => self.halt_tape(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Flatteners
// ---------------------------------------------------------------------------

/// Direct recording: one bit per sample, MSB first, the level IS the bit.
/// Returns the initial level and the run-length half-wave list.
fn flatten_direct_recording(data: &[u8], used_bits: u8, tps: u32) -> (bool, Vec<u32>) {
    let mut bits = Vec::new();
    for (i, &byte) in data.iter().enumerate() {
        let count = if i == data.len() - 1 {
            let used = if used_bits == 0 || used_bits > 8 { 8 } else { used_bits };
            usize::from(used)
        } else {
            8
        };
        for bit in 0..count {
            bits.push(byte & (0x80 >> bit) != 0);
        }
    }

    let Some(&first) = bits.first() else {
        return (true, Vec::new());
    };

    let mut list = Vec::new();
    let mut current = first;
    let mut run: u32 = 0;
    for bit in bits {
        if bit == current {
            run += 1;
        } else {
            list.push(run * tps);
            current = bit;
            run = 1;
        }
    }
    list.push(run * tps);
    (first, list)
}

/// Extract the `index`-th `nbits`-wide symbol from a bit-packed stream,
/// MSB first.
fn extract_bits(stream: &[u8], index: usize, nbits: u8) -> u8 {
    let mut value = 0u8;
    let start = index * usize::from(nbits);
    for i in 0..usize::from(nbits) {
        let bit_pos = start + i;
        let byte = stream.get(bit_pos / 8).copied().unwrap_or(0);
        let bit = (byte >> (7 - (bit_pos % 8))) & 1;
        value = (value << 1) | bit;
    }
    value
}

/// Builds a toggle-only half-wave list from generalized-data symbols.
///
/// Playback plays the first half-wave at the entry level and toggles at
/// every boundary, so polarity is encoded structurally: a symbol whose
/// first half-wave must hold the *same* level as the previous one fuses
/// into it (extending its duration); a symbol needing the opposite level
/// falls on a natural toggle.
struct GdbFlattener {
    list: Vec<u32>,
    /// Level the first half-wave will play at.
    initial: bool,
    /// Level of the most recently emitted half-wave.
    last_level: bool,
}

impl GdbFlattener {
    fn new(entry_level: bool) -> Self {
        Self {
            list: Vec::new(),
            initial: entry_level,
            last_level: entry_level,
        }
    }

    fn emit(&mut self, symbol: &GdbSymbol) {
        let Some((&first, rest)) = symbol.pulses.split_first() else {
            return;
        };

        // The level this symbol's first half-wave must hold
        let target = match symbol.polarity {
            0x01 => self.last_level,  // continue the current level
            0x02 => false,            // force low
            0x03 => true,             // force high
            _ => !self.last_level,    // 0x00: opposite (an edge)
        };

        if self.list.is_empty() {
            // No previous half-wave to fuse with: adjust the entry level
            self.initial = target;
            self.last_level = target;
            self.list.push(u32::from(first));
        } else if target == self.last_level {
            // Fuse: lengthen the previous half-wave instead of toggling
            if let Some(last) = self.list.last_mut() {
                *last += u32::from(first);
            }
        } else {
            self.list.push(u32::from(first));
            self.last_level = target;
        }

        for &pulse in rest {
            self.list.push(u32::from(pulse));
            self.last_level = !self.last_level;
        }
    }

    fn finish(self) -> (bool, Vec<u32>) {
        (self.initial, self.list)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect (time, level) transitions by sampling every T-state.
    fn edges(deck: &mut TapeDeck, from: u64, to: u64) -> Vec<(u64, bool)> {
        let mut out = Vec::new();
        let mut last = deck.ear_level_at(from);
        for t in from..to {
            let level = deck.ear_level_at(t);
            if level != last {
                out.push((t, level));
                last = level;
            }
        }
        out
    }

    fn deck_with(blocks: Vec<TzxBlock>) -> TapeDeck {
        let mut deck = TapeDeck::new(true);
        deck.blocks = blocks;
        deck.rewind();
        deck
    }

    #[test]
    fn empty_deck_reads_high() {
        let mut deck = TapeDeck::new(true);
        assert!(deck.ear_level_at(1000));
        assert!(!deck.is_playing());
    }

    #[test]
    fn pure_tone_toggles_at_pulse_boundaries() {
        let mut deck = deck_with(vec![TzxBlock::PureTone {
            pulse_len: 100,
            count: 4,
        }]);
        deck.play(0);

        let transitions = edges(&mut deck, 0, 1000);
        // Block setup happens at t=0; pulses end at 100, 200, 300, 400
        let times: Vec<u64> = transitions.iter().map(|&(t, _)| t).collect();
        assert_eq!(times, vec![100, 200, 300, 400]);
        assert!(!deck.is_playing(), "tape ran out");
        assert!(deck.ear_level_at(2000), "EAR high after the tape stops");
    }

    #[test]
    fn pulse_sequence_uses_individual_lengths() {
        let mut deck = deck_with(vec![TzxBlock::PulseSequence {
            pulses: vec![50, 150, 75],
        }]);
        deck.play(0);

        let transitions = edges(&mut deck, 0, 1000);
        let times: Vec<u64> = transitions.iter().map(|&(t, _)| t).collect();
        // The final boundary's toggle collapses into the end-of-tape high
        // level, so only the first two edges are observable.
        assert_eq!(times, vec![50, 200]);
    }

    #[test]
    fn standard_block_pilot_count_depends_on_flag() {
        // Header flag: 8063 pilot pulses before sync1
        let mut deck = deck_with(vec![TzxBlock::StandardSpeed {
            pause_ms: 0,
            data: vec![0x00, 0x00, 0x00],
        }]);
        deck.play(0);
        let pilot_end = u64::from(HEADER_PILOT_COUNT) * u64::from(PILOT_PULSE);
        let _ = deck.ear_level_at(pilot_end - 1);
        assert!(matches!(deck.phase, Phase::Pilot { .. }));
        let _ = deck.ear_level_at(pilot_end);
        assert!(matches!(deck.phase, Phase::Sync1 { .. }));

        // Data flag: 3223 pulses
        let mut deck = deck_with(vec![TzxBlock::StandardSpeed {
            pause_ms: 0,
            data: vec![0xFF, 0x00, 0x00],
        }]);
        deck.play(0);
        let pilot_end = u64::from(DATA_PILOT_COUNT) * u64::from(PILOT_PULSE);
        let _ = deck.ear_level_at(pilot_end);
        assert!(matches!(deck.phase, Phase::Sync1 { .. }));
    }

    #[test]
    fn data_bits_use_two_half_waves_each() {
        // Pure data, single byte $A5, fast timings for the test
        let mut deck = deck_with(vec![TzxBlock::PureData {
            zero_pulse: 10,
            one_pulse: 20,
            used_bits: 8,
            pause_ms: 0,
            data: vec![0xA5],
        }]);
        deck.play(0);

        // $A5 = 1010 0101 → half-wave pairs 20,20,10,10,20,20,10,10,...
        let expected_durations = [20, 20, 10, 10, 20, 20, 10, 10, 10, 10, 20, 20, 10, 10, 20, 20];
        let transitions = edges(&mut deck, 0, 1000);
        assert_eq!(transitions.len(), 16, "8 bits × 2 half-waves");

        let mut prev = 0u64;
        for (i, &(t, _)) in transitions.iter().enumerate() {
            assert_eq!(t - prev, expected_durations[i], "half-wave {i}");
            prev = t;
        }
    }

    #[test]
    fn used_bits_limits_last_byte() {
        let mut deck = deck_with(vec![TzxBlock::PureData {
            zero_pulse: 10,
            one_pulse: 20,
            used_bits: 2,
            pause_ms: 0,
            data: vec![0xC0],
        }]);
        deck.play(0);

        let transitions = edges(&mut deck, 0, 500);
        assert_eq!(transitions.len(), 4, "2 bits × 2 half-waves");
    }

    #[test]
    fn pause_holds_ear_high_with_no_edges() {
        let mut deck = deck_with(vec![
            TzxBlock::PureTone {
                pulse_len: 100,
                count: 2,
            },
            TzxBlock::Pause { duration_ms: 1 },
            TzxBlock::PureTone {
                pulse_len: 100,
                count: 2,
            },
        ]);
        deck.play(0);

        // Tone ends at 200; pause runs 200..3700; second tone starts there
        let transitions = edges(&mut deck, 250, 3700);
        assert!(
            transitions.is_empty() || transitions.len() == 1,
            "at most the pause-entry level settle, no pulse edges"
        );
        assert!(deck.ear_level_at(2000), "pause holds high");

        let transitions = edges(&mut deck, 3700, 4000);
        assert_eq!(transitions.len(), 2, "second tone plays after the pause");
    }

    #[test]
    fn pause_zero_stops_the_tape() {
        let mut deck = deck_with(vec![
            TzxBlock::Pause { duration_ms: 0 },
            TzxBlock::PureTone {
                pulse_len: 100,
                count: 2,
            },
        ]);
        deck.play(0);
        let _ = deck.ear_level_at(10);
        assert!(!deck.is_playing());
        assert!(deck.ear_level_at(10_000), "stopped tape reads high");
    }

    #[test]
    fn stop_if_48k_only_stops_on_48k() {
        let mut deck = deck_with(vec![TzxBlock::StopIf48K]);
        deck.play(0);
        let _ = deck.ear_level_at(10);
        assert!(!deck.is_playing());

        let mut deck = TapeDeck::new(false);
        deck.blocks = vec![
            TzxBlock::StopIf48K,
            TzxBlock::PureTone {
                pulse_len: 100,
                count: 2,
            },
        ];
        deck.rewind();
        deck.play(0);
        let transitions = edges(&mut deck, 0, 500);
        assert_eq!(transitions.len(), 2, "128K machine plays on");
    }

    #[test]
    fn set_signal_level_overrides() {
        let mut deck = deck_with(vec![TzxBlock::SetSignalLevel { level: false }]);
        deck.play(0);
        assert!(!deck.ear_level_at(10), "level forced low");
    }

    #[test]
    fn loop_repeats_enclosed_blocks() {
        let mut deck = deck_with(vec![
            TzxBlock::LoopStart { repetitions: 3 },
            TzxBlock::PureTone {
                pulse_len: 50,
                count: 2,
            },
            TzxBlock::LoopEnd,
        ]);
        deck.play(0);

        let transitions = edges(&mut deck, 0, 2000);
        assert_eq!(transitions.len(), 6, "3 loop iterations × 2 pulses");
    }

    #[test]
    fn unsupported_block_stops_with_ear_high() {
        let mut deck = deck_with(vec![TzxBlock::Unknown { block_id: 0x23 }]);
        deck.play(0);
        let _ = deck.ear_level_at(10);
        assert!(!deck.is_playing());
        assert!(deck.ear_level_at(100));
    }

    #[test]
    fn skippable_unknown_blocks_continue() {
        let mut deck = deck_with(vec![
            TzxBlock::Unknown { block_id: 0x33 },
            TzxBlock::Unknown { block_id: 0x5A },
            TzxBlock::PureTone {
                pulse_len: 100,
                count: 2,
            },
        ]);
        deck.play(0);
        let transitions = edges(&mut deck, 0, 500);
        assert_eq!(transitions.len(), 2);
    }

    #[test]
    fn tap_load_produces_standard_blocks() {
        // Build a 2-block TAP: header (flag 0) and data (flag FF)
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x03, 0x00, 0x00, 0xAA, 0xAA]); // len 3: flag 0, byte AA, checksum
        raw.extend_from_slice(&[0x03, 0x00, 0xFF, 0x55, 0xAA]); // flag FF, byte 55, checksum
        let tap = TapFile::parse(&raw).expect("tap parses");

        let mut deck = TapeDeck::new(true);
        deck.load_tap(&tap);
        assert_eq!(deck.block_count(), 2);
        assert!(matches!(
            deck.blocks[0],
            TzxBlock::StandardSpeed { pause_ms: 1000, .. }
        ));
    }

    #[test]
    fn direct_recording_levels_follow_bits() {
        let mut deck = deck_with(vec![TzxBlock::DirectRecording {
            tstates_per_sample: 10,
            pause_ms: 0,
            used_bits: 8,
            data: vec![0b1110_0011],
        }]);
        deck.play(0);

        // Initial level = first bit = 1; runs: 3×1, 3×0, 2×1
        assert!(deck.ear_level_at(5), "forced high at start");
        assert!(deck.ear_level_at(29), "still high to t=30");
        assert!(!deck.ear_level_at(35), "low for the middle run");
        assert!(deck.ear_level_at(65), "high for the tail");
    }

    #[test]
    fn rebase_shifts_schedule() {
        let mut deck = deck_with(vec![TzxBlock::PureTone {
            pulse_len: 100_000,
            count: 2,
        }]);
        deck.play(0);
        let _ = deck.ear_level_at(0); // set up: next edge at 100_000

        deck.rebase(69_888);
        let level_before = deck.ear_level_at(30_000);
        let level_after = deck.ear_level_at(30_112);
        assert_ne!(level_before, level_after, "edge lands at 100000-69888");
    }

    // --- Generalized data flattening ---

    fn sym(polarity: u8, pulses: &[u16]) -> GdbSymbol {
        GdbSymbol {
            polarity,
            pulses: pulses.to_vec(),
        }
    }

    #[test]
    fn gdb_edge_symbols_produce_plain_toggles() {
        let mut flat = GdbFlattener::new(true);
        flat.emit(&sym(0x00, &[100, 100]));
        flat.emit(&sym(0x00, &[200]));
        let (initial, list) = flat.finish();
        // First symbol starts opposite the entry level
        assert!(!initial);
        assert_eq!(list, vec![100, 100, 200]);
    }

    #[test]
    fn gdb_continue_fuses_into_previous_half_wave() {
        let mut flat = GdbFlattener::new(false);
        flat.emit(&sym(0x00, &[100]));
        // Continue-same: its first pulse extends the 100 into 150
        flat.emit(&sym(0x01, &[50, 80]));
        let (initial, list) = flat.finish();
        assert!(initial);
        assert_eq!(list, vec![150, 80]);
    }

    #[test]
    fn gdb_force_level_fuses_when_already_there() {
        // Entry low; first symbol toggles high (100). Force-high symbol
        // must fuse; force-low must toggle.
        let mut flat = GdbFlattener::new(false);
        flat.emit(&sym(0x00, &[100]));
        flat.emit(&sym(0x03, &[40])); // already high → fuse
        flat.emit(&sym(0x02, &[60])); // low → natural toggle
        let (initial, list) = flat.finish();
        assert!(initial);
        assert_eq!(list, vec![140, 60]);
    }

    #[test]
    fn gdb_block_plays_through_deck() {
        let blocks = vec![TzxBlock::GeneralizedData {
            pause_ms: 0,
            pilot_symbols: vec![sym(0x00, &[100])],
            pilot_stream: vec![(0, 4)],
            data_symbols: vec![sym(0x00, &[10, 10]), sym(0x00, &[20, 20])],
            data_symbol_count: 8,
            data_stream: vec![0xA5],
        }];
        let mut deck = deck_with(blocks);
        deck.play(0);

        let transitions = edges(&mut deck, 0, 2000);
        // 4 pilot half-waves + 16 data half-waves; the last boundary's
        // toggle collapses into the end-of-tape high level.
        assert_eq!(transitions.len(), 19);
    }

    #[test]
    fn gdb_data_symbols_decode_bit_packed_stream() {
        assert_eq!(extract_bits(&[0xA5], 0, 1), 1);
        assert_eq!(extract_bits(&[0xA5], 1, 1), 0);
        assert_eq!(extract_bits(&[0xA5], 7, 1), 1);
        // 2-bit symbols from $B4 = 10 11 01 00
        assert_eq!(extract_bits(&[0xB4], 0, 2), 0b10);
        assert_eq!(extract_bits(&[0xB4], 1, 2), 0b11);
        assert_eq!(extract_bits(&[0xB4], 2, 2), 0b01);
        assert_eq!(extract_bits(&[0xB4], 3, 2), 0b00);
    }
}
