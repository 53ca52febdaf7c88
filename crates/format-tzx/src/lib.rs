//! TZX file format parser.
//!
//! TZX describes tape signals as T-state-accurate pulse timing rather than
//! decoded bytes, which is what turbo loaders and protection schemes need.
//! A file opens with the 10-byte signature (`"ZXTape!" + 0x1A` + major +
//! minor) and continues as a stream of ID-tagged blocks. The legacy IDs
//! $00 and $02 alias $10 and $12.
//!
//! Playable blocks parse into structured timing data for the tape deck;
//! informational blocks (text, archive info, hardware lists, custom info,
//! glue) parse into metadata or `Unknown` and play as silence.
//!
//! Reference: <https://worldofspectrum.net/TZXformat.html>

#![allow(clippy::cast_possible_truncation)]

/// A parsed TZX file.
#[derive(Debug, Clone)]
pub struct TzxFile {
    pub major: u8,
    pub minor: u8,
    pub blocks: Vec<TzxBlock>,
}

/// One pulse symbol of a Generalized Data block: a polarity flag and up to
/// `max_pulses` half-wave durations (a zero duration ends the list early).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdbSymbol {
    /// Bits 0-1 of the flag byte:
    /// 00 = edge (toggle), 01 = continue previous level,
    /// 10 = force low, 11 = force high.
    pub polarity: u8,
    /// Half-wave durations in T-states.
    pub pulses: Vec<u16>,
}

/// A single TZX block.
#[derive(Debug, Clone)]
pub enum TzxBlock {
    /// Block $10 (and legacy $00): standard speed data, ROM timing.
    StandardSpeed { pause_ms: u16, data: Vec<u8> },
    /// Block $11: turbo speed data with explicit timing.
    TurboSpeed {
        pilot_pulse: u16,
        sync1: u16,
        sync2: u16,
        zero_pulse: u16,
        one_pulse: u16,
        pilot_count: u16,
        used_bits: u8,
        pause_ms: u16,
        data: Vec<u8>,
    },
    /// Block $12 (and legacy $02): pure tone, `count` pulses of one length.
    PureTone { pulse_len: u16, count: u16 },
    /// Block $13: arbitrary sequence of half-wave lengths.
    PulseSequence { pulses: Vec<u16> },
    /// Block $14: data bits with explicit timings, no pilot or sync.
    PureData {
        zero_pulse: u16,
        one_pulse: u16,
        used_bits: u8,
        pause_ms: u16,
        data: Vec<u8>,
    },
    /// Block $15: direct recording — one bit per sample, level = bit value.
    DirectRecording {
        tstates_per_sample: u16,
        pause_ms: u16,
        used_bits: u8,
        data: Vec<u8>,
    },
    /// Block $18: CSW recording, pre-decoded to half-wave lengths in
    /// T-states (only the uncompressed variant is supported).
    CswRecording { pause_ms: u16, pulses: Vec<u32> },
    /// Block $19: generalized data — two symbol alphabets, a PRLE-encoded
    /// pilot/sync stream and a bit-packed data stream.
    GeneralizedData {
        pause_ms: u16,
        /// Pilot/sync symbol alphabet.
        pilot_symbols: Vec<GdbSymbol>,
        /// PRLE stream: (symbol index, repeat count).
        pilot_stream: Vec<(u8, u16)>,
        /// Data symbol alphabet.
        data_symbols: Vec<GdbSymbol>,
        /// Number of symbols in the data stream.
        data_symbol_count: u32,
        /// Bit-packed data stream, ceil(log2(alphabet size)) bits/symbol,
        /// MSB first.
        data_stream: Vec<u8>,
    },
    /// Block $20: pause in ms; 0 means stop the tape.
    Pause { duration_ms: u16 },
    /// Block $21: group start (informational).
    GroupStart { name: String },
    /// Block $22: group end.
    GroupEnd,
    /// Block $24: loop start.
    LoopStart { repetitions: u16 },
    /// Block $25: loop end.
    LoopEnd,
    /// Block $2A: stop the tape if in 48K mode.
    StopIf48K,
    /// Block $2B: set the signal level explicitly.
    SetSignalLevel { level: bool },
    /// Block $30: text description.
    TextDescription { text: String },
    /// Block $31: message to display for a number of seconds.
    Message { duration_s: u8, text: String },
    /// Block $32: archive info entries (id, text).
    ArchiveInfo { entries: Vec<(u8, String)> },
    /// Unknown or non-playable block, skipped gracefully.
    Unknown { block_id: u8 },
}

/// TZX header magic: "ZXTape!" + 0x1A.
const MAGIC: &[u8; 8] = b"ZXTape!\x1A";

/// CPU clock used to convert CSW sample counts to T-states.
const CPU_FREQUENCY: u64 = 3_500_000;

impl TzxFile {
    /// Parse a TZX file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is wrong or a block is truncated
    /// or malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let mut r = Reader::new(bytes);

        if r.take(8, "signature").is_err() || &bytes[0..8] != MAGIC {
            return Err("not a TZX file (missing \"ZXTape!\" signature)".to_string());
        }
        let major = r.byte("major version")?;
        let minor = r.byte("minor version")?;

        let mut blocks = Vec::new();
        while !r.done() {
            let id = r.byte("block id")?;
            blocks.push(parse_block(id, &mut r)?);
        }

        Ok(Self {
            major,
            minor,
            blocks,
        })
    }
}

/// Bits needed to encode one symbol of an alphabet with `n` entries.
#[must_use]
pub fn bits_per_symbol(n: usize) -> u8 {
    let mut bits = 1u8;
    while (1usize << bits) < n {
        bits += 1;
    }
    bits
}

// ---------------------------------------------------------------------------
// Byte cursor
// ---------------------------------------------------------------------------

/// A little-endian cursor over the file. Every read names what it was
/// reading so truncation errors point at the guilty field.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(format!(
                "TZX {what}: need {n} bytes at offset {}, only {} left",
                self.pos,
                self.bytes.len() - self.pos
            ));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize, what: &str) -> Result<(), String> {
        self.take(n, what).map(|_| ())
    }

    fn byte(&mut self, what: &str) -> Result<u8, String> {
        Ok(self.take(1, what)?[0])
    }

    fn word(&mut self, what: &str) -> Result<u16, String> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, what: &str) -> Result<u32, String> {
        let b = self.take(3, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn dword(&mut self, what: &str) -> Result<u32, String> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A one-byte-length-prefixed text field.
    fn short_string(&mut self, what: &str) -> Result<String, String> {
        let len = usize::from(self.byte(what)?);
        let raw = self.take(len, what)?;
        Ok(String::from_utf8_lossy(raw).to_string())
    }
}

// ---------------------------------------------------------------------------
// Block parsing
// ---------------------------------------------------------------------------

fn parse_block(id: u8, r: &mut Reader) -> Result<TzxBlock, String> {
    let block = match id {
        // Standard speed data: pause, u16 length, body
        0x10 | 0x00 => {
            let pause_ms = r.word("standard-speed pause")?;
            let len = usize::from(r.word("standard-speed length")?);
            TzxBlock::StandardSpeed {
                pause_ms,
                data: r.take(len, "standard-speed data")?.to_vec(),
            }
        }

        // Turbo speed data: five timing words, pilot count, used bits,
        // pause, u24 length, body
        0x11 => {
            let pilot_pulse = r.word("turbo pilot pulse")?;
            let sync1 = r.word("turbo sync1")?;
            let sync2 = r.word("turbo sync2")?;
            let zero_pulse = r.word("turbo zero pulse")?;
            let one_pulse = r.word("turbo one pulse")?;
            let pilot_count = r.word("turbo pilot count")?;
            let used_bits = r.byte("turbo used bits")?;
            let pause_ms = r.word("turbo pause")?;
            let len = r.u24("turbo length")? as usize;
            TzxBlock::TurboSpeed {
                pilot_pulse,
                sync1,
                sync2,
                zero_pulse,
                one_pulse,
                pilot_count,
                used_bits,
                pause_ms,
                data: r.take(len, "turbo data")?.to_vec(),
            }
        }

        // Pure tone: half-wave length and pulse count
        0x12 | 0x02 => TzxBlock::PureTone {
            pulse_len: r.word("pure-tone pulse length")?,
            count: r.word("pure-tone count")?,
        },

        // Pulse sequence: one byte count, then that many half-wave words
        0x13 => {
            let count = usize::from(r.byte("pulse-sequence count")?);
            let mut pulses = Vec::with_capacity(count);
            for _ in 0..count {
                pulses.push(r.word("pulse-sequence entry")?);
            }
            TzxBlock::PulseSequence { pulses }
        }

        // Pure data: bit timings, used bits, pause, u24 length, body
        0x14 => {
            let zero_pulse = r.word("pure-data zero pulse")?;
            let one_pulse = r.word("pure-data one pulse")?;
            let used_bits = r.byte("pure-data used bits")?;
            let pause_ms = r.word("pure-data pause")?;
            let len = r.u24("pure-data length")? as usize;
            TzxBlock::PureData {
                zero_pulse,
                one_pulse,
                used_bits,
                pause_ms,
                data: r.take(len, "pure-data data")?.to_vec(),
            }
        }

        // Direct recording: sample period, pause, used bits, u24 length
        0x15 => {
            let tstates_per_sample = r.word("direct-recording sample period")?;
            let pause_ms = r.word("direct-recording pause")?;
            let used_bits = r.byte("direct-recording used bits")?;
            let len = r.u24("direct-recording length")? as usize;
            TzxBlock::DirectRecording {
                tstates_per_sample,
                pause_ms,
                used_bits,
                data: r.take(len, "direct-recording data")?.to_vec(),
            }
        }

        0x18 => parse_csw(r)?,
        0x19 => parse_generalized(r)?,

        // Pause (0 = stop the tape)
        0x20 => TzxBlock::Pause {
            duration_ms: r.word("pause duration")?,
        },

        0x21 => TzxBlock::GroupStart {
            name: r.short_string("group name")?,
        },
        0x22 => TzxBlock::GroupEnd,

        0x24 => TzxBlock::LoopStart {
            repetitions: r.word("loop count")?,
        },
        0x25 => TzxBlock::LoopEnd,

        // Stop-if-48K carries a (zero) dword length
        0x2A => {
            r.skip(4, "stop-if-48K length")?;
            TzxBlock::StopIf48K
        }

        // Set signal level: dword length (1) then the level byte
        0x2B => {
            r.skip(4, "signal-level length")?;
            TzxBlock::SetSignalLevel {
                level: r.byte("signal level")? != 0,
            }
        }

        0x30 => TzxBlock::TextDescription {
            text: r.short_string("text description")?,
        },

        // Message: display seconds, then the text
        0x31 => {
            let duration_s = r.byte("message duration")?;
            TzxBlock::Message {
                duration_s,
                text: r.short_string("message text")?,
            }
        }

        0x32 => parse_archive_info(r)?,

        other => skip_block(other, r)?,
    };
    Ok(block)
}

/// Block $18: CSW recording. Only compression type 1 (raw run lengths) is
/// supported; run lengths convert from samples at the stated rate to
/// half-wave durations in T-states.
fn parse_csw(r: &mut Reader) -> Result<TzxBlock, String> {
    let body_len = r.dword("CSW length")? as usize;
    let mut body = Reader::new(r.take(body_len, "CSW body")?);

    let pause_ms = body.word("CSW pause")?;
    let sample_rate = body.u24("CSW sample rate")?;
    let compression = body.byte("CSW compression")?;
    let stored_pulses = body.dword("CSW pulse count")? as usize;

    if compression != 1 {
        return Err(format!(
            "CSW recording uses compression type {compression}; only raw (1) is supported"
        ));
    }
    if sample_rate == 0 {
        return Err("CSW recording has a zero sample rate".to_string());
    }

    // Raw CSW: each byte is a run length in samples; 0 escapes to a
    // 4-byte little-endian count.
    let mut pulses = Vec::with_capacity(stored_pulses);
    while !body.done() {
        let run = match body.byte("CSW run")? {
            0 => body.dword("CSW long run")?,
            short => u32::from(short),
        };
        let tstates = (u64::from(run) * CPU_FREQUENCY / u64::from(sample_rate)) as u32;
        pulses.push(tstates.max(1));
    }

    Ok(TzxBlock::CswRecording { pause_ms, pulses })
}

/// One symbol alphabet of a Generalized Data block: `count` definitions of
/// one flag byte plus `max_pulses` duration slots, where a zero duration
/// ends the symbol early.
fn parse_gdb_alphabet(
    body: &mut Reader,
    count: usize,
    max_pulses: usize,
) -> Result<Vec<GdbSymbol>, String> {
    let mut symbols = Vec::with_capacity(count);
    for _ in 0..count {
        let polarity = body.byte("symbol flags")? & 0x03;
        let mut pulses = Vec::new();
        let mut ended = false;
        for _ in 0..max_pulses {
            let duration = body.word("symbol pulse")?;
            if duration == 0 {
                ended = true;
            }
            if !ended {
                pulses.push(duration);
            }
        }
        symbols.push(GdbSymbol { polarity, pulses });
    }
    Ok(symbols)
}

/// Block $19: generalized data.
fn parse_generalized(r: &mut Reader) -> Result<TzxBlock, String> {
    let body_len = r.dword("generalized-data length")? as usize;
    let mut body = Reader::new(r.take(body_len, "generalized-data body")?);

    let pause_ms = body.word("generalized-data pause")?;
    let totp = body.dword("pilot symbol total")? as usize;
    let npp = usize::from(body.byte("pilot pulses per symbol")?);
    let asp = match body.byte("pilot alphabet size")? {
        0 => 256,
        n => usize::from(n),
    };
    let totd = body.dword("data symbol total")?;
    let npd = usize::from(body.byte("data pulses per symbol")?);
    let asd = match body.byte("data alphabet size")? {
        0 => 256,
        n => usize::from(n),
    };

    let mut pilot_symbols = Vec::new();
    let mut pilot_stream = Vec::new();
    if totp > 0 {
        pilot_symbols = parse_gdb_alphabet(&mut body, asp, npp)?;
        pilot_stream.reserve(totp);
        for _ in 0..totp {
            let symbol = body.byte("pilot stream symbol")?;
            let repeats = body.word("pilot stream repeat count")?;
            pilot_stream.push((symbol, repeats));
        }
    }

    let mut data_symbols = Vec::new();
    let mut data_stream = Vec::new();
    if totd > 0 {
        data_symbols = parse_gdb_alphabet(&mut body, asd, npd)?;
        let stream_bits = totd as usize * usize::from(bits_per_symbol(asd));
        data_stream = body
            .take(stream_bits.div_ceil(8), "data stream")?
            .to_vec();
    }

    // Trailing declared-but-unparsed bytes in the body are tolerated: the
    // outer reader already sits past the whole block.
    Ok(TzxBlock::GeneralizedData {
        pause_ms,
        pilot_symbols,
        pilot_stream,
        data_symbols,
        data_symbol_count: totd,
        data_stream,
    })
}

/// Block $32: archive info.
fn parse_archive_info(r: &mut Reader) -> Result<TzxBlock, String> {
    let body_len = usize::from(r.word("archive-info length")?);
    let mut body = Reader::new(r.take(body_len, "archive-info body")?);

    let count = usize::from(body.byte("archive-info entry count")?);
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        // A malformed count just ends the list early
        let Ok(id) = body.byte("archive-info entry id") else {
            break;
        };
        let Ok(text) = body.short_string("archive-info entry text") else {
            break;
        };
        entries.push((id, text));
    }

    Ok(TzxBlock::ArchiveInfo { entries })
}

/// Skip a non-playable block using its length scheme. Truly unknown IDs
/// fall back to the dword-length convention newer block types follow.
fn skip_block(id: u8, r: &mut Reader) -> Result<TzxBlock, String> {
    match id {
        // Call sequence: word count, then that many word offsets
        0x23 => {
            let count = usize::from(r.word("call-sequence count")?);
            r.skip(count * 2, "call-sequence offsets")?;
        }
        // Return from sequence: no payload
        0x26 => {}
        // Select block / jump-to: word length, then the payload
        0x27 | 0x28 => {
            let len = usize::from(r.word("select/jump length")?);
            r.skip(len, "select/jump payload")?;
        }
        // Hardware type: byte count of 3-byte records
        0x33 => {
            let count = usize::from(r.byte("hardware-type count")?);
            r.skip(count * 3, "hardware-type records")?;
        }
        // Custom info: 16-byte identifier, dword length, payload
        0x35 => {
            r.skip(16, "custom-info identifier")?;
            let len = r.dword("custom-info length")? as usize;
            r.skip(len, "custom-info payload")?;
        }
        // Glue block: fixed 9 bytes
        0x5A => r.skip(9, "glue block")?,
        _ => {
            let len = r
                .dword(&format!("unknown block ${id:02X} length"))
                .map_err(|_| {
                    format!(
                        "unknown TZX block ${id:02X} at offset {} with no length to skip by",
                        r.offset().saturating_sub(1)
                    )
                })? as usize;
            r.skip(len, "unknown block payload")?;
        }
    }
    Ok(TzxBlock::Unknown { block_id: id })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut raw = MAGIC.to_vec();
        raw.push(1); // major
        raw.push(20); // minor
        raw
    }

    fn w16(out: &mut Vec<u8>, value: u16) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn w24(out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    fn w32(out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn empty_file_after_header() {
        let tzx = TzxFile::parse(&header()).expect("valid empty TZX");
        assert_eq!(tzx.major, 1);
        assert_eq!(tzx.minor, 20);
        assert!(tzx.blocks.is_empty());
    }

    #[test]
    fn missing_or_bad_signature_rejected() {
        assert!(TzxFile::parse(&[]).is_err());
        assert!(TzxFile::parse(&[0; 9]).is_err());

        let mut raw = header();
        raw[0] = b'X';
        assert!(TzxFile::parse(&raw).is_err());
    }

    #[test]
    fn standard_speed_block() {
        let mut raw = header();
        raw.push(0x10);
        w16(&mut raw, 1000); // pause
        let payload = [0x00, 0x01, 0x02, 0x03];
        w16(&mut raw, payload.len() as u16);
        raw.extend_from_slice(&payload);

        let tzx = TzxFile::parse(&raw).expect("standard speed block");
        match &tzx.blocks[0] {
            TzxBlock::StandardSpeed { pause_ms, data } => {
                assert_eq!(*pause_ms, 1000);
                assert_eq!(data, &payload);
            }
            other => panic!("Expected StandardSpeed, got {other:?}"),
        }
    }

    #[test]
    fn legacy_aliases_map_to_modern_blocks() {
        let mut raw = header();
        raw.push(0x00); // alias of $10
        w16(&mut raw, 500);
        w16(&mut raw, 1);
        raw.push(0xFF);
        raw.push(0x02); // alias of $12
        w16(&mut raw, 2168);
        w16(&mut raw, 100);

        let tzx = TzxFile::parse(&raw).expect("legacy blocks");
        assert!(matches!(tzx.blocks[0], TzxBlock::StandardSpeed { .. }));
        assert!(matches!(tzx.blocks[1], TzxBlock::PureTone { .. }));
    }

    #[test]
    fn turbo_speed_block() {
        let mut raw = header();
        raw.push(0x11);
        for timing in [2168u16, 667, 735, 855, 1710, 3223] {
            w16(&mut raw, timing);
        }
        raw.push(8); // used bits
        w16(&mut raw, 1000); // pause
        let payload = [0xFF, 0xAA];
        w24(&mut raw, payload.len() as u32);
        raw.extend_from_slice(&payload);

        let tzx = TzxFile::parse(&raw).expect("turbo speed block");
        match &tzx.blocks[0] {
            TzxBlock::TurboSpeed {
                pilot_pulse,
                sync1,
                sync2,
                zero_pulse,
                one_pulse,
                pilot_count,
                used_bits,
                pause_ms,
                data,
            } => {
                assert_eq!(
                    (*pilot_pulse, *sync1, *sync2, *zero_pulse, *one_pulse),
                    (2168, 667, 735, 855, 1710)
                );
                assert_eq!(*pilot_count, 3223);
                assert_eq!(*used_bits, 8);
                assert_eq!(*pause_ms, 1000);
                assert_eq!(data, &payload);
            }
            other => panic!("Expected TurboSpeed, got {other:?}"),
        }
    }

    #[test]
    fn pulse_sequence_block() {
        let mut raw = header();
        raw.push(0x13);
        raw.push(3);
        for pulse in [100u16, 200, 300] {
            w16(&mut raw, pulse);
        }

        let tzx = TzxFile::parse(&raw).expect("pulse sequence");
        match &tzx.blocks[0] {
            TzxBlock::PulseSequence { pulses } => assert_eq!(pulses, &[100, 200, 300]),
            other => panic!("Expected PulseSequence, got {other:?}"),
        }
    }

    #[test]
    fn pure_data_block() {
        let mut raw = header();
        raw.push(0x14);
        w16(&mut raw, 855);
        w16(&mut raw, 1710);
        raw.push(6); // used bits
        w16(&mut raw, 500);
        w24(&mut raw, 1);
        raw.push(0xAB);

        let tzx = TzxFile::parse(&raw).expect("pure data");
        match &tzx.blocks[0] {
            TzxBlock::PureData {
                zero_pulse,
                one_pulse,
                used_bits,
                pause_ms,
                data,
            } => {
                assert_eq!((*zero_pulse, *one_pulse), (855, 1710));
                assert_eq!(*used_bits, 6);
                assert_eq!(*pause_ms, 500);
                assert_eq!(data, &[0xAB]);
            }
            other => panic!("Expected PureData, got {other:?}"),
        }
    }

    #[test]
    fn direct_recording_block() {
        let mut raw = header();
        raw.push(0x15);
        w16(&mut raw, 79); // T-states per sample (≈44.1 kHz)
        w16(&mut raw, 0); // pause
        raw.push(8); // used bits
        let payload = [0b1010_1010, 0b1111_0000];
        w24(&mut raw, payload.len() as u32);
        raw.extend_from_slice(&payload);

        let tzx = TzxFile::parse(&raw).expect("direct recording");
        match &tzx.blocks[0] {
            TzxBlock::DirectRecording {
                tstates_per_sample,
                pause_ms,
                used_bits,
                data,
            } => {
                assert_eq!(*tstates_per_sample, 79);
                assert_eq!(*pause_ms, 0);
                assert_eq!(*used_bits, 8);
                assert_eq!(data, &payload);
            }
            other => panic!("Expected DirectRecording, got {other:?}"),
        }
    }

    #[test]
    fn csw_recording_raw_runs() {
        let mut raw = header();
        raw.push(0x18);
        let runs = [10u8, 0, 20, 0, 0, 5, 0, 0, 0]; // 10, long(5), 20 samples
        w32(&mut raw, (2 + 3 + 1 + 4 + runs.len()) as u32); // body length
        w16(&mut raw, 0); // pause
        w24(&mut raw, 3_500_000); // 1 sample = 1 T-state
        raw.push(1); // compression: raw
        w32(&mut raw, 3); // stored pulses
        raw.extend_from_slice(&runs);

        let tzx = TzxFile::parse(&raw).expect("csw recording");
        match &tzx.blocks[0] {
            TzxBlock::CswRecording { pulses, .. } => assert_eq!(pulses, &[10, 5, 20]),
            other => panic!("Expected CswRecording, got {other:?}"),
        }
    }

    #[test]
    fn csw_zrle_compression_rejected() {
        let mut raw = header();
        raw.push(0x18);
        w32(&mut raw, 10);
        w16(&mut raw, 0);
        w24(&mut raw, 44_100);
        raw.push(2); // Z-RLE
        w32(&mut raw, 0);

        assert!(TzxFile::parse(&raw).is_err());
    }

    /// One pilot symbol repeated 100 times, then a 2-symbol alphabet
    /// encoding the 8 bits of $A5.
    fn generalized_data_raw() -> Vec<u8> {
        let mut body: Vec<u8> = Vec::new();
        w16(&mut body, 0); // pause
        w32(&mut body, 1); // TOTP: one stream entry
        body.push(1); // NPP
        body.push(1); // ASP
        w32(&mut body, 8); // TOTD: 8 data symbols
        body.push(2); // NPD
        body.push(2); // ASD

        // Pilot alphabet: one edge symbol of 2168 T-states
        body.push(0x00);
        w16(&mut body, 2168);
        // Pilot stream: symbol 0 × 100
        body.push(0);
        w16(&mut body, 100);

        // Data alphabet: zero bit (855, 855) and one bit (1710, 1710)
        for pulse in [855u16, 1710] {
            body.push(0x00);
            w16(&mut body, pulse);
            w16(&mut body, pulse);
        }

        // Data stream: 8 × 1 bit = $A5
        body.push(0xA5);

        let mut raw = header();
        raw.push(0x19);
        w32(&mut raw, body.len() as u32);
        raw.extend_from_slice(&body);
        raw
    }

    #[test]
    fn generalized_data_block() {
        let tzx = TzxFile::parse(&generalized_data_raw()).expect("generalized data");
        match &tzx.blocks[0] {
            TzxBlock::GeneralizedData {
                pilot_symbols,
                pilot_stream,
                data_symbols,
                data_symbol_count,
                data_stream,
                ..
            } => {
                assert_eq!(pilot_symbols.len(), 1);
                assert_eq!(pilot_symbols[0].pulses, vec![2168]);
                assert_eq!(pilot_stream, &[(0, 100)]);
                assert_eq!(data_symbols.len(), 2);
                assert_eq!(data_symbols[1].pulses, vec![1710, 1710]);
                assert_eq!(*data_symbol_count, 8);
                assert_eq!(data_stream, &[0xA5]);
            }
            other => panic!("Expected GeneralizedData, got {other:?}"),
        }
    }

    #[test]
    fn gdb_zero_pulse_ends_a_symbol_early() {
        let mut body: Vec<u8> = Vec::new();
        w16(&mut body, 0); // pause
        w32(&mut body, 1); // TOTP
        body.push(3); // NPP: three slots
        body.push(1); // ASP
        w32(&mut body, 0); // TOTD: none
        body.push(0);
        body.push(1);

        // Two real pulses, third slot zero
        body.push(0x00);
        for pulse in [100u16, 200, 0] {
            w16(&mut body, pulse);
        }
        // Stream entry
        body.push(0);
        w16(&mut body, 1);

        let mut raw = header();
        raw.push(0x19);
        w32(&mut raw, body.len() as u32);
        raw.extend_from_slice(&body);

        let tzx = TzxFile::parse(&raw).expect("short symbol parses");
        match &tzx.blocks[0] {
            TzxBlock::GeneralizedData { pilot_symbols, .. } => {
                assert_eq!(pilot_symbols[0].pulses, vec![100, 200]);
            }
            other => panic!("Expected GeneralizedData, got {other:?}"),
        }
    }

    #[test]
    fn pause_and_loop_blocks() {
        let mut raw = header();
        raw.push(0x20);
        w16(&mut raw, 2000);
        raw.push(0x24);
        w16(&mut raw, 5);
        raw.push(0x25);

        let tzx = TzxFile::parse(&raw).expect("pause + loop");
        assert!(matches!(tzx.blocks[0], TzxBlock::Pause { duration_ms: 2000 }));
        assert!(matches!(tzx.blocks[1], TzxBlock::LoopStart { repetitions: 5 }));
        assert!(matches!(tzx.blocks[2], TzxBlock::LoopEnd));
    }

    #[test]
    fn group_stop_and_level_blocks() {
        let mut raw = header();
        raw.push(0x21);
        raw.push(7);
        raw.extend_from_slice(b"Level 1");
        raw.push(0x22);
        raw.push(0x2A);
        w32(&mut raw, 0);
        raw.push(0x2B);
        w32(&mut raw, 1);
        raw.push(1);

        let tzx = TzxFile::parse(&raw).expect("group/stop/level blocks");
        match &tzx.blocks[0] {
            TzxBlock::GroupStart { name } => assert_eq!(name, "Level 1"),
            other => panic!("Expected GroupStart, got {other:?}"),
        }
        assert!(matches!(tzx.blocks[1], TzxBlock::GroupEnd));
        assert!(matches!(tzx.blocks[2], TzxBlock::StopIf48K));
        assert!(matches!(
            tzx.blocks[3],
            TzxBlock::SetSignalLevel { level: true }
        ));
    }

    #[test]
    fn text_and_message_blocks() {
        let mut raw = header();
        raw.push(0x30);
        raw.push(11);
        raw.extend_from_slice(b"Hello World");
        raw.push(0x31);
        raw.push(3); // seconds
        raw.push(4);
        raw.extend_from_slice(b"Wait");

        let tzx = TzxFile::parse(&raw).expect("text blocks");
        match &tzx.blocks[0] {
            TzxBlock::TextDescription { text } => assert_eq!(text, "Hello World"),
            other => panic!("Expected TextDescription, got {other:?}"),
        }
        match &tzx.blocks[1] {
            TzxBlock::Message { duration_s, text } => {
                assert_eq!(*duration_s, 3);
                assert_eq!(text, "Wait");
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn archive_info_entries() {
        let mut raw = header();
        raw.push(0x32);
        w16(&mut raw, 13); // body: count + (2+5) + (2+3)
        raw.push(2);
        raw.push(0x00); // title
        raw.push(5);
        raw.extend_from_slice(b"Hello");
        raw.push(0x02); // author
        raw.push(3);
        raw.extend_from_slice(b"Bob");

        let tzx = TzxFile::parse(&raw).expect("archive info");
        match &tzx.blocks[0] {
            TzxBlock::ArchiveInfo { entries } => {
                assert_eq!(
                    entries,
                    &[(0x00, "Hello".to_string()), (0x02, "Bob".to_string())]
                );
            }
            other => panic!("Expected ArchiveInfo, got {other:?}"),
        }
    }

    #[test]
    fn non_playable_blocks_become_unknown() {
        let mut raw = header();
        // $33 hardware type: 1 record
        raw.push(0x33);
        raw.push(1);
        raw.extend_from_slice(&[0, 0, 0]);
        // $35 custom info
        raw.push(0x35);
        raw.extend_from_slice(&[b'X'; 16]);
        w32(&mut raw, 2);
        raw.extend_from_slice(&[1, 2]);
        // $5A glue
        raw.push(0x5A);
        raw.extend_from_slice(&[0u8; 9]);
        // $23 call sequence: 2 offsets
        raw.push(0x23);
        w16(&mut raw, 2);
        w16(&mut raw, 1);
        w16(&mut raw, 2);

        let tzx = TzxFile::parse(&raw).expect("skippable blocks");
        assert_eq!(tzx.blocks.len(), 4);
        for block in &tzx.blocks {
            assert!(matches!(block, TzxBlock::Unknown { .. }));
        }
    }

    #[test]
    fn bits_per_symbol_rounds_up() {
        assert_eq!(bits_per_symbol(2), 1);
        assert_eq!(bits_per_symbol(3), 2);
        assert_eq!(bits_per_symbol(4), 2);
        assert_eq!(bits_per_symbol(5), 3);
        assert_eq!(bits_per_symbol(256), 8);
    }

    #[test]
    fn truncated_block_names_the_field() {
        let mut raw = header();
        raw.push(0x10); // standard speed with nothing after
        let err = TzxFile::parse(&raw).expect_err("truncation must fail");
        assert!(err.contains("standard-speed pause"), "{err}");
    }
}
