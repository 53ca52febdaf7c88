//! TAP file format parser.
//!
//! A TAP file is nothing more than the byte stream a Spectrum would have
//! written to tape, chopped into blocks: each block is a little-endian
//! `u16` length followed by that many payload bytes. On tape, a block is
//! flag byte + data + checksum, where the checksum XORs the flag and every
//! data byte, so the whole body XORs to zero when intact.
//!
//! A typical program is a 19-byte header block (flag $00) followed by a
//! data block (flag $FF). The pulse schedule for replaying a block — pilot
//! tone, sync pair, two half-waves per bit — lives with the machine's tape
//! deck; this crate only validates and splits the stream.

/// A single block from a TAP file.
///
/// `data` holds the complete on-tape body (flag, data bytes, checksum),
/// because the pulse engine transmits all of it.
#[derive(Debug, Clone)]
pub struct TapBlock {
    /// Flag byte: $00 = header, $FF = data.
    pub flag: u8,
    /// The complete block as transmitted: flag + data + checksum.
    pub data: Vec<u8>,
}

impl TapBlock {
    /// The data bytes between the flag and the checksum.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[1..self.data.len() - 1]
    }

    /// Split one block off the front of `bytes`. `offset` is the absolute
    /// file position of `bytes`, used for error reporting only.
    fn split_next(bytes: &[u8], offset: usize) -> Result<(Self, &[u8]), String> {
        let [lo, hi, rest @ ..] = bytes else {
            return Err(format!(
                "TAP stream ends mid-length-word at offset {offset}"
            ));
        };
        let body_len = usize::from(u16::from_le_bytes([*lo, *hi]));

        // A body is at least the flag and the checksum
        if body_len < 2 {
            return Err(format!(
                "TAP block at offset {offset} declares {body_len} bytes; a block needs at least a flag and a checksum"
            ));
        }
        if rest.len() < body_len {
            return Err(format!(
                "TAP block at offset {offset} declares {body_len} bytes but the file holds only {} more",
                rest.len()
            ));
        }

        let (body, tail) = rest.split_at(body_len);

        // Flag, data and checksum together XOR to zero on an intact block
        let residue = body.iter().fold(0u8, |acc, &byte| acc ^ byte);
        if residue != 0 {
            return Err(format!(
                "TAP block at offset {offset} fails its checksum (XOR residue ${residue:02X})"
            ));
        }

        Ok((
            Self {
                flag: body[0],
                data: body.to_vec(),
            },
            tail,
        ))
    }
}

/// A parsed TAP file containing sequential blocks.
#[derive(Debug, Clone)]
pub struct TapFile {
    /// The blocks in the TAP file, in order.
    pub blocks: Vec<TapBlock>,
}

impl TapFile {
    /// Parse a TAP file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on a truncated length word or body, an impossible
    /// block length, or a checksum failure.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let mut blocks = Vec::new();
        let mut rest = bytes;

        while !rest.is_empty() {
            let offset = bytes.len() - rest.len();
            let (block, tail) = TapBlock::split_next(rest, offset)?;
            blocks.push(block);
            rest = tail;
        }

        Ok(Self { blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Append one well-formed block (length word, flag, data, checksum).
    fn push_block(out: &mut Vec<u8>, flag: u8, data: &[u8]) {
        let body_len = (data.len() + 2) as u16;
        out.extend_from_slice(&body_len.to_le_bytes());
        out.push(flag);
        out.extend_from_slice(data);
        out.push(data.iter().fold(flag, |acc, &byte| acc ^ byte));
    }

    #[test]
    fn empty_file_is_an_empty_tape() {
        let tap = TapFile::parse(&[]).expect("empty file is valid");
        assert!(tap.blocks.is_empty());
    }

    #[test]
    fn single_block_splits_flag_payload_checksum() {
        let mut raw = Vec::new();
        push_block(&mut raw, 0x00, &[1, 2, 3, 4, 5]);

        let tap = TapFile::parse(&raw).expect("single block should parse");
        assert_eq!(tap.blocks.len(), 1);
        assert_eq!(tap.blocks[0].flag, 0x00);
        assert_eq!(tap.blocks[0].payload(), &[1, 2, 3, 4, 5]);
        // The on-tape body keeps flag and checksum around the payload
        assert_eq!(tap.blocks[0].data.len(), 7);
    }

    #[test]
    fn header_then_data_block() {
        let mut raw = Vec::new();
        push_block(&mut raw, 0x00, &[0u8; 17]); // standard 17-byte header
        push_block(&mut raw, 0xFF, &[0xAA, 0xBB, 0xCC]);

        let tap = TapFile::parse(&raw).expect("two blocks should parse");
        assert_eq!(tap.blocks.len(), 2);
        assert_eq!(tap.blocks[0].flag, 0x00);
        assert_eq!(tap.blocks[0].payload().len(), 17);
        assert_eq!(tap.blocks[1].flag, 0xFF);
        assert_eq!(tap.blocks[1].payload(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn minimum_block_has_no_payload() {
        // Flag $00 with checksum $00 and nothing between
        let tap = TapFile::parse(&[0x02, 0x00, 0x00, 0x00]).expect("minimum block");
        assert_eq!(tap.blocks.len(), 1);
        assert!(tap.blocks[0].payload().is_empty());
    }

    #[test]
    fn truncated_length_word_rejected() {
        assert!(TapFile::parse(&[0x05]).is_err());
    }

    #[test]
    fn truncated_body_rejected() {
        // Declares 5 bytes, supplies 3
        assert!(TapFile::parse(&[0x05, 0x00, 0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn undersized_length_rejected() {
        assert!(TapFile::parse(&[0x00, 0x00]).is_err(), "zero-length body");
        assert!(TapFile::parse(&[0x01, 0x00, 0xFF]).is_err(), "flag only");
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut raw = Vec::new();
        push_block(&mut raw, 0x00, &[1, 2, 3]);
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(TapFile::parse(&raw).is_err());
    }

    #[test]
    fn error_reports_the_failing_offset() {
        let mut raw = Vec::new();
        push_block(&mut raw, 0x00, &[9, 9]); // 6 bytes total
        raw.push(0x44); // dangling length byte

        let err = TapFile::parse(&raw).expect_err("dangling byte must fail");
        assert!(err.contains("offset 6"), "{err}");
    }
}
