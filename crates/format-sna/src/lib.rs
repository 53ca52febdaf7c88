//! SNA snapshot parser for the 48K Spectrum.
//!
//! The 48K SNA format is 49,179 bytes: a 27-byte register header followed by
//! 49,152 bytes of RAM ($4000-$FFFF). PC is not in the header — the snapshot
//! tool pushed it onto the stack, so the loader pops it from the restored SP
//! after RAM is in place.

/// Expected size of a 48K SNA snapshot file.
pub const SNA_48K_SIZE: usize = 49_179;

/// Header size in bytes.
const HEADER_SIZE: usize = 27;

/// A parsed 48K SNA snapshot.
#[derive(Debug, Clone)]
pub struct SnaSnapshot {
    pub i: u8,
    pub hl_alt: u16,
    pub de_alt: u16,
    pub bc_alt: u16,
    pub af_alt: u16,
    pub hl: u16,
    pub de: u16,
    pub bc: u16,
    pub iy: u16,
    pub ix: u16,
    /// IFF2 (bit 2 of header byte 19). IFF1 is restored to the same value.
    pub iff2: bool,
    pub r: u8,
    pub af: u16,
    pub sp: u16,
    pub interrupt_mode: u8,
    /// Border colour 0-7.
    pub border: u8,
    /// 49,152 bytes covering $4000-$FFFF.
    pub ram: Vec<u8>,
}

impl SnaSnapshot {
    /// Parse a 48K SNA snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not exactly 49,179 bytes or the
    /// stack pointer points into ROM (PC could not be popped).
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() != SNA_48K_SIZE {
            return Err(format!(
                "SNA file must be exactly {SNA_48K_SIZE} bytes, got {}",
                data.len()
            ));
        }

        let word = |lo: usize| u16::from(data[lo]) | (u16::from(data[lo + 1]) << 8);

        let sp = word(23);
        if sp < 0x4000 {
            return Err(format!(
                "SNA stack pointer ${sp:04X} points into ROM — cannot pop PC"
            ));
        }

        Ok(Self {
            i: data[0],
            hl_alt: word(1),
            de_alt: word(3),
            bc_alt: word(5),
            af_alt: word(7),
            hl: word(9),
            de: word(11),
            bc: word(13),
            iy: word(15),
            ix: word(17),
            iff2: data[19] & 0x04 != 0,
            r: data[20],
            af: word(21),
            sp,
            interrupt_mode: data[25] & 0x03,
            border: data[26] & 0x07,
            ram: data[HEADER_SIZE..].to_vec(),
        })
    }

    /// The PC value stored on the snapshot's stack.
    #[must_use]
    pub fn stacked_pc(&self) -> u16 {
        let offset = (self.sp - 0x4000) as usize;
        let lo = self.ram[offset];
        let hi = self.ram[(offset + 1) % self.ram.len()];
        u16::from(lo) | (u16::from(hi) << 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sna(sp: u16, pc: u16) -> Vec<u8> {
        let mut data = vec![0u8; SNA_48K_SIZE];

        data[0] = 0x3F; // I
        data[20] = 0x42; // R
        data[21] = 0xFF; // F
        data[22] = 0xAA; // A
        data[23] = sp as u8;
        data[24] = (sp >> 8) as u8;
        data[25] = 1; // IM 1
        data[26] = 2; // Border = red

        let sp_offset = (sp - 0x4000) as usize;
        data[27 + sp_offset] = pc as u8;
        data[27 + sp_offset + 1] = (pc >> 8) as u8;

        data
    }

    #[test]
    fn parse_reads_registers() {
        let sna = SnaSnapshot::parse(&make_sna(0x8000, 0x1234)).expect("valid SNA");
        assert_eq!(sna.i, 0x3F);
        assert_eq!(sna.r, 0x42);
        assert_eq!(sna.af, 0xAAFF);
        assert_eq!(sna.sp, 0x8000);
        assert_eq!(sna.interrupt_mode, 1);
        assert_eq!(sna.border, 2);
        assert_eq!(sna.ram.len(), 49_152);
    }

    #[test]
    fn stacked_pc_reads_from_ram() {
        let sna = SnaSnapshot::parse(&make_sna(0x8000, 0x1234)).expect("valid SNA");
        assert_eq!(sna.stacked_pc(), 0x1234);
    }

    #[test]
    fn iff2_from_bit_2() {
        let mut data = make_sna(0x8000, 0x0000);
        data[19] = 0x04;
        let sna = SnaSnapshot::parse(&data).expect("valid SNA");
        assert!(sna.iff2);

        data[19] = 0x00;
        let sna = SnaSnapshot::parse(&data).expect("valid SNA");
        assert!(!sna.iff2);
    }

    #[test]
    fn wrong_size_rejected() {
        assert!(SnaSnapshot::parse(&[0u8; 100]).is_err());
        assert!(SnaSnapshot::parse(&vec![0u8; SNA_48K_SIZE + 1]).is_err());
    }

    #[test]
    fn sp_in_rom_rejected() {
        let mut data = vec![0u8; SNA_48K_SIZE];
        data[23] = 0x00;
        data[24] = 0x10; // SP = $1000, in ROM
        let result = SnaSnapshot::parse(&data);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("points into ROM"));
    }
}
