//! TR-DOS disk images.
//!
//! A TRD file is a raw sector dump: 16 sectors of 256 bytes per track side,
//! sides interleaved per track (track 0 side 0, track 0 side 1, track 1
//! side 0, ...). Track 0 side 0 holds the filesystem metadata: sectors 0-7
//! are the catalog (128 entries of 16 bytes), sector 8 is the disk info.
//!
//! SCL is an archive of TR-DOS files without the sector layout; it converts
//! to a freshly laid-out TRD for the disk controller (read-only — SCL
//! write-back is not supported).
//!
//! The whole image lives in memory; the mount layer flushes the buffer back
//! to the file when the image is dirty.

#![allow(clippy::cast_possible_truncation)]

/// Bytes per sector.
pub const SECTOR_SIZE: usize = 256;

/// Sectors per track side.
pub const SECTORS_PER_TRACK: usize = 16;

/// Bytes per track side.
pub const TRACK_SIZE: usize = SECTORS_PER_TRACK * SECTOR_SIZE;

/// Maximum catalog entries (8 sectors × 16 entries).
pub const MAX_FILES: usize = 128;

/// Disk-info location: track 0, side 0, sector 8.
const INFO_SECTOR: usize = 8;

/// Disk geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 40 or 80 tracks.
    pub tracks: u8,
    /// 1 or 2 sides.
    pub sides: u8,
}

impl Geometry {
    /// Total image size in bytes.
    #[must_use]
    pub fn image_size(self) -> usize {
        usize::from(self.tracks) * usize::from(self.sides) * TRACK_SIZE
    }

    /// Total sectors on the disk.
    #[must_use]
    pub fn total_sectors(self) -> u16 {
        u16::from(self.tracks) * u16::from(self.sides) * SECTORS_PER_TRACK as u16
    }

    /// Disk-type byte for the info sector.
    #[must_use]
    pub fn disk_type(self) -> u8 {
        match (self.tracks, self.sides) {
            (80, 2) => 0x16,
            (40, 2) => 0x17,
            (80, 1) => 0x18,
            _ => 0x19, // 40/1
        }
    }
}

/// One 16-byte catalog entry.
///
/// An entry is present iff the first filename byte is neither 0x00
/// (end of catalog) nor 0x01 (deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Filename, space-padded.
    pub name: [u8; 8],
    /// Extension type: b'B' (Basic), b'C' (Code), b'D' (Data), b'#' (Print).
    pub ext: u8,
    /// Start address for CODE, autostart line for Basic.
    pub start: u16,
    /// File length in bytes.
    pub length: u16,
    /// Sectors occupied on disk.
    pub sectors_used: u8,
    /// First sector of the file.
    pub start_sector: u8,
    /// First track of the file.
    pub start_track: u8,
}

impl CatalogEntry {
    /// Decode an entry from its 16 raw bytes. Returns `None` for
    /// end-of-catalog and deleted entries.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 16 || raw[0] == 0x00 || raw[0] == 0x01 {
            return None;
        }
        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[0..8]);
        Some(Self {
            name,
            ext: raw[8],
            start: u16::from(raw[9]) | (u16::from(raw[10]) << 8),
            length: u16::from(raw[11]) | (u16::from(raw[12]) << 8),
            sectors_used: raw[13],
            start_sector: raw[14],
            start_track: raw[15],
        })
    }

    /// Encode the entry back to its 16-byte on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0..8].copy_from_slice(&self.name);
        raw[8] = self.ext;
        raw[9] = self.start as u8;
        raw[10] = (self.start >> 8) as u8;
        raw[11] = self.length as u8;
        raw[12] = (self.length >> 8) as u8;
        raw[13] = self.sectors_used;
        raw[14] = self.start_sector;
        raw[15] = self.start_track;
        raw
    }

    /// Filename with trailing spaces trimmed.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name)
            .trim_end_matches(' ')
            .to_string()
    }
}

/// The disk-info record in track 0 side 0 sector 8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub disk_type: u8,
    pub file_count: u8,
    pub free_sectors: u16,
    /// Disk label, 8 bytes at offsets 229-236.
    pub label: [u8; 8],
}

impl DiskInfo {
    /// Decode from a 256-byte info sector.
    #[must_use]
    pub fn parse(sector: &[u8; SECTOR_SIZE]) -> Self {
        let mut label = [0u8; 8];
        label.copy_from_slice(&sector[229..237]);
        Self {
            disk_type: sector[0],
            file_count: sector[1],
            free_sectors: u16::from(sector[2]) | (u16::from(sector[3]) << 8),
            label,
        }
    }

    /// Encode into a 256-byte info sector.
    pub fn encode(&self, sector: &mut [u8; SECTOR_SIZE]) {
        sector.fill(0);
        sector[0] = self.disk_type;
        sector[1] = self.file_count;
        sector[2] = self.free_sectors as u8;
        sector[3] = (self.free_sectors >> 8) as u8;
        sector[4] = 0x10; // TR-DOS id
        sector[229..237].copy_from_slice(&self.label);
    }
}

/// An in-memory TR-DOS disk image.
pub struct TrdImage {
    data: Vec<u8>,
    geometry: Geometry,
    read_only: bool,
    dirty: bool,
}

impl TrdImage {
    /// Parse a TRD image, inferring geometry from the file size and the
    /// disk-type byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the size matches no known geometry.
    pub fn parse(data: &[u8], read_only: bool) -> Result<Self, String> {
        // Size determines candidates; the disk-type byte resolves the
        // ambiguous 327,680-byte case (40/2 vs 80/1).
        let mut geometry = match data.len() {
            655_360 => Geometry { tracks: 80, sides: 2 },
            327_680 => Geometry { tracks: 80, sides: 1 },
            163_840 => Geometry { tracks: 40, sides: 1 },
            other => {
                return Err(format!(
                    "TRD image has unknown size {other} bytes (expected 163840, 327680 or 655360)"
                ));
            }
        };

        let info_offset = INFO_SECTOR * SECTOR_SIZE;
        match data[info_offset] {
            0x16 => geometry = Geometry { tracks: 80, sides: 2 },
            0x17 => geometry = Geometry { tracks: 40, sides: 2 },
            0x18 => geometry = Geometry { tracks: 80, sides: 1 },
            _ => {}
        }

        if geometry.image_size() != data.len() {
            return Err(format!(
                "TRD disk type ${:02X} implies {} bytes but the image is {} bytes",
                data[info_offset],
                geometry.image_size(),
                data.len()
            ));
        }

        Ok(Self {
            data: data.to_vec(),
            geometry,
            read_only,
            dirty: false,
        })
    }

    /// Create a blank, formatted image with an empty catalog.
    #[must_use]
    pub fn blank(geometry: Geometry, label: &[u8; 8]) -> Self {
        let mut image = Self {
            data: vec![0u8; geometry.image_size()],
            geometry,
            read_only: false,
            dirty: false,
        };
        let info = DiskInfo {
            disk_type: geometry.disk_type(),
            file_count: 0,
            // Track 0 is reserved for the filesystem
            free_sectors: geometry.total_sectors() - SECTORS_PER_TRACK as u16,
            label: *label,
        };
        let mut sector = [0u8; SECTOR_SIZE];
        info.encode(&mut sector);
        image.data[INFO_SECTOR * SECTOR_SIZE..INFO_SECTOR * SECTOR_SIZE + SECTOR_SIZE]
            .copy_from_slice(&sector);
        image
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Whether the image has unflushed writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a flush.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// The raw image bytes (for flushing back to a file).
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Physical byte offset of a (track, side, sector) triple, or `None`
    /// when out of range. Sector numbers are 0-based here.
    #[must_use]
    pub fn offset(&self, track: u8, side: u8, sector: u8) -> Option<usize> {
        if track >= self.geometry.tracks
            || side >= self.geometry.sides
            || sector >= SECTORS_PER_TRACK as u8
        {
            return None;
        }
        Some(
            usize::from(track) * usize::from(self.geometry.sides) * TRACK_SIZE
                + usize::from(side) * TRACK_SIZE
                + usize::from(sector) * SECTOR_SIZE,
        )
    }

    /// Read one 256-byte sector into `buffer`.
    #[must_use]
    pub fn read_sector(
        &self,
        track: u8,
        side: u8,
        sector: u8,
        buffer: &mut [u8; SECTOR_SIZE],
    ) -> bool {
        let Some(offset) = self.offset(track, side, sector) else {
            return false;
        };
        buffer.copy_from_slice(&self.data[offset..offset + SECTOR_SIZE]);
        true
    }

    /// Write one 256-byte sector and mark the image dirty.
    ///
    /// # Errors
    ///
    /// Fails when the image is read-only or the position is out of range.
    pub fn write_sector(
        &mut self,
        track: u8,
        side: u8,
        sector: u8,
        buffer: &[u8; SECTOR_SIZE],
    ) -> Result<(), String> {
        if self.read_only {
            return Err("disk image is read-only".to_string());
        }
        let Some(offset) = self.offset(track, side, sector) else {
            return Err(format!(
                "sector ({track}, {side}, {sector}) outside disk geometry"
            ));
        };
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(buffer);
        self.dirty = true;
        Ok(())
    }

    /// Decode the catalog from sectors 0-7 of track 0 side 0.
    #[must_use]
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let mut entries = Vec::new();
        for index in 0..MAX_FILES {
            let offset = index * 16;
            if let Some(entry) = CatalogEntry::parse(&self.data[offset..offset + 16]) {
                entries.push(entry);
            }
        }
        entries
    }

    /// Decode the disk-info record.
    #[must_use]
    pub fn disk_info(&self) -> DiskInfo {
        let mut sector = [0u8; SECTOR_SIZE];
        sector.copy_from_slice(
            &self.data[INFO_SECTOR * SECTOR_SIZE..INFO_SECTOR * SECTOR_SIZE + SECTOR_SIZE],
        );
        DiskInfo::parse(&sector)
    }
}

// ---------------------------------------------------------------------------
// SCL
// ---------------------------------------------------------------------------

/// SCL signature.
const SCL_MAGIC: &[u8; 8] = b"SINCLAIR";

/// Size of one SCL file descriptor: name 8 + ext 1 + start 2 + length 2 +
/// sectors 1.
const SCL_DESC_SIZE: usize = 14;

/// Convert an SCL archive to a freshly formatted 80-track double-sided TRD.
///
/// Files are allocated sequentially from track 1 sector 0, each advancing
/// the cursor by its `sectors_used`; the catalog records the allocated
/// positions. The result is presented read-only.
///
/// # Errors
///
/// Returns an error on a bad signature, a truncated descriptor table or
/// payload, or more files than the catalog can hold.
pub fn scl_to_trd(data: &[u8]) -> Result<TrdImage, String> {
    if data.len() < 9 || &data[0..8] != SCL_MAGIC {
        return Err("SCL file has no SINCLAIR signature".to_string());
    }
    let file_count = data[8] as usize;
    if file_count > MAX_FILES {
        return Err(format!(
            "SCL archive holds {file_count} files; the TR-DOS catalog caps at {MAX_FILES}"
        ));
    }

    let desc_table = 9;
    let payload_start = desc_table + file_count * SCL_DESC_SIZE;
    if payload_start > data.len() {
        return Err(format!(
            "Truncated SCL descriptor table: need {} bytes, file is {}",
            payload_start,
            data.len()
        ));
    }

    let mut image = TrdImage::blank(Geometry { tracks: 80, sides: 2 }, b"SCLCONV ");

    // Allocation cursor: sectors fill side 0 of a track, then side 1, and
    // only then the next track — so the full double-sided capacity is
    // reachable. The catalog records (track, sector); the side is implied
    // by the strictly sequential allocation.
    let mut next_track: u8 = 1;
    let mut next_side: u8 = 0;
    let mut next_sector: u8 = 0;
    let mut payload_pos = payload_start;
    let mut used_total: u16 = 0;

    for index in 0..file_count {
        let d = desc_table + index * SCL_DESC_SIZE;
        let desc = &data[d..d + SCL_DESC_SIZE];

        let mut name = [0u8; 8];
        name.copy_from_slice(&desc[0..8]);
        let entry = CatalogEntry {
            name,
            ext: desc[8],
            start: u16::from(desc[9]) | (u16::from(desc[10]) << 8),
            length: u16::from(desc[11]) | (u16::from(desc[12]) << 8),
            sectors_used: desc[13],
            start_sector: next_sector,
            start_track: next_track,
        };

        let payload_len = usize::from(entry.sectors_used) * SECTOR_SIZE;
        if payload_pos + payload_len > data.len() {
            return Err(format!(
                "Truncated SCL payload for file {index}: need {payload_len} bytes at offset {payload_pos}"
            ));
        }

        // Catalog entry in sectors 0-7
        let catalog_offset = index * 16;
        image.data[catalog_offset..catalog_offset + 16].copy_from_slice(&entry.encode());

        let mut sector = [0u8; SECTOR_SIZE];
        for s in 0..usize::from(entry.sectors_used) {
            let chunk = &data[payload_pos + s * SECTOR_SIZE..payload_pos + (s + 1) * SECTOR_SIZE];
            sector.copy_from_slice(chunk);

            image
                .write_sector(next_track, next_side, next_sector, &sector)
                .map_err(|e| format!("SCL conversion write failed: {e}"))?;

            next_sector += 1;
            if usize::from(next_sector) >= SECTORS_PER_TRACK {
                next_sector = 0;
                next_side += 1;
                if next_side >= image.geometry.sides {
                    next_side = 0;
                    next_track += 1;
                }
            }
        }

        payload_pos += payload_len;
        used_total += u16::from(entry.sectors_used);
    }

    // Disk info: fresh 80/2 disk minus the filesystem track and the files
    let info = DiskInfo {
        disk_type: 0x16,
        file_count: file_count as u8,
        free_sectors: image.geometry.total_sectors() - SECTORS_PER_TRACK as u16 - used_total,
        label: *b"SCLCONV ",
    };
    let mut sector = [0u8; SECTOR_SIZE];
    info.encode(&mut sector);
    image.data[INFO_SECTOR * SECTOR_SIZE..INFO_SECTOR * SECTOR_SIZE + SECTOR_SIZE]
        .copy_from_slice(&sector);

    image.dirty = false;
    image.read_only = true;
    Ok(image)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
