//! Machine configuration.

/// Supported Spectrum models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumModel {
    Spectrum48K,
    Spectrum128K,
}

/// Configuration for creating a Spectrum instance.
pub struct SpectrumConfig {
    pub model: SpectrumModel,
    /// ROM data: 16,384 bytes for 48K, 32,768 (editor + BASIC) for 128K.
    pub rom: Vec<u8>,
    /// Beta Disk Interface ROM (16,384 bytes). `None` disables TR-DOS.
    pub trdos_rom: Option<Vec<u8>>,
    /// Number of drive slots exposed (1-4).
    pub drive_count: usize,
    /// Mount all disk images read-only.
    pub disks_read_only: bool,
}

impl SpectrumConfig {
    /// A 48K machine with the given ROM and no disk interface.
    #[must_use]
    pub fn new_48k(rom: Vec<u8>) -> Self {
        Self {
            model: SpectrumModel::Spectrum48K,
            rom,
            trdos_rom: None,
            drive_count: 2,
            disks_read_only: false,
        }
    }
}
