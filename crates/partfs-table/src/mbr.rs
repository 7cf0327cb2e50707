//! DOS (MBR) partition table.
//!
//! The boot sector holds four 16-byte primary entries at offset 446 followed
//! by the `0x55 0xAA` signature. CHS fields are ignored; only LBA values are
//! used.

use crate::{read_u32_le, PartitionRecord, TableError};

/// Size of the boot sector holding the MBR.
pub const MBR_SIZE: usize = 512;

/// Partition type of a GPT protective entry.
pub const PROTECTIVE_TYPE: u8 = 0xEE;

const ENTRY_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 510;

/// A primary MBR partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbrEntry {
    /// Boot indicator (0x80)
    pub bootable: bool,
    /// Partition type byte
    pub partition_type: u8,
    /// Starting LBA
    pub start_lba: u32,
    /// Number of sectors
    pub sector_count: u32,
}

impl MbrEntry {
    fn from_bytes(data: &[u8]) -> Self {
        Self {
            bootable: data[0] == 0x80,
            partition_type: data[4],
            start_lba: read_u32_le(data, 8),
            sector_count: read_u32_le(data, 12),
        }
    }

    /// Returns true if the slot holds a partition.
    pub fn is_used(&self) -> bool {
        self.partition_type != 0
    }

    /// Returns true for extended partition containers.
    pub fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }
}

/// Parsed master boot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mbr {
    /// Four primary partition entries
    pub entries: [MbrEntry; 4],
}

impl Mbr {
    /// Parses the MBR from the first 512 bytes of a device.
    pub fn parse(sector: &[u8]) -> Result<Self, TableError> {
        if sector.len() < MBR_SIZE || sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] != [0x55, 0xAA]
        {
            return Err(TableError::NoLabel);
        }

        let mut entries = [MbrEntry::default(); 4];
        for (slot, entry) in entries.iter_mut().enumerate() {
            let offset = ENTRY_OFFSET + slot * ENTRY_SIZE;
            *entry = MbrEntry::from_bytes(&sector[offset..offset + ENTRY_SIZE]);
        }

        Ok(Self { entries })
    }

    /// Returns true if the MBR only protects a GPT.
    pub fn is_protective(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.partition_type == PROTECTIVE_TYPE)
    }

    /// Converts the used slots into partition records.
    ///
    /// Logical partitions inside an extended container are not walked; the
    /// container itself is reported like any other entry.
    pub fn records(&self) -> Vec<PartitionRecord> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_used())
            .map(|(slot, e)| PartitionRecord {
                index: slot as u64,
                start_sector: u64::from(e.start_lba),
                size_sectors: (e.sector_count > 0).then_some(u64::from(e.sector_count)),
                type_name: type_name(e.partition_type).to_string(),
                name: None,
            })
            .collect()
    }
}

/// Display name for a DOS partition type byte.
pub fn type_name(ptype: u8) -> &'static str {
    match ptype {
        0x00 => "Empty",
        0x01 => "FAT12",
        0x04 | 0x06 | 0x0E => "FAT16",
        0x05 | 0x0F | 0x85 => "Extended",
        0x07 => "NTFS/exFAT",
        0x0B | 0x0C => "FAT32",
        0x1B | 0x1C => "FAT32 (hidden)",
        0x82 => "Linux swap",
        0x83 => "Linux",
        0x8E => "Linux LVM",
        0xEE => "GPT protective",
        0xEF => "EFI System",
        0xFD => "Linux raid autodetect",
        _ => "Unknown",
    }
}
