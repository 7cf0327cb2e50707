//! GUID partition table.

use uuid::Uuid;

use crate::{read_u16_le, read_u32_le, read_u64_le, PartitionRecord, TableError};

/// GPT header signature.
pub const SIGNATURE: &[u8; 8] = b"EFI PART";

/// Smallest header size allowed by UEFI.
pub const MIN_HEADER_SIZE: usize = 92;

/// Smallest partition entry size allowed by UEFI.
pub const MIN_ENTRY_SIZE: u32 = 128;

/// Upper bound on the entry array we are willing to read.
const MAX_ENTRY_ARRAY: usize = 1024 * 1024;

const HEADER_CRC_OFFSET: usize = 16;
const NAME_OFFSET: usize = 56;
const NAME_LEN: usize = 72;

/// Parsed GPT header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    /// LBA holding this header
    pub my_lba: u64,
    /// LBA holding the backup header
    pub alternate_lba: u64,
    /// First LBA usable by partitions
    pub first_usable_lba: u64,
    /// Last LBA usable by partitions
    pub last_usable_lba: u64,
    /// Disk GUID
    pub disk_guid: Uuid,
    /// Starting LBA of the entry array
    pub entries_lba: u64,
    /// Number of entry slots
    pub num_entries: u32,
    /// Size of one entry slot in bytes
    pub entry_size: u32,
    /// CRC32 of the entry array
    pub entries_crc32: u32,
}

impl GptHeader {
    /// Parses and verifies a header from the block at LBA 1.
    pub fn parse(block: &[u8]) -> Result<Self, TableError> {
        if block.len() < MIN_HEADER_SIZE || &block[..8] != SIGNATURE {
            return Err(TableError::InvalidGpt("missing header signature".into()));
        }

        let header_size = read_u32_le(block, 12) as usize;
        if header_size < MIN_HEADER_SIZE || header_size > block.len() {
            return Err(TableError::InvalidGpt(format!(
                "header size {header_size} out of range"
            )));
        }

        let stored_crc = read_u32_le(block, HEADER_CRC_OFFSET);
        let mut header = block[..header_size].to_vec();
        header[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].fill(0);
        if crc32fast::hash(&header) != stored_crc {
            return Err(TableError::ChecksumMismatch { what: "GPT header" });
        }

        let mut guid = [0u8; 16];
        guid.copy_from_slice(&block[56..72]);

        let parsed = Self {
            my_lba: read_u64_le(block, 24),
            alternate_lba: read_u64_le(block, 32),
            first_usable_lba: read_u64_le(block, 40),
            last_usable_lba: read_u64_le(block, 48),
            disk_guid: Uuid::from_bytes_le(guid),
            entries_lba: read_u64_le(block, 72),
            num_entries: read_u32_le(block, 80),
            entry_size: read_u32_le(block, 84),
            entries_crc32: read_u32_le(block, 88),
        };

        if parsed.my_lba != 1 {
            return Err(TableError::InvalidGpt(format!(
                "primary header claims LBA {}",
                parsed.my_lba
            )));
        }
        if parsed.entry_size < MIN_ENTRY_SIZE || parsed.entry_size % 8 != 0 {
            return Err(TableError::InvalidGpt(format!(
                "entry size {} not supported",
                parsed.entry_size
            )));
        }
        if parsed.entry_array_len() > MAX_ENTRY_ARRAY {
            return Err(TableError::InvalidGpt(format!(
                "{} entries of {} bytes is too large",
                parsed.num_entries, parsed.entry_size
            )));
        }

        Ok(parsed)
    }

    /// Size of the partition entry array in bytes.
    pub fn entry_array_len(&self) -> usize {
        self.num_entries as usize * self.entry_size as usize
    }

    /// Parses the entry array, skipping unused slots.
    pub fn records(&self, entries: &[u8]) -> Result<Vec<PartitionRecord>, TableError> {
        if entries.len() != self.entry_array_len() {
            return Err(TableError::InvalidGpt("truncated entry array".into()));
        }
        if crc32fast::hash(entries) != self.entries_crc32 {
            return Err(TableError::ChecksumMismatch {
                what: "GPT partition entry array",
            });
        }

        let mut records = Vec::new();
        for (slot, entry) in entries.chunks_exact(self.entry_size as usize).enumerate() {
            let mut type_guid = [0u8; 16];
            type_guid.copy_from_slice(&entry[..16]);
            if type_guid == [0u8; 16] {
                continue;
            }

            let first_lba = read_u64_le(entry, 32);
            let last_lba = read_u64_le(entry, 40);
            let size_sectors = self.entry_extent(slot, first_lba, last_lba)?;

            records.push(PartitionRecord {
                index: slot as u64,
                start_sector: first_lba,
                size_sectors: Some(size_sectors),
                type_name: type_name(&Uuid::from_bytes_le(type_guid)),
                name: decode_name(&entry[NAME_OFFSET..NAME_OFFSET + NAME_LEN]),
            });
        }

        Ok(records)
    }

    /// Sector count of an entry spanning `first..=last`, which must lie in
    /// the usable area.
    fn entry_extent(&self, slot: usize, first: u64, last: u64) -> Result<u64, TableError> {
        if first < self.first_usable_lba || last > self.last_usable_lba {
            return Err(TableError::InvalidGpt(format!(
                "entry {slot} spans LBA {first}..={last} outside usable {}..={}",
                self.first_usable_lba, self.last_usable_lba
            )));
        }
        last.checked_sub(first)
            .and_then(|span| span.checked_add(1))
            .ok_or_else(|| {
                TableError::InvalidGpt(format!("entry {slot} has invalid range {first}..={last}"))
            })
    }
}

fn decode_name(raw: &[u8]) -> Option<String> {
    let units: Vec<u16> = (0..raw.len() / 2)
        .map(|i| read_u16_le(raw, i * 2))
        .take_while(|&u| u != 0)
        .collect();
    if units.is_empty() {
        return None;
    }
    Some(String::from_utf16_lossy(&units))
}

/// Display name for a GPT partition type GUID.
pub fn type_name(guid: &Uuid) -> String {
    let known = match guid.to_string().to_ascii_uppercase().as_str() {
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System",
        "21686148-6449-6E6F-744E-656564454649" => "BIOS boot",
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem",
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap",
        "E6D6D379-F507-44C2-A23C-238F2A3DF928" => "Linux LVM",
        "A19D880F-05FC-4D3B-A006-743F0F84911E" => "Linux RAID",
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft basic data",
        _ => return guid.to_string(),
    };
    known.to_string()
}
