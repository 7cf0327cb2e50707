//! Partfs Table - partition table reading for disk images and block devices.
//!
//! Provides:
//! - DOS (MBR) label parsing
//! - GPT parsing with header and entry array checksums
//! - The [`PartitionTable`] capability consumed by the filesystem core

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod gpt;
pub mod label;
pub mod mbr;

pub use gpt::GptHeader;
pub use label::{DiskLabel, TableOptions};
pub use mbr::{Mbr, MbrEntry};

use std::fmt;

use thiserror::Error;

/// Sector size assumed when nothing better is known.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Largest logical sector size accepted.
pub const MAX_SECTOR_SIZE: u64 = 64 * 1024;

/// Errors from reading a partition table.
#[derive(Debug, Error)]
pub enum TableError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No recognizable label on the device
    #[error("No partition table found")]
    NoLabel,

    /// Malformed GPT
    #[error("Invalid GPT: {0}")]
    InvalidGpt(String),

    /// Stored checksum does not match contents
    #[error("Checksum mismatch in {what}")]
    ChecksumMismatch {
        /// Which structure failed verification
        what: &'static str,
    },

    /// Sector size is not a power of two between 512 bytes and 64 KiB
    #[error("Invalid sector size: {0}")]
    InvalidSectorSize(u64),

    /// Partition extent is not addressable with 64-bit byte offsets
    #[error("Partition {index} lies beyond the addressable byte range")]
    PartitionOutOfRange {
        /// Partition index
        index: u64,
    },
}

/// On-disk label format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// DOS / MBR partition table
    Dos,
    /// GUID partition table
    Gpt,
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelKind::Dos => f.write_str("dos"),
            LabelKind::Gpt => f.write_str("gpt"),
        }
    }
}

/// One entry of a partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    /// Partition number (slot in the table)
    pub index: u64,
    /// First sector of the partition
    pub start_sector: u64,
    /// Length in sectors, `None` when the entry declares no size
    pub size_sectors: Option<u64>,
    /// Human readable partition type
    pub type_name: String,
    /// Partition label, GPT only
    pub name: Option<String>,
}

impl PartitionRecord {
    /// Byte offset of the partition within the device, `None` on overflow.
    pub fn start_offset(&self, sector_size: u64) -> Option<u64> {
        self.start_sector.checked_mul(sector_size)
    }

    /// Length of the partition in bytes, 0 when unknown and `None` on overflow.
    pub fn byte_size(&self, sector_size: u64) -> Option<u64> {
        match self.size_sectors {
            Some(sectors) => sectors.checked_mul(sector_size),
            None => Some(0),
        }
    }

    /// `(start_offset, byte_size)` when the whole extent, including its end,
    /// fits in a `u64`.
    pub fn region(&self, sector_size: u64) -> Option<(u64, u64)> {
        let start = self.start_offset(sector_size)?;
        let size = self.byte_size(sector_size)?;
        start.checked_add(size)?;
        Some((start, size))
    }
}

/// Read access to a parsed partition table.
///
/// Implementations are not required to be `Sync`; callers sharing one
/// across threads serialize access themselves.
pub trait PartitionTable: Send {
    /// Label format of the table.
    fn label(&self) -> LabelKind;

    /// Logical sector size of the device in bytes.
    fn sector_size(&self) -> u64;

    /// Looks up a partition by its index.
    fn partition(&self, index: u64) -> Option<PartitionRecord>;

    /// Lists all partitions in table order.
    fn partitions(&self) -> Vec<PartitionRecord>;

    /// Releases the table and whatever device handle it holds.
    fn close(self: Box<Self>) {}
}

pub(crate) fn read_u16_le(data: &[u8], at: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&data[at..at + 2]);
    u16::from_le_bytes(bytes)
}

pub(crate) fn read_u32_le(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn read_u64_le(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}
