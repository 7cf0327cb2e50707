//! Reading the label of a backing file or block device.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::gpt::GptHeader;
use crate::mbr::{Mbr, MBR_SIZE};
use crate::{
    LabelKind, PartitionRecord, PartitionTable, TableError, DEFAULT_SECTOR_SIZE, MAX_SECTOR_SIZE,
};

/// Sector sizes tried, in order, when locating a GPT header.
const GPT_PROBE_SECTOR_SIZES: [u64; 2] = [512, 4096];

/// Options for reading a partition table.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Logical sector size, probed when `None`
    pub sector_size: Option<u64>,
}

/// Partition table read from a device.
#[derive(Debug)]
pub struct DiskLabel {
    path: PathBuf,
    file: File,
    writable: bool,
    kind: LabelKind,
    sector_size: u64,
    records: Vec<PartitionRecord>,
}

impl DiskLabel {
    /// Opens `path` and parses its partition table.
    pub fn open(path: impl AsRef<Path>, options: &TableOptions) -> Result<Self, TableError> {
        let path = path.as_ref();
        if let Some(size) = options.sector_size {
            validate_sector_size(size)?;
        }

        let (file, writable) = open_device(path)?;

        let boot = read_block(&file, 0, MBR_SIZE)?;
        let mbr = Mbr::parse(&boot)?;

        let (kind, sector_size, records) = if mbr.is_protective() {
            let (sector_size, records) = read_gpt(&file, options.sector_size)?;
            (LabelKind::Gpt, sector_size, records)
        } else {
            let sector_size = options.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);
            (LabelKind::Dos, sector_size, mbr.records())
        };

        if let Some(record) = records.iter().find(|r| r.region(sector_size).is_none()) {
            return Err(TableError::PartitionOutOfRange {
                index: record.index,
            });
        }

        debug!(
            path = %path.display(),
            label = %kind,
            sector_size = sector_size,
            partitions = records.len(),
            writable = writable,
            "Read partition table"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            writable,
            kind,
            sector_size,
            records,
        })
    }

    /// Path the table was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the device was opened read-write.
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl PartitionTable for DiskLabel {
    fn label(&self) -> LabelKind {
        self.kind
    }

    fn sector_size(&self) -> u64 {
        self.sector_size
    }

    fn partition(&self, index: u64) -> Option<PartitionRecord> {
        self.records.iter().find(|r| r.index == index).cloned()
    }

    fn partitions(&self) -> Vec<PartitionRecord> {
        self.records.clone()
    }

    fn close(self: Box<Self>) {
        debug!(path = %self.path.display(), "Closing partition table");
        drop(self.file);
    }
}

/// Opens read-write, falling back to read-only when write access is denied.
fn open_device(path: &Path) -> io::Result<(File, bool)> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok((file, true)),
        Err(e)
            if e.kind() == io::ErrorKind::PermissionDenied
                || e.raw_os_error() == Some(libc::EROFS) =>
        {
            warn!(path = %path.display(), error = %e, "Device not writable, reading table read-only");
            let file = File::open(path)?;
            Ok((file, false))
        }
        Err(e) => Err(e),
    }
}

fn read_block(file: &File, offset: u64, len: usize) -> Result<Vec<u8>, TableError> {
    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

fn read_gpt(
    file: &File,
    sector_size: Option<u64>,
) -> Result<(u64, Vec<PartitionRecord>), TableError> {
    let candidates = match sector_size {
        Some(size) => vec![size],
        None => GPT_PROBE_SECTOR_SIZES.to_vec(),
    };

    let mut last_error = None;
    for sector in candidates {
        let header = match read_block(file, sector, sector as usize).and_then(|b| GptHeader::parse(&b))
        {
            Ok(header) => header,
            Err(e) => {
                debug!(sector_size = sector, error = %e, "No GPT header");
                last_error = Some(e);
                continue;
            }
        };

        let entries_offset = header
            .entries_lba
            .checked_mul(sector)
            .ok_or_else(|| TableError::InvalidGpt("entry array offset overflows".into()))?;
        let entries = read_block(file, entries_offset, header.entry_array_len())?;
        return Ok((sector, header.records(&entries)?));
    }

    Err(last_error.unwrap_or_else(|| TableError::InvalidGpt("no header found".into())))
}

fn validate_sector_size(size: u64) -> Result<(), TableError> {
    if !(DEFAULT_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&size) || !size.is_power_of_two() {
        return Err(TableError::InvalidSectorSize(size));
    }
    Ok(())
}
