//! Device session: everything fixed at mount time.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use partfs_table::{
    DiskLabel, LabelKind, PartitionRecord, PartitionTable, TableError, TableOptions,
};
use tracing::{debug, info};

use crate::{Error, Result};

/// Ownership, mode and timestamps of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateMetadata {
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Full `st_mode`
    pub mode: u32,
    /// Access time
    pub atime: SystemTime,
    /// Modification time
    pub mtime: SystemTime,
    /// Status change time
    pub ctime: SystemTime,
}

impl TemplateMetadata {
    /// Snapshots the relevant fields of `metadata`.
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode(),
            atime: unix_time(metadata.atime(), metadata.atime_nsec()),
            mtime: unix_time(metadata.mtime(), metadata.mtime_nsec()),
            ctime: unix_time(metadata.ctime(), metadata.ctime_nsec()),
        }
    }

    /// Permission bits of the backing file.
    pub fn permissions(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nsecs = nsecs.clamp(0, 999_999_999) as u32;
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs)
    } else {
        UNIX_EPOCH - Duration::new(secs.unsigned_abs(), 0) + Duration::new(0, nsecs)
    }
}

/// State shared by every request for the lifetime of a mount.
///
/// Immutable after construction. The partition table is guarded by a lock
/// because its implementation need not be `Sync`.
pub struct DeviceSession {
    canonical_path: PathBuf,
    template: TemplateMetadata,
    table: Mutex<Box<dyn PartitionTable>>,
}

impl DeviceSession {
    /// Builds a session over `path` using the on-disk label reader.
    pub fn initialize(path: impl AsRef<Path>, options: &TableOptions) -> Result<Self> {
        Self::initialize_with(path, |canonical| {
            DiskLabel::open(canonical, options).map(|label| Box::new(label) as Box<dyn PartitionTable>)
        })
    }

    /// Builds a session with a caller-supplied partition table opener.
    ///
    /// The opener receives the canonical path. Nothing is retained if any
    /// step fails.
    pub fn initialize_with<F>(path: impl AsRef<Path>, open_table: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> std::result::Result<Box<dyn PartitionTable>, TableError>,
    {
        let path = path.as_ref();
        let canonical_path = fs::canonicalize(path).map_err(|source| Error::PathResolution {
            path: path.to_path_buf(),
            source,
        })?;

        let metadata = fs::metadata(&canonical_path).map_err(|source| Error::Stat {
            path: canonical_path.clone(),
            source,
        })?;
        let template = TemplateMetadata::from_metadata(&metadata);

        let table = open_table(&canonical_path)?;

        info!(
            device = %canonical_path.display(),
            label = %table.label(),
            sector_size = table.sector_size(),
            partitions = table.partitions().len(),
            "Device session ready"
        );

        Ok(Self {
            canonical_path,
            template,
            table: Mutex::new(table),
        })
    }

    /// Absolute path of the backing file.
    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    /// Metadata captured at mount time.
    pub fn template(&self) -> &TemplateMetadata {
        &self.template
    }

    /// Label format of the partition table.
    pub fn label(&self) -> LabelKind {
        self.table.lock().label()
    }

    /// Logical sector size of the device.
    pub fn sector_size(&self) -> u64 {
        self.table.lock().sector_size()
    }

    /// Looks up a partition record.
    pub fn partition(&self, index: u64) -> Option<PartitionRecord> {
        self.table.lock().partition(index)
    }

    /// Lists partitions in table order, together with the sector size
    /// they are expressed in.
    pub fn partitions(&self) -> (u64, Vec<PartitionRecord>) {
        let table = self.table.lock();
        (table.sector_size(), table.partitions())
    }

    /// Returns `(start_offset, byte_size)` of partition `index`.
    ///
    /// A record whose byte extent does not fit in a `u64` is not addressable
    /// and reads as absent.
    pub fn partition_region(&self, index: u64) -> Option<(u64, u64)> {
        let table = self.table.lock();
        let sector_size = table.sector_size();
        table.partition(index)?.region(sector_size)
    }

    /// Releases the partition table. Consumes the session.
    pub fn teardown(self) {
        debug!(device = %self.canonical_path.display(), "Tearing down device session");
        self.table.into_inner().close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("canonical_path", &self.canonical_path)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}
