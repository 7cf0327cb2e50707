//! Partfs Core - exposes the partitions of a disk image as plain files.
//!
//! This crate provides:
//! - The device session built once at mount time
//! - Translation between synthetic paths and partition indices
//! - Attribute synthesis for the root directory and partition files
//! - Bounded read/write redirection into the backing file

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod attr;
pub mod path;
pub mod region;
pub mod session;

pub use attr::{Attributes, DirEntry, FileKind};
pub use path::{is_root, parse_partition_index, partition_name, partition_path, PARTITION_PREFIX};
pub use region::RegionHandle;
pub use session::{DeviceSession, TemplateMetadata};

use std::io;
use std::path::PathBuf;

use partfs_table::TableError;
use thiserror::Error;

/// Errors from session setup and per-request operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing path does not exist or cannot be canonicalized
    #[error("Cannot resolve {path}: {source}")]
    PathResolution {
        /// Path as given
        path: PathBuf,
        /// Underlying failure
        source: io::Error,
    },

    /// Backing file metadata is unreadable
    #[error("Cannot stat {path}: {source}")]
    Stat {
        /// Canonical path
        path: PathBuf,
        /// Underlying failure
        source: io::Error,
    },

    /// Backing content is not a partition table
    #[error("Cannot read partition table: {0}")]
    PartitionTable(#[from] TableError),

    /// Path does not name a partition in the table
    #[error("No such partition: {0}")]
    NoSuchPartition(String),

    /// Offset outside `0..=size` of the partition
    #[error("Offset {offset} outside partition of {size} bytes")]
    InvalidOffset {
        /// Requested offset
        offset: i64,
        /// Partition size in bytes
        size: u64,
    },

    /// Write starting past the end of the partition
    #[error("Write at offset {offset} beyond partition end ({size} bytes)")]
    WriteBeyondEnd {
        /// Requested offset
        offset: i64,
        /// Partition size in bytes
        size: u64,
    },

    /// Opening the backing file failed
    #[error("Open failed: {0}")]
    Open(#[source] io::Error),

    /// Positioning the backing descriptor failed
    #[error("Seek failed: {0}")]
    Seek(#[source] io::Error),

    /// Reading the backing descriptor failed
    #[error("Read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing the backing descriptor failed
    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    /// Flushing the backing descriptor failed
    #[error("Sync failed: {0}")]
    Sync(#[source] io::Error),

    /// Closing the backing descriptor failed
    #[error("Close failed: {0}")]
    Close(#[source] io::Error),
}

impl Error {
    /// Returns the errno reported to the kernel for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NoSuchPartition(_) => libc::ENOENT,
            Error::InvalidOffset { .. } => libc::EINVAL,
            Error::WriteBeyondEnd { .. } => libc::EFBIG,
            Error::PathResolution { source, .. } | Error::Stat { source, .. } => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            Error::PartitionTable(_) => libc::EIO,
            Error::Open(e)
            | Error::Seek(e)
            | Error::Read(e)
            | Error::Write(e)
            | Error::Sync(e)
            | Error::Close(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Returns true for errors that abort mounting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::PathResolution { .. } | Error::Stat { .. } | Error::PartitionTable(_)
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
