//! Partfs Filesystem - FUSE bindings for the partition view.
//!
//! Maps kernel requests onto the path-based operations of `partfs-core`:
//! - Inode numbering for the root and each partition
//! - Attribute, listing and open/read/write/release handlers
//! - Mount configuration and the blocking mount entry point

#![warn(missing_docs, rust_2018_idioms)]

pub mod inode;
pub mod mount;
pub mod ops;
pub mod vfs;

pub use inode::InodeId;
pub use mount::MountConfig;
pub use ops::mount;
pub use vfs::PartFilesystem;

use thiserror::Error;

/// Filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// Mount failed
    #[error("Mount failed: {0}")]
    Mount(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error
    #[error(transparent)]
    Core(#[from] partfs_core::Error),
}
