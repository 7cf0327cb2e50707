//! Inode numbering for the synthetic tree.
//!
//! The tree is flat: inode 1 is the root and partition `k` is inode `k + 2`.
//! Every inode maps back to the synthetic path the core understands.

use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use partfs_core::{partition_path, Attributes, FileKind};

/// Block size reported to the kernel.
const BLKSIZE: u32 = 4096;

/// Inode identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeId(pub u64);

impl InodeId {
    /// Root inode ID (FUSE convention).
    pub const ROOT: InodeId = InodeId(1);

    const PARTITION_BASE: u64 = 2;

    /// Inode of partition `index`, `None` if it does not fit.
    pub fn for_partition(index: u64) -> Option<Self> {
        index.checked_add(Self::PARTITION_BASE).map(Self)
    }

    /// Partition index of this inode, `None` for the root.
    pub fn partition_index(self) -> Option<u64> {
        self.0.checked_sub(Self::PARTITION_BASE)
    }

    /// Returns true for the root inode.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// Synthetic path of this inode.
    pub fn path(self) -> Option<String> {
        if self.is_root() {
            return Some("/".to_string());
        }
        self.partition_index().map(partition_path)
    }
}

impl From<u64> for InodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<InodeId> for u64 {
    fn from(id: InodeId) -> u64 {
        id.0
    }
}

/// Maps the core's entry kind to the FUSE file type.
pub fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::RegularFile => FileType::RegularFile,
    }
}

/// Converts synthesized attributes to FUSE file attributes.
pub fn to_file_attr(ino: InodeId, attr: &Attributes) -> FileAttr {
    FileAttr {
        ino: ino.0,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: SystemTime::UNIX_EPOCH,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}
