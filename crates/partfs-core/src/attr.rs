//! Attribute synthesis for the root directory and partition files.

use std::time::SystemTime;

use tracing::debug;

use crate::path::{is_root, parse_partition_index, partition_name};
use crate::session::DeviceSession;
use crate::{Error, Result};

/// Permission bits of the root directory.
pub const ROOT_PERMISSIONS: u16 = 0o755;

/// Link count of the root directory. Fixed at 2 (`.` plus the parent's
/// entry); would grow if nested partitions were ever exposed as
/// subdirectories.
pub const ROOT_NLINK: u32 = 2;

/// Kind of synthetic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The root directory
    Directory,
    /// A partition file
    RegularFile,
}

/// Synthesized attributes of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// Entry kind
    pub kind: FileKind,
    /// Permission bits
    pub perm: u16,
    /// Number of hard links
    pub nlink: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
    /// Access time
    pub atime: SystemTime,
    /// Modification time
    pub mtime: SystemTime,
    /// Status change time
    pub ctime: SystemTime,
}

/// One entry of the root directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name
    pub name: String,
    /// Partition index, `None` for `.` and `..`
    pub partition: Option<u64>,
    /// Attributes, `None` for `..` which the caller fills in
    pub attributes: Option<Attributes>,
}

/// Attributes of the root directory.
pub fn root_attributes(session: &DeviceSession) -> Attributes {
    let tmpl = session.template();
    Attributes {
        kind: FileKind::Directory,
        perm: ROOT_PERMISSIONS,
        nlink: ROOT_NLINK,
        uid: tmpl.uid,
        gid: tmpl.gid,
        size: 0,
        atime: tmpl.atime,
        mtime: tmpl.mtime,
        ctime: tmpl.ctime,
    }
}

fn file_attributes(session: &DeviceSession, size: u64) -> Attributes {
    let tmpl = session.template();
    Attributes {
        kind: FileKind::RegularFile,
        perm: tmpl.permissions(),
        nlink: 1,
        uid: tmpl.uid,
        gid: tmpl.gid,
        size,
        atime: tmpl.atime,
        mtime: tmpl.mtime,
        ctime: tmpl.ctime,
    }
}

/// Attributes of partition `index`.
///
/// Permission bits mirror the backing file, so a read-only image yields
/// read-only partition files.
pub fn partition_attributes(session: &DeviceSession, index: u64) -> Result<Attributes> {
    let (_, size) = session
        .partition_region(index)
        .ok_or_else(|| Error::NoSuchPartition(partition_name(index)))?;
    Ok(file_attributes(session, size))
}

/// Attributes for any synthetic path.
pub fn lookup(session: &DeviceSession, path: &str) -> Result<Attributes> {
    if is_root(path) {
        return Ok(root_attributes(session));
    }
    match parse_partition_index(path) {
        Some(index) => partition_attributes(session, index),
        None => Err(Error::NoSuchPartition(path.to_string())),
    }
}

/// Lists the root directory: `.`, `..`, then every partition in table order.
///
/// The table is queried on every call.
pub fn list_entries(session: &DeviceSession) -> Vec<DirEntry> {
    let (sector_size, records) = session.partitions();
    debug!(partitions = records.len(), "Listing root directory");

    let mut entries = Vec::with_capacity(records.len() + 2);
    entries.push(DirEntry {
        name: ".".to_string(),
        partition: None,
        attributes: Some(root_attributes(session)),
    });
    entries.push(DirEntry {
        name: "..".to_string(),
        partition: None,
        attributes: None,
    });

    // Records without an addressable byte extent cannot be opened, so they
    // are not listed either.
    entries.extend(records.iter().filter_map(|record| {
        let (_, size) = record.region(sector_size)?;
        Some(DirEntry {
            name: partition_name(record.index),
            partition: Some(record.index),
            attributes: Some(file_attributes(session, size)),
        })
    }));

    entries
}
