//! FUSE filesystem over a device session.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use parking_lot::{Mutex, RwLock};
use partfs_core::{attr, parse_partition_index, DeviceSession, RegionHandle};
use tracing::{debug, info, warn};

use crate::inode::{file_type, to_file_attr, InodeId};
use crate::mount::MountConfig;

/// Partition FUSE filesystem.
pub struct PartFilesystem {
    /// Session, taken on destroy
    session: Option<DeviceSession>,
    /// Mount configuration
    config: MountConfig,
    /// Open region handles by file handle. The map lock only covers
    /// insertion and removal; I/O holds the per-handle lock.
    handles: RwLock<HashMap<u64, Mutex<RegionHandle>>>,
    /// Next file handle
    next_handle: AtomicU64,
}

impl PartFilesystem {
    /// Creates a filesystem serving `session`.
    pub fn new(session: DeviceSession, config: MountConfig) -> Self {
        Self {
            session: Some(session),
            config,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Attribute cache timeout.
    pub fn ttl(&self) -> Duration {
        self.config.attr_ttl()
    }

    /// Number of open file handles.
    pub fn open_handles(&self) -> usize {
        self.handles.read().len()
    }

    fn session(&self) -> Result<&DeviceSession, c_int> {
        self.session.as_ref().ok_or(libc::EIO)
    }

    /// Attributes of inode `ino`.
    pub fn attr(&self, ino: u64) -> Result<FileAttr, c_int> {
        let ino = InodeId(ino);
        let path = ino.path().ok_or(libc::ENOENT)?;
        let attr = attr::lookup(self.session()?, &path).map_err(|e| e.errno())?;
        Ok(to_file_attr(ino, &attr))
    }

    /// Resolves `name` inside directory `parent`.
    pub fn lookup_entry(&self, parent: u64, name: &OsStr) -> Result<FileAttr, c_int> {
        let parent = InodeId(parent);
        if !parent.is_root() {
            return Err(if parent.partition_index().is_some() {
                libc::ENOTDIR
            } else {
                libc::ENOENT
            });
        }

        let name = name.to_str().ok_or(libc::ENOENT)?;
        let path = format!("/{name}");
        let index = parse_partition_index(&path).ok_or(libc::ENOENT)?;
        let ino = InodeId::for_partition(index).ok_or(libc::ENOENT)?;

        let attr = attr::partition_attributes(self.session()?, index).map_err(|e| e.errno())?;
        Ok(to_file_attr(ino, &attr))
    }

    /// Entries of directory `ino` as `(ino, kind, name)`.
    pub fn list_dir(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>, c_int> {
        let ino = InodeId(ino);
        if !ino.is_root() {
            return Err(if ino.partition_index().is_some() {
                libc::ENOTDIR
            } else {
                libc::ENOENT
            });
        }

        let entries = attr::list_entries(self.session()?)
            .into_iter()
            .filter_map(|entry| {
                let (ino, kind) = match (entry.partition, entry.attributes) {
                    (Some(index), Some(attr)) => {
                        (InodeId::for_partition(index)?, file_type(attr.kind))
                    }
                    // `.` and `..`; the root is its own parent.
                    _ => (InodeId::ROOT, FileType::Directory),
                };
                Some((ino.0, kind, entry.name))
            })
            .collect();

        Ok(entries)
    }

    /// Opens inode `ino` and returns the new file handle.
    pub fn open_region(&self, ino: u64, flags: i32) -> Result<u64, c_int> {
        let ino = InodeId(ino);
        if ino.is_root() {
            return Err(libc::EISDIR);
        }
        if self.config.read_only && (flags & libc::O_ACCMODE) != libc::O_RDONLY {
            return Err(libc::EROFS);
        }

        let path = ino.path().ok_or(libc::ENOENT)?;
        let handle = RegionHandle::open(self.session()?, &path, flags).map_err(|e| e.errno())?;

        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.write().insert(fh, Mutex::new(handle));
        Ok(fh)
    }

    /// Reads from an open handle.
    pub fn read_region(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, c_int> {
        let handles = self.handles.read();
        let mut handle = handles.get(&fh).ok_or(libc::EBADF)?.lock();
        handle.read(offset, size as usize).map_err(|e| e.errno())
    }

    /// Writes to an open handle, returning the byte count written.
    pub fn write_region(&self, fh: u64, offset: i64, data: &[u8]) -> Result<u32, c_int> {
        let handles = self.handles.read();
        let mut handle = handles.get(&fh).ok_or(libc::EBADF)?.lock();
        let written = handle.write(offset, data).map_err(|e| e.errno())?;
        Ok(written as u32)
    }

    /// Flushes an open handle to storage.
    pub fn sync_region(&self, fh: u64, datasync: bool) -> Result<(), c_int> {
        let handles = self.handles.read();
        let mut handle = handles.get(&fh).ok_or(libc::EBADF)?.lock();
        handle.sync(datasync).map_err(|e| e.errno())
    }

    /// Releases an open handle. The handle is dropped even if closing fails.
    pub fn release_region(&self, fh: u64) -> Result<(), c_int> {
        let handle = self.handles.write().remove(&fh).ok_or(libc::EBADF)?;
        handle.into_inner().release().map_err(|e| e.errno())
    }

    /// Closes remaining handles and tears down the session.
    pub fn shutdown(&mut self) {
        for (fh, handle) in self.handles.write().drain() {
            if let Err(e) = handle.into_inner().release() {
                warn!(fh = fh, error = %e, "Closing leftover handle failed");
            }
        }
        if let Some(session) = self.session.take() {
            session.teardown();
        }
    }
}

impl Filesystem for PartFilesystem {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        let session = self.session()?;
        info!(
            device = %session.canonical_path().display(),
            mount_point = %self.config.mount_point.display(),
            "Filesystem initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!(mount_point = %self.config.mount_point.display(), "Filesystem destroyed");
        self.shutdown();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!(parent = parent, name = ?name, "lookup");

        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&self.ttl(), &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!(ino = ino, "getattr");

        match self.attr(ino) {
            Ok(attr) => reply.attr(&self.ttl(), &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino = ino, offset = offset, "readdir");

        let entries = match self.list_dir(ino) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }

        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino = ino, flags = flags, "open");

        match self.open_region(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino = ino, fh = fh, offset = offset, size = size, "read");

        match self.read_region(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(
            ino = ino,
            fh = fh,
            offset = offset,
            size = data.len(),
            "write"
        );

        match self.write_region(fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!(ino = ino, fh = fh, datasync = datasync, "fsync");

        match self.sync_region(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino = ino, fh = fh, "release");

        match self.release_region(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}
