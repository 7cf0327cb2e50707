//! Bounded I/O against one partition's window of the backing file.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;

use nix::unistd;
use tracing::{debug, warn};

use crate::path::parse_partition_index;
use crate::session::DeviceSession;
use crate::{Error, Result};

/// Open flags forwarded to the backing file besides the access mode.
const FORWARDED_FLAGS: i32 = libc::O_SYNC | libc::O_DSYNC;

/// An open partition file.
///
/// Owns its own descriptor on the backing file. The partition's start and
/// size are captured at open and never re-read from the table.
#[derive(Debug)]
pub struct RegionHandle {
    index: u64,
    file: File,
    start: u64,
    size: u64,
}

impl RegionHandle {
    /// Opens the partition named by `path` with the caller's `flags`.
    pub fn open(session: &DeviceSession, path: &str, flags: i32) -> Result<Self> {
        let index = parse_partition_index(path)
            .ok_or_else(|| Error::NoSuchPartition(path.to_string()))?;
        let (start, size) = session
            .partition_region(index)
            .ok_or_else(|| Error::NoSuchPartition(path.to_string()))?;

        let file = open_options(flags)
            .open(session.canonical_path())
            .map_err(Error::Open)?;

        debug!(partition = index, start = start, size = size, flags = flags, "Opened region");
        Ok(Self {
            index,
            file,
            start,
            size,
        })
    }

    /// Partition index this handle refers to.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Absolute byte offset of the partition in the backing file.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Partition size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Positions the descriptor at `offset` within the partition.
    ///
    /// `offset == size` is allowed and means end of partition.
    pub fn seek(&mut self, offset: i64) -> Result<()> {
        let relative = self.check_offset(offset)?;
        let absolute = self
            .start
            .checked_add(relative)
            .ok_or(Error::InvalidOffset {
                offset,
                size: self.size,
            })?;
        self.file
            .seek(SeekFrom::Start(absolute))
            .map_err(Error::Seek)?;
        Ok(())
    }

    /// Reads up to `len` bytes at `offset`, never past the partition end.
    ///
    /// Returns fewer bytes than asked for at the end of the partition or the
    /// end of the backing file.
    pub fn read(&mut self, offset: i64, len: usize) -> Result<Vec<u8>> {
        self.seek(offset)?;
        let want = self.clamp(offset, len);

        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Read(e)),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Writes `data` at `offset`, truncated to the partition end.
    ///
    /// Returns the number of bytes written. An offset past the end of the
    /// partition is [`Error::WriteBeyondEnd`].
    pub fn write(&mut self, offset: i64, data: &[u8]) -> Result<usize> {
        match self.seek(offset) {
            Ok(()) => {}
            Err(Error::InvalidOffset { offset, size }) if offset >= 0 => {
                return Err(Error::WriteBeyondEnd { offset, size });
            }
            Err(e) => return Err(e),
        }

        let n = self.clamp(offset, data.len());
        self.file.write_all(&data[..n]).map_err(Error::Write)?;
        Ok(n)
    }

    /// Flushes written data of the backing file to storage.
    pub fn sync(&mut self, datasync: bool) -> Result<()> {
        let result = if datasync {
            self.file.sync_data()
        } else {
            self.file.sync_all()
        };
        result.map_err(Error::Sync)
    }

    /// Closes the descriptor.
    ///
    /// The handle is gone whether or not the close reports an error.
    pub fn release(self) -> Result<()> {
        let index = self.index;
        if let Err(errno) = unistd::close(self.file.into_raw_fd()) {
            let err = io::Error::from(errno);
            warn!(partition = index, error = %err, "Closing region descriptor failed");
            return Err(Error::Close(err));
        }
        debug!(partition = index, "Released region");
        Ok(())
    }

    fn check_offset(&self, offset: i64) -> Result<u64> {
        match u64::try_from(offset) {
            Ok(relative) if relative <= self.size => Ok(relative),
            _ => Err(Error::InvalidOffset {
                offset,
                size: self.size,
            }),
        }
    }

    /// Bytes of a `len`-byte transfer at a validated `offset` that fit in the partition.
    fn clamp(&self, offset: i64, len: usize) -> usize {
        let remaining = self.size - offset as u64;
        usize::try_from(remaining).map_or(len, |r| r.min(len))
    }
}

fn open_options(flags: i32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    options.custom_flags(flags & FORWARDED_FLAGS);
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::FileExt;

    use crate::session::tests::session_with;

    const MIB: u64 = 1 << 20;

    #[test]
    fn test_open_captures_region() {
        let (_file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let handle = RegionHandle::open(&session, "/part_0", libc::O_RDWR).unwrap();

        assert_eq!(handle.index(), 0);
        assert_eq!(handle.start(), MIB);
        assert_eq!(handle.size(), MIB);
        handle.release().unwrap();
    }

    #[test]
    fn test_open_rejects_unknown_paths() {
        let (_file, session) = session_with(4096, 512, &[(0, 1, Some(1))]);
        for path in ["/part_1", "/part_0x", "/", "/foo"] {
            assert!(matches!(
                RegionHandle::open(&session, path, libc::O_RDONLY),
                Err(Error::NoSuchPartition(_))
            ));
        }
    }

    #[test]
    fn test_write_then_read() {
        let (_file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDWR).unwrap();

        assert_eq!(handle.write(0, b"0123456789").unwrap(), 10);
        assert_eq!(handle.read(0, 10).unwrap(), b"0123456789");
        assert_eq!(handle.read(MIB as i64, 10).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_writes_land_at_partition_offset() {
        let (file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_WRONLY).unwrap();
        handle.write(5, b"abc").unwrap();
        handle.release().unwrap();

        let backing = fs::File::open(file.path()).unwrap();
        let mut buf = [0u8; 3];
        backing.read_exact_at(&mut buf, MIB + 5).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_read_clamped_to_partition() {
        let (file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let backing = fs::OpenOptions::new().write(true).open(file.path()).unwrap();
        backing.write_all_at(&[0xAA; 16], 2 * MIB).unwrap();

        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDONLY).unwrap();
        let data = handle.read(MIB as i64 - 4, 100).unwrap();
        assert_eq!(data, vec![0u8; 4]);
    }

    #[test]
    fn test_write_clamped_to_partition() {
        let (file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDWR).unwrap();

        assert_eq!(handle.write(MIB as i64 - 2, b"xyzw").unwrap(), 2);
        assert_eq!(handle.write(MIB as i64, b"xyzw").unwrap(), 0);

        let backing = fs::File::open(file.path()).unwrap();
        let mut buf = [0u8; 4];
        backing.read_exact_at(&mut buf, 2 * MIB - 2).unwrap();
        assert_eq!(&buf, b"xy\0\0");
    }

    #[test]
    fn test_write_beyond_end() {
        let (_file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDWR).unwrap();

        assert!(matches!(
            handle.write(MIB as i64 + 1, b"x"),
            Err(Error::WriteBeyondEnd { .. })
        ));
        assert!(matches!(
            handle.write(-1, b"x"),
            Err(Error::InvalidOffset { offset: -1, .. })
        ));
    }

    #[test]
    fn test_seek_bounds() {
        let (_file, session) = session_with(4 << 20, 512, &[(0, 2048, Some(2048))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDONLY).unwrap();

        handle.seek(0).unwrap();
        handle.seek(MIB as i64).unwrap();
        assert!(matches!(
            handle.seek(MIB as i64 + 1),
            Err(Error::InvalidOffset { .. })
        ));
        assert!(matches!(handle.seek(-1), Err(Error::InvalidOffset { .. })));
        assert!(matches!(
            handle.read(MIB as i64 + 1, 1),
            Err(Error::InvalidOffset { .. })
        ));
    }

    #[test]
    fn test_short_read_at_backing_end() {
        // Table claims more than the backing file holds.
        let (_file, session) = session_with(4096, 512, &[(0, 4, Some(100))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDONLY).unwrap();
        assert_eq!(handle.read(0, 4096).unwrap().len(), 2048);
    }

    #[test]
    fn test_zero_sized_partition() {
        let (_file, session) = session_with(4096, 512, &[(1, 2, None)]);
        let mut handle = RegionHandle::open(&session, "/part_1", libc::O_RDWR).unwrap();
        assert!(handle.read(0, 16).unwrap().is_empty());
        assert_eq!(handle.write(0, b"abc").unwrap(), 0);
        assert!(matches!(
            handle.write(1, b"abc"),
            Err(Error::WriteBeyondEnd { .. })
        ));
    }

    #[test]
    fn test_read_only_handle_cannot_write() {
        let (_file, session) = session_with(4096, 512, &[(0, 1, Some(4))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDONLY).unwrap();
        assert!(matches!(handle.write(0, b"abc"), Err(Error::Write(_))));
    }

    #[test]
    fn test_independent_handles() {
        let (_file, session) = session_with(
            4 << 20,
            512,
            &[(0, 2048, Some(2048)), (1, 4096, Some(2048))],
        );
        let mut a = RegionHandle::open(&session, "/part_0", libc::O_RDWR).unwrap();
        let mut b = RegionHandle::open(&session, "/part_1", libc::O_RDWR).unwrap();
        let mut a2 = RegionHandle::open(&session, "/part_0", libc::O_RDONLY).unwrap();

        a.write(0, b"first").unwrap();
        b.write(0, b"second").unwrap();
        a.seek(100).unwrap();

        assert_eq!(a2.read(0, 5).unwrap(), b"first");
        assert_eq!(b.read(0, 6).unwrap(), b"second");
        a.release().unwrap();
        assert_eq!(a2.read(0, 5).unwrap(), b"first");
    }

    #[test]
    fn test_sync() {
        let (_file, session) = session_with(4096, 512, &[(0, 1, Some(4))]);
        let mut handle = RegionHandle::open(&session, "/part_0", libc::O_RDWR).unwrap();
        handle.write(0, b"abc").unwrap();
        handle.sync(true).unwrap();
        handle.sync(false).unwrap();
    }

    #[test]
    fn test_unaddressable_partition_cannot_open() {
        let (_file, session) = session_with(
            4096,
            512,
            &[(0, 1 << 60, Some(8)), (1, u64::MAX / 512, Some(2)), (2, 1, Some(4))],
        );
        for path in ["/part_0", "/part_1"] {
            assert!(matches!(
                RegionHandle::open(&session, path, libc::O_RDONLY),
                Err(Error::NoSuchPartition(_))
            ));
        }

        let mut handle = RegionHandle::open(&session, "/part_2", libc::O_RDONLY).unwrap();
        assert_eq!(handle.read(1, 1).unwrap().len(), 1);
    }
}
