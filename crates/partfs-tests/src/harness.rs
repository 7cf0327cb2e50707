//! Test device harness: a disk image plus a live device session.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

use partfs_core::{partition_path, DeviceSession, RegionHandle};
use partfs_table::TableOptions;
use tempfile::NamedTempFile;
use tracing::info;

use crate::image::DiskImage;

/// Initialize tracing for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("partfs_core=debug,partfs_table=debug,partfs_fs=debug")
        .with_test_writer()
        .try_init();
}

/// A backing image with a session opened over it.
pub struct TestDevice {
    /// Backing file, removed on drop
    image: NamedTempFile,
    /// Session over the image
    session: DeviceSession,
}

impl TestDevice {
    /// Builds `image` and opens a session with probed settings.
    pub fn new(image: &DiskImage) -> Self {
        Self::with_options(image, &TableOptions::default())
    }

    /// Builds `image` and opens a session with `options`.
    pub fn with_options(image: &DiskImage, options: &TableOptions) -> Self {
        let image = image.build();
        let session = DeviceSession::initialize(image.path(), options).expect("initialize session");
        info!(path = %image.path().display(), "Test device ready");
        Self { image, session }
    }

    /// The device session.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Path of the backing image.
    pub fn path(&self) -> &Path {
        self.image.path()
    }

    /// Opens partition `index` through the region adapter.
    pub fn open(&self, index: u64, flags: i32) -> RegionHandle {
        RegionHandle::open(&self.session, &partition_path(index), flags).expect("open partition")
    }

    /// Reads the backing image directly.
    pub fn read_backing(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.image
            .as_file()
            .read_exact_at(&mut buf, offset)
            .expect("read backing");
        buf
    }

    /// Writes the backing image directly.
    pub fn write_backing(&self, offset: u64, data: &[u8]) {
        let file = OpenOptions::new()
            .write(true)
            .open(self.image.path())
            .expect("open backing");
        file.write_all_at(data, offset).expect("write backing");
    }

    /// Splits into the backing file and the session.
    pub fn into_parts(self) -> (NamedTempFile, DeviceSession) {
        (self.image, self.session)
    }
}
