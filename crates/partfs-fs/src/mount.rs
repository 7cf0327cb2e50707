//! Mount configuration.

use std::path::PathBuf;
use std::time::Duration;

use fuser::MountOption;

/// Mount configuration.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Mount point path
    pub mount_point: PathBuf,
    /// Allow other users to access
    pub allow_other: bool,
    /// Unmount automatically when the process exits
    pub auto_unmount: bool,
    /// Read-only mount
    pub read_only: bool,
    /// Attribute cache timeout in seconds
    pub attr_ttl_secs: u64,
    /// Filesystem name shown in the mount table
    pub fsname: String,
    /// Options passed through to FUSE verbatim
    pub extra_options: Vec<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::new(),
            allow_other: false,
            auto_unmount: false,
            read_only: false,
            attr_ttl_secs: 1,
            fsname: "partfs".to_string(),
            extra_options: Vec::new(),
        }
    }
}

impl MountConfig {
    /// Creates a configuration for the given mount point.
    pub fn new(mount_point: PathBuf) -> Self {
        Self {
            mount_point,
            ..Default::default()
        }
    }

    /// Attribute cache timeout.
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }

    /// FUSE mount options.
    ///
    /// `default_permissions` is always set so the kernel checks access
    /// against the mode and owner mirrored from the backing file.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fsname.clone()),
            MountOption::Subtype("partfs".to_string()),
            MountOption::DefaultPermissions,
        ];

        options.push(if self.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        });
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options.extend(self.extra_options.iter().cloned().map(MountOption::CUSTOM));

        options
    }
}
