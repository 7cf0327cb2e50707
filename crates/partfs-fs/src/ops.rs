//! High-level filesystem operations.

use partfs_core::DeviceSession;
use tracing::info;

use crate::mount::MountConfig;
use crate::vfs::PartFilesystem;
use crate::FsError;

/// Mounts the partitions of `session` and serves requests until unmounted.
///
/// The session must already be initialized, so setup failures surface
/// before any request can arrive.
pub fn mount(session: DeviceSession, config: MountConfig) -> Result<(), FsError> {
    let mount_point = config.mount_point.clone();
    if !mount_point.is_dir() {
        return Err(FsError::Mount(format!(
            "Mount point {} is not a directory",
            mount_point.display()
        )));
    }

    let options = config.mount_options();
    info!(
        device = %session.canonical_path().display(),
        mount_point = %mount_point.display(),
        "Mounting partitions"
    );

    let fs = PartFilesystem::new(session, config);
    fuser::mount2(fs, &mount_point, &options)
        .map_err(|e| FsError::Mount(format!("FUSE mount failed: {}", e)))?;

    info!(mount_point = %mount_point.display(), "Unmounted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use partfs_table::{PartitionTable, TableError};
    use tempfile::NamedTempFile;

    #[test]
    fn test_mount_point_must_exist() {
        let mut backing = NamedTempFile::new().unwrap();
        backing.write_all(&[0u8; 512]).unwrap();

        struct Empty;
        impl PartitionTable for Empty {
            fn label(&self) -> partfs_table::LabelKind {
                partfs_table::LabelKind::Dos
            }
            fn sector_size(&self) -> u64 {
                512
            }
            fn partition(&self, _index: u64) -> Option<partfs_table::PartitionRecord> {
                None
            }
            fn partitions(&self) -> Vec<partfs_table::PartitionRecord> {
                Vec::new()
            }
        }

        let session = DeviceSession::initialize_with(backing.path(), |_| {
            Ok::<_, TableError>(Box::new(Empty) as Box<dyn PartitionTable>)
        })
        .unwrap();
        let config = MountConfig::new("/nonexistent/partfs/mnt".into());

        assert!(matches!(mount(session, config), Err(FsError::Mount(_))));
    }
}
