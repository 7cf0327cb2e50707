//! Partition table integration tests.
//!
//! Reads DOS and GPT labels from images written by the harness:
//! - Slot numbering and sizes
//! - GPT sector size probing
//! - Rejection of unlabeled and corrupted images

use partfs_table::{DiskLabel, LabelKind, PartitionTable, TableError, TableOptions};
use partfs_tests::harness::init_tracing;
use partfs_tests::image::{boot_sector, DiskImage};
use partfs_tests::TestDevice;

const MIB: u64 = 1024 * 1024;

#[test]
fn test_dos_label() {
    init_tracing();

    let image = DiskImage::dos(8 * MIB)
        .partition(0, 2048, 2048)
        .partition(2, 4096, 4096)
        .build();
    let label = DiskLabel::open(image.path(), &TableOptions::default()).unwrap();

    assert_eq!(label.label(), LabelKind::Dos);
    assert_eq!(label.sector_size(), 512);

    let indices: Vec<u64> = label.partitions().iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 2]);

    let second = label.partition(2).unwrap();
    assert_eq!(second.start_offset(512), Some(2 * MIB));
    assert_eq!(second.byte_size(512), Some(2 * MIB));
    assert_eq!(second.type_name, "Linux");
}

#[test]
fn test_gpt_label() {
    init_tracing();

    let image = DiskImage::gpt(8 * MIB, 512)
        .named_partition(0, 2048, 2048, "boot")
        .named_partition(3, 4096, 8192, "root")
        .build();
    let label = DiskLabel::open(image.path(), &TableOptions::default()).unwrap();

    assert_eq!(label.label(), LabelKind::Gpt);
    assert_eq!(label.sector_size(), 512);

    let records = label.partitions();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].index, 0);
    assert_eq!(records[0].name.as_deref(), Some("boot"));
    assert_eq!(records[0].type_name, "Linux filesystem");
    assert_eq!(records[1].index, 3);
    assert_eq!(records[1].byte_size(512), Some(4 * MIB));
    assert!(label.partition(1).is_none());
}

#[test]
fn test_gpt_4k_sectors_are_probed() {
    init_tracing();

    let image = DiskImage::gpt(16 * MIB, 4096).partition(0, 256, 256).build();
    let label = DiskLabel::open(image.path(), &TableOptions::default()).unwrap();

    assert_eq!(label.sector_size(), 4096);
    let record = label.partition(0).unwrap();
    assert_eq!(record.start_offset(4096), Some(MIB));
    assert_eq!(record.byte_size(4096), Some(MIB));
}

#[test]
fn test_gpt_sector_size_override_must_match() {
    let image = DiskImage::gpt(16 * MIB, 4096).partition(0, 256, 256).build();

    let options = TableOptions {
        sector_size: Some(512),
    };
    assert!(DiskLabel::open(image.path(), &options).is_err());

    let options = TableOptions {
        sector_size: Some(4096),
    };
    assert_eq!(DiskLabel::open(image.path(), &options).unwrap().sector_size(), 4096);
}

#[test]
fn test_corrupted_gpt_entries() {
    let image = DiskImage::gpt(8 * MIB, 512).partition(0, 2048, 2048).build();
    // Flip a byte inside the first entry's starting LBA.
    let device = image.as_file();
    std::os::unix::fs::FileExt::write_all_at(device, &[0xFF], 2 * 512 + 33).unwrap();

    assert!(matches!(
        DiskLabel::open(image.path(), &TableOptions::default()),
        Err(TableError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_unlabeled_image() {
    let image = DiskImage::dos(MIB).build();
    std::os::unix::fs::FileExt::write_all_at(image.as_file(), &[0u8; 512], 0).unwrap();

    assert!(matches!(
        DiskLabel::open(image.path(), &TableOptions::default()),
        Err(TableError::NoLabel)
    ));
}

#[test]
fn test_extended_container_is_listed_flat() {
    let image = DiskImage::dos(8 * MIB).build();
    let sector = boot_sector(&[(0, 0x83, 2048, 2048), (1, 0x05, 4096, 8192)]);
    std::os::unix::fs::FileExt::write_all_at(image.as_file(), &sector, 0).unwrap();

    let label = DiskLabel::open(image.path(), &TableOptions::default()).unwrap();
    let records = label.partitions();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].type_name, "Extended");
}

#[test]
fn test_session_uses_probed_sector_size() {
    init_tracing();

    let device = TestDevice::new(&DiskImage::gpt(16 * MIB, 4096).partition(1, 512, 256));
    assert_eq!(device.session().sector_size(), 4096);
    assert_eq!(device.session().partition_region(1), Some((2 * MIB, MIB)));
}

#[test]
fn test_gpt_entry_past_usable_area() {
    // 8 MiB at 512-byte sectors leaves LBAs 34..=16350 usable.
    let image = DiskImage::gpt(8 * MIB, 512).partition(0, 16000, 1000).build();

    assert!(matches!(
        DiskLabel::open(image.path(), &TableOptions::default()),
        Err(TableError::InvalidGpt(_))
    ));
}

#[test]
fn test_oversized_sector_size_override() {
    let image = DiskImage::gpt(8 * MIB, 512).partition(0, 2048, 2048).build();
    let options = TableOptions {
        sector_size: Some(1 << 40),
    };

    assert!(matches!(
        DiskLabel::open(image.path(), &options),
        Err(TableError::InvalidSectorSize(_))
    ));
}
