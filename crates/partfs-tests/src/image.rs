//! Disk image builder.
//!
//! Writes partition tables byte by byte, independently of the parser, into
//! sparse temporary files.

use std::os::unix::fs::FileExt;

use tempfile::NamedTempFile;
use uuid::Uuid;

/// GPT type GUID of a Linux filesystem partition.
pub const LINUX_FILESYSTEM: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

/// Number of GPT entry slots written.
pub const GPT_ENTRIES: usize = 128;

const GPT_ENTRY_SIZE: usize = 128;

/// Partition to place in an image.
#[derive(Debug, Clone)]
pub struct ImagePartition {
    /// Table slot
    pub slot: usize,
    /// First sector
    pub start_sector: u64,
    /// Length in sectors
    pub size_sectors: u64,
    /// GPT partition name
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Dos,
    Gpt,
}

/// A disk image under construction.
#[derive(Debug, Clone)]
pub struct DiskImage {
    len: u64,
    sector_size: u64,
    layout: Layout,
    partitions: Vec<ImagePartition>,
}

impl DiskImage {
    /// Image of `len` bytes with a DOS label.
    pub fn dos(len: u64) -> Self {
        Self {
            len,
            sector_size: 512,
            layout: Layout::Dos,
            partitions: Vec::new(),
        }
    }

    /// Image of `len` bytes with a GPT using `sector_size` byte sectors.
    pub fn gpt(len: u64, sector_size: u64) -> Self {
        Self {
            len,
            sector_size,
            layout: Layout::Gpt,
            partitions: Vec::new(),
        }
    }

    /// Adds a partition in `slot`.
    pub fn partition(self, slot: usize, start_sector: u64, size_sectors: u64) -> Self {
        self.named_partition(slot, start_sector, size_sectors, "")
    }

    /// Adds a named partition in `slot` (names are GPT only).
    pub fn named_partition(
        mut self,
        slot: usize,
        start_sector: u64,
        size_sectors: u64,
        name: &str,
    ) -> Self {
        self.partitions.push(ImagePartition {
            slot,
            start_sector,
            size_sectors,
            name: name.to_string(),
        });
        self
    }

    /// Sector size the table is written with.
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Writes the image to a temporary file.
    pub fn build(&self) -> NamedTempFile {
        let file = NamedTempFile::new().expect("create image");
        file.as_file().set_len(self.len).expect("size image");

        match self.layout {
            Layout::Dos => {
                let entries: Vec<_> = self
                    .partitions
                    .iter()
                    .map(|p| (p.slot, 0x83, p.start_sector as u32, p.size_sectors as u32))
                    .collect();
                write_at(&file, 0, &boot_sector(&entries));
            }
            Layout::Gpt => self.write_gpt(&file),
        }

        file
    }

    fn write_gpt(&self, file: &NamedTempFile) {
        let ss = self.sector_size;
        let total_sectors = self.len / ss;
        let protective_len = (total_sectors - 1).min(u64::from(u32::MAX)) as u32;
        write_at(file, 0, &boot_sector(&[(0, 0xEE, 1, protective_len)]));

        let type_guid = Uuid::parse_str(LINUX_FILESYSTEM).expect("type guid");
        let mut entries = vec![0u8; GPT_ENTRIES * GPT_ENTRY_SIZE];
        for p in &self.partitions {
            let e = &mut entries[p.slot * GPT_ENTRY_SIZE..(p.slot + 1) * GPT_ENTRY_SIZE];
            e[..16].copy_from_slice(&type_guid.to_bytes_le());
            e[16..32].copy_from_slice(&Uuid::new_v4().to_bytes_le());
            e[32..40].copy_from_slice(&p.start_sector.to_le_bytes());
            e[40..48].copy_from_slice(&(p.start_sector + p.size_sectors - 1).to_le_bytes());
            for (i, unit) in p.name.encode_utf16().take(36).enumerate() {
                e[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
            }
        }

        let entry_sectors = (entries.len() as u64).div_ceil(ss);
        let mut header = vec![0u8; ss as usize];
        header[..8].copy_from_slice(b"EFI PART");
        header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        header[12..16].copy_from_slice(&92u32.to_le_bytes());
        header[24..32].copy_from_slice(&1u64.to_le_bytes());
        header[32..40].copy_from_slice(&(total_sectors - 1).to_le_bytes());
        header[40..48].copy_from_slice(&(2 + entry_sectors).to_le_bytes());
        header[48..56].copy_from_slice(&(total_sectors - 2 - entry_sectors).to_le_bytes());
        header[56..72].copy_from_slice(&Uuid::new_v4().to_bytes_le());
        header[72..80].copy_from_slice(&2u64.to_le_bytes());
        header[80..84].copy_from_slice(&(GPT_ENTRIES as u32).to_le_bytes());
        header[84..88].copy_from_slice(&(GPT_ENTRY_SIZE as u32).to_le_bytes());
        header[88..92].copy_from_slice(&crc32fast::hash(&entries).to_le_bytes());
        let crc = crc32fast::hash(&header[..92]);
        header[16..20].copy_from_slice(&crc.to_le_bytes());

        write_at(file, ss, &header);
        write_at(file, 2 * ss, &entries);
    }
}

/// Boot sector with the given `(slot, type, start_lba, sector_count)` entries.
pub fn boot_sector(entries: &[(usize, u8, u32, u32)]) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    for &(slot, ptype, start, count) in entries {
        let off = 446 + slot * 16;
        sector[off + 4] = ptype;
        sector[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
        sector[off + 12..off + 16].copy_from_slice(&count.to_le_bytes());
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

fn write_at(file: &NamedTempFile, offset: u64, data: &[u8]) {
    file.as_file()
        .write_all_at(data, offset)
        .expect("write image");
}
