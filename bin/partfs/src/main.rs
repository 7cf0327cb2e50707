//! Partfs - mount the partitions of a disk image as individual files.
//!
//! `partfs -o dev=disk.img /mnt/parts` exposes every entry of the image's
//! partition table as `/mnt/parts/part_<N>`, so tools such as `mkfs` can run
//! on a partition without loop devices or root privileges.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use partfs_core::{partition_name, DeviceSession};
use partfs_fs::MountConfig;
use partfs_table::TableOptions;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

const FS_OPTIONS_HELP: &str = "\
File system-specific options:

    -o dev=FILE            disk image or block device to expose
    -o sector_size=N       logical sector size in bytes (probed by default)
    -o ro | rw             mount read-only or read-write
    -o allow_other         allow access by other users
    -o auto_unmount        unmount when the process exits
    -o fsname=NAME         name shown in the mount table

Any other -o option is passed to FUSE unchanged.";

/// Mount the partitions of a disk image as files.
#[derive(Parser)]
#[command(name = "partfs")]
#[command(author, version, about, long_about = None)]
#[command(after_help = FS_OPTIONS_HELP)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.partfs/config.toml")]
    config: PathBuf,

    /// Mount options, comma separated (dev=FILE, ro, allow_other, ...)
    #[arg(short = 'o', value_name = "OPT[,OPT...]")]
    options: Vec<String>,

    /// Mount point path
    mount_point: Option<PathBuf>,
}

/// Everything needed to mount, merged from config file and command line.
#[derive(Debug, Clone, Default)]
struct Settings {
    /// Backing file
    device: Option<PathBuf>,
    /// Partition table options
    table: TableOptions,
    /// Mount configuration
    mount: MountConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    // Without a device and a mount point there is nothing to mount; behave
    // like --help.
    let Some((device, settings)) = resolve_settings(&cli)? else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let session = DeviceSession::initialize(&device, &settings.table)
        .map_err(|e| {
            error!(device = %device.display(), error = %e, "Setup failed");
            e
        })
        .with_context(|| format!("unable to read partitions on {}", device.display()))?;

    log_partitions(&session);

    let mount_point = settings.mount.mount_point.clone();
    partfs_fs::mount(session, settings.mount)
        .with_context(|| format!("Failed to mount {}", mount_point.display()))?;

    Ok(())
}

/// Merges the config file and `-o` options.
///
/// Returns `None` when the device or the mount point is missing.
fn resolve_settings(cli: &Cli) -> Result<Option<(PathBuf, Settings)>> {
    let mut settings = Settings::default();
    load_config(&cli.config, &mut settings)?;
    apply_options(&cli.options, &mut settings)?;

    let (Some(device), Some(mount_point)) = (settings.device.clone(), cli.mount_point.clone())
    else {
        return Ok(None);
    };
    settings.mount.mount_point = mount_point;
    Ok(Some((device, settings)))
}

fn log_partitions(session: &DeviceSession) {
    let (sector_size, records) = session.partitions();
    info!(
        label = %session.label(),
        sector_size = sector_size,
        count = records.len(),
        "Partition table"
    );
    for record in records {
        let Some((start, size)) = record.region(sector_size) else {
            continue;
        };
        info!(
            file = %partition_name(record.index),
            kind = %record.type_name,
            name = record.name.as_deref().unwrap_or(""),
            start = start,
            size = size,
            "Partition"
        );
    }
}

/// Load settings from a TOML file, if it exists.
fn load_config(path: &Path, settings: &mut Settings) -> Result<()> {
    let path = expand_tilde(path);

    if !path.exists() {
        debug!("No config file found at {:?}, using defaults", path);
        return Ok(());
    }

    let content = std::fs::read_to_string(&path).context("Failed to read config file")?;

    let toml: toml::Table = content.parse().context("Failed to parse config file")?;

    // Parse [mount] section
    if let Some(mount) = toml.get("mount") {
        if let Some(allow_other) = mount.get("allow_other").and_then(|v| v.as_bool()) {
            settings.mount.allow_other = allow_other;
        }
        if let Some(auto_unmount) = mount.get("auto_unmount").and_then(|v| v.as_bool()) {
            settings.mount.auto_unmount = auto_unmount;
        }
        if let Some(read_only) = mount.get("read_only").and_then(|v| v.as_bool()) {
            settings.mount.read_only = read_only;
        }
        if let Some(ttl) = mount.get("attr_ttl_secs").and_then(|v| v.as_integer()) {
            settings.mount.attr_ttl_secs = u64::try_from(ttl).context("Invalid attr_ttl_secs")?;
        }
        if let Some(fsname) = mount.get("fsname").and_then(|v| v.as_str()) {
            settings.mount.fsname = fsname.to_string();
        }
    }

    // Parse [device] section
    if let Some(device) = toml.get("device") {
        if let Some(sector_size) = device.get("sector_size").and_then(|v| v.as_integer()) {
            settings.table.sector_size =
                Some(u64::try_from(sector_size).context("Invalid sector_size")?);
        }
    }

    Ok(())
}

/// Apply `-o` options on top of the loaded settings.
fn apply_options(options: &[String], settings: &mut Settings) -> Result<()> {
    let options = options
        .iter()
        .flat_map(|o| o.split(','))
        .filter(|o| !o.is_empty());

    for option in options {
        match option.split_once('=') {
            Some(("dev", path)) => settings.device = Some(PathBuf::from(path)),
            Some(("sector_size", value)) => {
                let size = value
                    .parse()
                    .with_context(|| format!("Invalid sector_size: {}", value))?;
                settings.table.sector_size = Some(size);
            }
            Some(("fsname", name)) => settings.mount.fsname = name.to_string(),
            _ => match option {
                "ro" => settings.mount.read_only = true,
                "rw" => settings.mount.read_only = false,
                "allow_other" => settings.mount.allow_other = true,
                "auto_unmount" => settings.mount.auto_unmount = true,
                other => settings.mount.extra_options.push(other.to_string()),
            },
        }
    }

    Ok(())
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tempfile::NamedTempFile;

    fn opts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cli_parses_options() {
        let cli = Cli::try_parse_from([
            "partfs",
            "-o",
            "dev=disk.img,ro",
            "-o",
            "allow_other",
            "-vv",
            "/mnt/parts",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.options, opts(&["dev=disk.img,ro", "allow_other"]));
        assert_eq!(cli.mount_point, Some(PathBuf::from("/mnt/parts")));
    }

    #[test]
    fn test_bare_invocation_is_help_request() {
        let cli = Cli::try_parse_from(["partfs"]).unwrap();
        assert!(cli.mount_point.is_none());

        let cli = Cli::try_parse_from(["partfs", "-c", "/nonexistent/partfs.toml"]).unwrap();
        assert!(resolve_settings(&cli).unwrap().is_none());

        let cli =
            Cli::try_parse_from(["partfs", "-c", "/nonexistent/partfs.toml", "-o", "ro"]).unwrap();
        assert!(resolve_settings(&cli).unwrap().is_none());
    }

    #[test]
    fn test_missing_mount_point_is_help_request() {
        let cli = Cli::try_parse_from([
            "partfs",
            "-c",
            "/nonexistent/partfs.toml",
            "-o",
            "dev=disk.img",
        ])
        .unwrap();
        assert!(resolve_settings(&cli).unwrap().is_none());
    }

    #[test]
    fn test_resolve_settings() {
        let cli = Cli::try_parse_from([
            "partfs",
            "-c",
            "/nonexistent/partfs.toml",
            "-o",
            "dev=disk.img,allow_other",
            "/mnt/parts",
        ])
        .unwrap();
        let (device, settings) = resolve_settings(&cli).unwrap().unwrap();

        assert_eq!(device, PathBuf::from("disk.img"));
        assert_eq!(settings.mount.mount_point, PathBuf::from("/mnt/parts"));
        assert!(settings.mount.allow_other);
    }

    #[test]
    fn test_apply_options() {
        let mut settings = Settings::default();
        apply_options(
            &opts(&["dev=/tmp/disk.img,ro", "sector_size=4096,fsname=disk", "noatime"]),
            &mut settings,
        )
        .unwrap();

        assert_eq!(settings.device, Some(PathBuf::from("/tmp/disk.img")));
        assert!(settings.mount.read_only);
        assert_eq!(settings.table.sector_size, Some(4096));
        assert_eq!(settings.mount.fsname, "disk");
        assert_eq!(settings.mount.extra_options, opts(&["noatime"]));
    }

    #[test]
    fn test_missing_device_option() {
        let mut settings = Settings::default();
        apply_options(&opts(&["ro"]), &mut settings).unwrap();
        assert!(settings.device.is_none());
    }

    #[test]
    fn test_invalid_sector_size_option() {
        let mut settings = Settings::default();
        assert!(apply_options(&opts(&["sector_size=big"]), &mut settings).is_err());
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[mount]\nallow_other = true\nattr_ttl_secs = 5\nfsname = \"images\"\n\n[device]\nsector_size = 4096"
        )
        .unwrap();

        let mut settings = Settings::default();
        load_config(file.path(), &mut settings).unwrap();

        assert!(settings.mount.allow_other);
        assert_eq!(settings.mount.attr_ttl_secs, 5);
        assert_eq!(settings.mount.fsname, "images");
        assert_eq!(settings.table.sector_size, Some(4096));

        // Command line wins over the file.
        apply_options(&opts(&["sector_size=512"]), &mut settings).unwrap();
        assert_eq!(settings.table.sector_size, Some(512));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let mut settings = Settings::default();
        load_config(Path::new("/nonexistent/partfs.toml"), &mut settings).unwrap();
        assert_eq!(settings.mount.attr_ttl_secs, 1);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/etc/x")), PathBuf::from("/etc/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/a.toml")), home.join("a.toml"));
        }
    }
}
