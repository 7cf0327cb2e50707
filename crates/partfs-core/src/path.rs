//! Synthetic path grammar.
//!
//! The root is `/` and partition `k` is `/part_<k>`, where `<k>` is one or
//! more ASCII decimal digits and nothing follows them.

/// File name prefix of every partition file.
pub const PARTITION_PREFIX: &str = "part_";

/// Filesystem root designator.
pub const ROOT: &str = "/";

/// Returns true iff `path` is exactly the root.
pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Parses `/part_<k>` into `k`.
///
/// Signs, whitespace, trailing characters and values that overflow `u64`
/// are rejected.
pub fn parse_partition_index(path: &str) -> Option<u64> {
    let digits = path.strip_prefix('/')?.strip_prefix(PARTITION_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Directory entry name for partition `index`.
pub fn partition_name(index: u64) -> String {
    format!("{PARTITION_PREFIX}{index}")
}

/// Absolute synthetic path for partition `index`.
pub fn partition_path(index: u64) -> String {
    format!("{ROOT}{}", partition_name(index))
}
