//! Utility functions

use crate::types::OutputFormat;

/// Output file name for one exported entry.
///
/// Entries of hierarchical containers become `<group>_<entry>.<ext>`;
/// the single unnamed entry of a flat container becomes `<group>.<ext>`.
pub fn output_file_name(group: &str, entry: &str, format: OutputFormat) -> String {
    if entry.is_empty() {
        format!("{}.{}", group, format.extension())
    } else {
        format!("{}_{}.{}", group, entry, format.extension())
    }
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
