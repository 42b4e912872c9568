//! Finding candidate source files below a root directory

use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Rule for which file names count as source containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFilter {
    /// A digit directly before the extension, e.g. `dataset00.h5`
    DigitBeforeExtension,
    /// The extension anywhere in the name
    ContainsExtension,
    /// Custom regular expression searched in the file name
    Pattern(String),
}

impl FileFilter {
    /// Compile the filter for files with extension `ext`
    pub fn to_regex(&self, ext: &str) -> Result<Regex> {
        let pattern = match self {
            FileFilter::DigitBeforeExtension => format!(r"\d\.{}", regex::escape(ext)),
            FileFilter::ContainsExtension => format!(r"\.{}", regex::escape(ext)),
            FileFilter::Pattern(pattern) => pattern.clone(),
        };
        Ok(Regex::new(&pattern)?)
    }
}

/// List every regular file below `root` whose name matches `pattern`.
///
/// Entries that cannot be read are logged and skipped. The result is
/// sorted so runs over the same tree visit files in the same order.
pub fn scan_files(root: impl AsRef<Path>, pattern: &Regex) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root.as_ref())
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Cannot read directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| pattern.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
