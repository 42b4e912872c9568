//! Batch conversion - the main API for exporting a directory of volumes

use crate::config::ConvertOptions;
use crate::container::{open_container, Container};
use crate::error::{ConvertError, Result};
use crate::output::{write_volume, WriteOptions, WriteOutcome};
use crate::scan::scan_files;
use crate::utils::{format_bytes, output_file_name};
use crate::volume::cast_to_unsigned;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Converts every matching container below a root directory
pub struct Converter {
    options: ConvertOptions,
    write: WriteOptions,
    pattern: Regex,
}

impl Converter {
    /// Validate `options` and prepare a converter
    pub fn new(options: ConvertOptions) -> Result<Self> {
        options.validate()?;
        let pattern = options.file_filter.to_regex(options.source.extension())?;
        let write = options.write_options();
        Ok(Self {
            options,
            write,
            pattern,
        })
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Convert every matching file below `root`.
    ///
    /// Failures of single files or entries are logged and counted in the
    /// report; only an unusable root directory is an error.
    pub fn run(&self, root: impl AsRef<Path>) -> Result<ConversionReport> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ConvertError::Configuration(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let started = Instant::now();
        let output_dir = self.options.output_dir_for(root);
        let files = scan_files(root, &self.pattern);
        info!(
            "Found {} {} file(s) below {}",
            files.len(),
            self.options.source.extension(),
            root.display()
        );

        let mut report = ConversionReport::default();
        for file in &files {
            match self.convert_file(file, &output_dir, &mut report) {
                Ok(()) => report.files_processed += 1,
                Err(e) => {
                    error!("{}", e);
                    report.files_failed += 1;
                    report.failures.push(Failure {
                        location: file.display().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        info!("{}", report.summary());
        Ok(report)
    }

    /// Export the selected entries of one container into `output_dir`.
    ///
    /// An error is returned only when the container cannot be opened or
    /// listed; entry failures are recorded in `report`.
    pub fn convert_file(
        &self,
        path: &Path,
        output_dir: &Path,
        report: &mut ConversionReport,
    ) -> Result<()> {
        info!(
            "Exporting {} files from {}",
            self.options.output.extension(),
            path.display()
        );
        let container = open_container(path, self.options.source)?;

        let groups = container.group_names()?;
        let selected = if container.format().is_hierarchical() {
            self.options.group_policy.select(&groups)
        } else {
            groups
        };
        if selected.is_empty() {
            warn!(
                "No group of {} matches {:?}",
                path.display(),
                self.options.group_policy
            );
        }

        for group in &selected {
            info!("Working on group: {}", group);
            let entries = match container.entry_names(group) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("{}", e);
                    report.groups_failed += 1;
                    report.failures.push(Failure {
                        location: format!("{}:/{}", path.display(), group),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            for entry in &entries {
                if !entry.is_empty() {
                    info!(" subgroup: {}", entry);
                }
                let target = output_dir.join(output_file_name(group, entry, self.options.output));
                match self.convert_entry(container.as_ref(), group, entry, &target) {
                    Ok(WriteOutcome::Written { bytes }) => {
                        report.entries_written += 1;
                        report.bytes_written += bytes;
                        report.written.push(target);
                    }
                    Ok(WriteOutcome::Skipped) => report.entries_skipped += 1,
                    Err(e) => {
                        error!("{}", e);
                        report.entries_failed += 1;
                        report.failures.push(Failure {
                            location: target.display().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        debug!("Closing {}", path.display());
        Ok(())
    }

    /// Read, narrow and write a single entry
    pub fn convert_entry(
        &self,
        container: &dyn Container,
        group: &str,
        entry: &str,
        target: &Path,
    ) -> Result<WriteOutcome> {
        if is_same_file(target, container.path()) {
            return Err(ConvertError::write(
                target,
                "output would overwrite its source container",
            ));
        }
        if self.write.skips(target) {
            info!("Skipping, output already exists: {}", target.display());
            return Ok(WriteOutcome::Skipped);
        }

        let source = container.read_volume(group, entry)?;
        debug!(
            "Read {:?} {} volume, writing {}",
            source.shape(),
            source.sample_type(),
            self.options.bit_width
        );
        let volume = cast_to_unsigned(&source, self.options.bit_width);
        drop(source);
        write_volume(volume, target, &self.write)
    }
}

/// Whether both paths resolve to the same existing file
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// A file, group or entry that could not be converted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub location: String,
    pub message: String,
}

/// Tally of a conversion run
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    pub files_processed: usize,
    pub files_failed: usize,
    pub groups_failed: usize,
    pub entries_written: usize,
    pub entries_skipped: usize,
    pub entries_failed: usize,
    pub bytes_written: u64,
    /// Output files written during this run, in order
    pub written: Vec<PathBuf>,
    pub failures: Vec<Failure>,
    pub elapsed: Duration,
}

impl ConversionReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} file(s) processed, {} failed; {} entries written ({}), {} skipped, {} failed in {:.1?}",
            self.files_processed,
            self.files_failed,
            self.entries_written,
            format_bytes(self.bytes_written),
            self.entries_skipped,
            self.entries_failed + self.groups_failed,
            self.elapsed,
        )
    }
}
