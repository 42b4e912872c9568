//! Writing converted volumes to disk

use crate::error::{ConvertError, Result};
use crate::klb::{write_klb, KlbWriteOptions};
use crate::tiff_writer::{write_tiff, TiffWriteOptions};
use crate::types::OutputFormat;
use crate::volume::Volume;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything the writer needs to know about one output file
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub format: OutputFormat,
    /// Leave existing output files untouched
    pub skip_existing: bool,
    /// Write `(Z, Y, X)` volumes as `(Z, 1, Y, X)`
    pub reshape_pages: bool,
    pub tiff: TiffWriteOptions,
    pub klb: KlbWriteOptions,
}

impl WriteOptions {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            skip_existing: false,
            reshape_pages: false,
            tiff: TiffWriteOptions::default(),
            klb: KlbWriteOptions::default(),
        }
    }

    /// Whether `path` must be left alone under these options
    pub fn skips(&self, path: &Path) -> bool {
        self.skip_existing && path.exists()
    }
}

/// Result of a single write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// File written, with its size on disk
    Written { bytes: u64 },
    /// Output already existed and `skip_existing` was set
    Skipped,
}

/// Write `volume` to `path` in the configured format.
///
/// A file left behind by a failed write is removed again.
pub fn write_volume(volume: Volume, path: &Path, options: &WriteOptions) -> Result<WriteOutcome> {
    if options.skips(path) {
        info!("Skipping, output already exists: {}", path.display());
        return Ok(WriteOutcome::Skipped);
    }

    let volume = if options.reshape_pages {
        volume
            .reshape_pages()
            .map_err(|e| ConvertError::write(path, e))?
    } else {
        volume
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ConvertError::write(path, e))?;
        }
    }

    if let Err(e) = encode(&volume, path, options) {
        if path.exists() {
            if let Err(remove) = fs::remove_file(path) {
                warn!("Cannot remove partial output {}: {}", path.display(), remove);
            }
        }
        return Err(match e {
            e @ ConvertError::Write { .. } => e,
            e => ConvertError::write(path, e),
        });
    }

    let bytes = fs::metadata(path)?.len();
    debug!(
        "Wrote {} ({:?}, {})",
        path.display(),
        volume.shape(),
        volume.bit_width()
    );
    Ok(WriteOutcome::Written { bytes })
}

fn encode(volume: &Volume, path: &Path, options: &WriteOptions) -> Result<()> {
    match options.format {
        OutputFormat::Tiff => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_tiff(&mut writer, volume, &options.tiff)?;
            writer.flush()?;
        }
        OutputFormat::Klb => {
            match volume {
                Volume::U8(a) => write_klb(path, a, &options.klb)?,
                Volume::U16(a) => write_klb(path, a, &options.klb)?,
            };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klb::read_header;
    use crate::types::SampleType;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn volume() -> Volume {
        Volume::U8(Array3::<u8>::ones((3, 4, 5)).into_dyn())
    }

    #[test]
    fn test_skip_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("t00000_s00.tif");
        let mut options = WriteOptions::new(OutputFormat::Tiff);
        options.skip_existing = true;

        let first = write_volume(volume(), &path, &options).unwrap();
        assert!(matches!(first, WriteOutcome::Written { bytes } if bytes > 0));
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(write_volume(volume(), &path, &options).unwrap(), WriteOutcome::Skipped);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn test_overwrite_when_not_skipping() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.klb");
        fs::write(&path, b"stale").unwrap();

        let options = WriteOptions::new(OutputFormat::Klb);
        write_volume(volume(), &path, &options).unwrap();
        let header = read_header(&path).unwrap();
        assert_eq!(header.data_type, SampleType::U8);
        assert_eq!(header.xyzct, [5, 4, 3, 1, 1]);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/flat.tif");
        let mut options = WriteOptions::new(OutputFormat::Tiff);
        options.reshape_pages = true;

        let flat = Volume::U8(ndarray::Array2::<u8>::zeros((4, 4)).into_dyn());
        let err = write_volume(flat, &path, &options).unwrap_err();
        match &err {
            ConvertError::Write { path: failed, reason } => {
                assert_eq!(failed, &path);
                assert!(reason.contains("3-D"));
            }
            other => panic!("expected a write error, got {:?}", other),
        }
        assert!(!path.exists());

        let line = Volume::U8(ndarray::Array1::<u8>::zeros(4).into_dyn());
        options.reshape_pages = false;
        let err = write_volume(line, &path, &options).unwrap_err();
        assert!(matches!(err, ConvertError::Write { .. }));
        assert!(!path.exists());
    }
}
