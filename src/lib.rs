//! bdv-export - batch export of BigDataViewer and KLB volumes
//!
//! Walks a directory tree, opens every matching source container, and
//! writes each selected volume as an 8- or 16-bit unsigned TIFF or KLB file.
//!
//! # Features
//!
//! - BigDataViewer HDF5 (`/<timepoint>/<setup>/0/cells`) and KLB sources
//! - Group selection by prefix, last group, or all groups
//! - Wrap-around narrowing to `u8` or `u16`
//! - Multi-page TIFF output with optional deflate and ImageJ hyperstack tags
//! - Block-compressed KLB output (bzip2 or zlib)
//! - Idempotent re-runs through `skip_existing`
//!
//! # Example
//!
//! ```rust,no_run
//! use bdv_export::{Converter, Preset};
//!
//! # fn example() -> bdv_export::Result<()> {
//! let converter = Converter::new(Preset::H5Tif.options())?;
//! let report = converter.run("/data/lightsheet")?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod config;
pub mod container;
pub mod convert;
pub mod error;
pub mod klb;
pub mod metadata;
pub mod output;
pub mod scan;
pub mod tiff_writer;
pub mod types;
pub mod utils;
pub mod volume;

// Re-exports
pub use compression::{CompressionLevel, CompressionMethod, Compressor};
pub use config::{ConvertOptions, OutputCompression, Preset};
pub use container::{open_container, Container, GroupPolicy};
pub use convert::{ConversionReport, Converter};
pub use error::{ConvertError, Result};
pub use metadata::ImageJMetadata;
pub use output::{write_volume, WriteOptions, WriteOutcome};
pub use scan::FileFilter;
pub use types::{BitWidth, OutputFormat, SampleType, SourceFormat};
pub use volume::{cast_to_unsigned, SourceVolume, Volume};

/// Version of the exporter
pub const BDV_EXPORT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!BDV_EXPORT_VERSION.is_empty());
    }
}
