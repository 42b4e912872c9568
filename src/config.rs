//! Conversion settings, presets and JSON configuration files

use crate::compression::{CompressionLevel, CompressionMethod};
use crate::container::GroupPolicy;
use crate::error::{ConvertError, Result};
use crate::klb::{KlbWriteOptions, DEFAULT_BLOCK_SIZE};
use crate::metadata::ImageJMetadata;
use crate::output::WriteOptions;
use crate::scan::FileFilter;
use crate::tiff_writer::TiffWriteOptions;
use crate::types::{BitWidth, OutputFormat, SourceFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Lateral pixel size of the light-sheet KLB acquisitions, in microns
pub const KLB_PIXEL_SIZE: f64 = 0.380490284561;

/// Slice spacing of the light-sheet KLB acquisitions, in microns
pub const KLB_SLICE_SPACING: f64 = 1.52196113824;

/// Compression requested for output files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCompression {
    None,
    /// Deflate strips (TIFF only)
    Deflate,
    /// bzip2 blocks (KLB only)
    Bzip2,
    /// zlib blocks (KLB only)
    Zlib,
}

impl FromStr for OutputCompression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(OutputCompression::None),
            "deflate" => Ok(OutputCompression::Deflate),
            "bzip2" => Ok(OutputCompression::Bzip2),
            "zlib" => Ok(OutputCompression::Zlib),
            _ => Err(format!("unknown compression: {s}")),
        }
    }
}

/// Complete description of one conversion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    pub source: SourceFormat,
    pub output: OutputFormat,
    pub bit_width: BitWidth,
    /// Group selection inside hierarchical containers
    pub group_policy: GroupPolicy,
    pub file_filter: FileFilter,
    pub skip_existing: bool,
    /// `None` picks the output format's default
    pub compression: Option<OutputCompression>,
    pub level: CompressionLevel,
    /// Write an ImageJ hyperstack description into TIFF output
    pub imagej: bool,
    /// Turn `(Z, Y, X)` into `(Z, 1, Y, X)` before writing
    pub reshape_pages: bool,
    /// Physical calibration for TIFF tags and KLB pixel size
    pub calibration: ImageJMetadata,
    /// Where output files go; defaults to the scanned root
    pub output_dir: Option<PathBuf>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Preset::H5Tif.options()
    }
}

impl ConvertOptions {
    /// Load options from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compression that will actually be used for the output format
    pub fn effective_compression(&self) -> OutputCompression {
        match (self.compression, self.output) {
            (Some(c), _) => c,
            (None, OutputFormat::Tiff) => OutputCompression::None,
            (None, OutputFormat::Klb) => OutputCompression::Bzip2,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.output, self.effective_compression()) {
            (OutputFormat::Tiff, OutputCompression::Bzip2 | OutputCompression::Zlib) => {
                return Err(ConvertError::Configuration(format!(
                    "TIFF output supports none or deflate compression, not {:?}",
                    self.effective_compression()
                )))
            }
            (OutputFormat::Klb, OutputCompression::Deflate) => {
                return Err(ConvertError::Configuration(
                    "KLB output supports none, bzip2 or zlib compression, not deflate".to_string(),
                ))
            }
            _ => {}
        }
        if self.level.value() > 9 {
            return Err(ConvertError::Configuration(format!(
                "compression level {} is above 9",
                self.level.value()
            )));
        }
        if let GroupPolicy::Prefix(prefix) = &self.group_policy {
            if prefix.is_empty() {
                return Err(ConvertError::Configuration(
                    "group prefix must not be empty".to_string(),
                ));
            }
        }
        if let FileFilter::Pattern(pattern) = &self.file_filter {
            regex::Regex::new(pattern)?;
        }
        self.calibration.validate()
    }

    /// Directory output files are written to when scanning `root`
    pub fn output_dir_for(&self, root: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| root.to_path_buf())
    }

    /// Writer settings derived from these options
    pub fn write_options(&self) -> WriteOptions {
        let compression = self.effective_compression();

        let tiff = TiffWriteOptions {
            deflate: (compression == OutputCompression::Deflate).then_some(self.level),
            imagej: self.imagej.then(|| self.calibration.clone()),
        };

        let pixel = self.calibration.pixel_size.unwrap_or(1.0) as f32;
        let spacing = self.calibration.spacing.unwrap_or(1.0) as f32;
        let klb = KlbWriteOptions {
            compression: match compression {
                OutputCompression::Zlib => CompressionMethod::Zlib,
                OutputCompression::None => CompressionMethod::None,
                _ => CompressionMethod::Bzip2,
            },
            level: self.level,
            block_size: DEFAULT_BLOCK_SIZE,
            pixel_size: [pixel, pixel, spacing, 1.0, 1.0],
            metadata: String::new(),
        };

        WriteOptions {
            format: self.output,
            skip_existing: self.skip_existing,
            reshape_pages: self.reshape_pages,
            tiff,
            klb,
        }
    }
}

/// Named starting points reproducing the legacy export variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Every `t0*` timepoint to zlib ImageJ TIFFs, skipping existing files
    H5Tif,
    /// Last group only, plain TIFFs
    H5TifLast,
    /// Last group only, bzip2 KLB files
    H5Klb,
    /// KLB stacks to calibrated ImageJ TIFFs with slices on the page axis
    KlbTif,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::H5Tif, Preset::H5TifLast, Preset::H5Klb, Preset::KlbTif];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::H5Tif => "h5-tif",
            Preset::H5TifLast => "h5-tif-last",
            Preset::H5Klb => "h5-klb",
            Preset::KlbTif => "klb-tif",
        }
    }

    pub fn options(&self) -> ConvertOptions {
        let base = ConvertOptions {
            source: SourceFormat::H5,
            output: OutputFormat::Tiff,
            bit_width: BitWidth::Sixteen,
            group_policy: GroupPolicy::Last,
            file_filter: FileFilter::DigitBeforeExtension,
            skip_existing: false,
            compression: None,
            level: CompressionLevel::default(),
            imagej: false,
            reshape_pages: false,
            calibration: ImageJMetadata::default(),
            output_dir: None,
        };

        match self {
            Preset::H5Tif => ConvertOptions {
                group_policy: GroupPolicy::timepoints(),
                file_filter: FileFilter::ContainsExtension,
                skip_existing: true,
                compression: Some(OutputCompression::Deflate),
                imagej: true,
                ..base
            },
            Preset::H5TifLast => base,
            Preset::H5Klb => ConvertOptions {
                output: OutputFormat::Klb,
                compression: Some(OutputCompression::Bzip2),
                level: CompressionLevel::best(),
                ..base
            },
            Preset::KlbTif => ConvertOptions {
                source: SourceFormat::Klb,
                compression: Some(OutputCompression::Deflate),
                imagej: true,
                reshape_pages: true,
                calibration: ImageJMetadata::new()
                    .with_pixel_size(KLB_PIXEL_SIZE)
                    .with_spacing(KLB_SLICE_SPACING)
                    .with_unit("microns"),
                ..base
            },
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Preset::ALL.iter().map(Preset::name).collect();
                format!("unknown preset {s:?} (expected one of {})", known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_presets_validate() {
        for preset in Preset::ALL {
            preset.options().validate().unwrap();
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
        assert!("h5-png".parse::<Preset>().is_err());
    }

    #[test]
    fn test_default_is_timepoint_tiff_export() {
        let options = ConvertOptions::default();
        assert_eq!(options.group_policy, GroupPolicy::timepoints());
        assert_eq!(options.bit_width, BitWidth::Sixteen);
        assert!(options.skip_existing);

        let write = options.write_options();
        assert_eq!(write.tiff.deflate, Some(CompressionLevel::default()));
        assert!(write.tiff.imagej.is_some());
        assert!(!write.reshape_pages);
    }

    #[test]
    fn test_klb_tif_calibration() {
        let write = Preset::KlbTif.options().write_options();
        let imagej = write.tiff.imagej.unwrap();
        assert_eq!(imagej.spacing, Some(KLB_SLICE_SPACING));
        assert_eq!(imagej.unit.as_deref(), Some("microns"));
        assert!((imagej.resolution().unwrap() - 1.0 / KLB_PIXEL_SIZE).abs() < 1e-12);
        assert!(write.reshape_pages);
    }

    #[test]
    fn test_incompatible_compression() {
        let mut options = Preset::H5TifLast.options();
        options.compression = Some(OutputCompression::Bzip2);
        assert!(options.validate().is_err());

        let mut options = Preset::H5Klb.options();
        options.compression = Some(OutputCompression::Deflate);
        assert!(options.validate().is_err());
        options.compression = Some(OutputCompression::Zlib);
        assert_eq!(options.write_options().klb.compression, CompressionMethod::Zlib);

        options.level = serde_json::from_str("12").unwrap();
        assert!(options.validate().is_err());
        options.level = CompressionLevel::best();

        options.group_policy = GroupPolicy::Prefix(String::new());
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_json_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("export.json");
        fs::write(
            &path,
            r#"{ "output": "klb", "bit_width": "8", "group_policy": "last", "compression": "zlib" }"#,
        )
        .unwrap();

        let options = ConvertOptions::from_json_file(&path).unwrap();
        assert_eq!(options.output, OutputFormat::Klb);
        assert_eq!(options.bit_width, BitWidth::Eight);
        assert_eq!(options.group_policy, GroupPolicy::Last);
        assert_eq!(options.source, SourceFormat::H5);
        options.validate().unwrap();

        let reparsed: ConvertOptions = serde_json::from_str(&options.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, options);

        fs::write(&path, "{ \"output\": \"png\" }").unwrap();
        assert!(matches!(
            ConvertOptions::from_json_file(&path),
            Err(ConvertError::Serialization(_))
        ));
    }
}
