//! Command line front end: export every BigDataViewer or KLB volume below a
//! directory as 8- or 16-bit TIFF or KLB files.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use bdv_export::{
    BitWidth, CompressionLevel, ConvertOptions, Converter, FileFilter, GroupPolicy,
    OutputCompression, OutputFormat, Preset, SourceFormat,
};
use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};

/// Batch-export BigDataViewer HDF5 and KLB volumes to TIFF or KLB
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Root directory to scan, or a bit depth (8 or 16) to scan the current directory.
    ///
    /// Anything that is neither an existing directory nor a bit depth is
    /// rejected with exit status 1, so a mistyped path never falls back to
    /// a 16-bit export of the current directory.
    root_or_bits: Option<String>,

    /// Bit depth (8 or 16), read only when the first argument is a directory
    bits: Option<String>,

    /// Starting configuration (default h5-tif)
    #[arg(long)]
    preset: Option<Preset>,

    /// JSON file with conversion options, used instead of the preset
    #[arg(long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Source container format
    #[arg(long)]
    from: Option<SourceFormat>,

    /// Output file format
    #[arg(long)]
    to: Option<OutputFormat>,

    /// Which top-level groups to export
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Group name prefix for the prefix policy
    #[arg(long)]
    prefix: Option<String>,

    /// Regular expression matched against file names
    #[arg(long)]
    filter: Option<String>,

    /// Leave existing output files untouched
    #[arg(long, conflicts_with = "overwrite")]
    skip_existing: bool,

    /// Rewrite existing output files
    #[arg(long)]
    overwrite: bool,

    /// Output compression
    #[arg(long)]
    compression: Option<OutputCompression>,

    /// Compression level (0-9)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    level: Option<u8>,

    /// Write an ImageJ hyperstack description into TIFF files
    #[arg(long)]
    imagej: bool,

    /// Write (Z, Y, X) stacks as (Z, 1, Y, X) so ImageJ shows slices
    #[arg(long)]
    reshape_pages: bool,

    /// Slice spacing
    #[arg(long)]
    spacing: Option<f64>,

    /// Lateral pixel size; written as resolution 1/size
    #[arg(long)]
    pixel_size: Option<f64>,

    /// Physical unit of spacing and pixel size
    #[arg(long)]
    unit: Option<String>,

    /// Directory for output files (default is next to the scanned root)
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Exit with status 2 if any file or entry failed
    #[arg(long)]
    fail_on_error: bool,

    /// Print debug information
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Last,
    Prefix,
    All,
}

/// Split the legacy positional arguments into a root and a bit depth.
///
/// The first argument is the root only if it names an existing directory;
/// otherwise it is taken as the bit depth and the second one is ignored.
fn resolve_positionals(
    first: Option<&str>,
    second: Option<&str>,
) -> anyhow::Result<(PathBuf, Option<BitWidth>)> {
    let (root, token) = match first {
        Some(first) if Path::new(first).is_dir() => (PathBuf::from(first), second),
        Some(first) => (PathBuf::from("."), Some(first)),
        None => (PathBuf::from("."), None),
    };
    let width = match token {
        Some(token) => match BitWidth::from_token(token) {
            Some(width) => Some(width),
            None => bail!("{token:?} is neither a directory nor a bit depth (8 or 16)"),
        },
        None => None,
    };
    Ok((root, width))
}

fn build_options(app: &App) -> anyhow::Result<(PathBuf, ConvertOptions)> {
    let (root, width) = resolve_positionals(app.root_or_bits.as_deref(), app.bits.as_deref())?;

    let mut options = match &app.config {
        Some(path) => ConvertOptions::from_json_file(path)
            .with_context(|| format!("Could not load configuration {}", path.display()))?,
        None => app.preset.unwrap_or(Preset::H5Tif).options(),
    };

    if let Some(width) = width {
        options.bit_width = width;
    }
    if let Some(from) = app.from {
        options.source = from;
    }
    if let Some(to) = app.to {
        options.output = to;
    }
    match (app.policy, &app.prefix) {
        (Some(PolicyArg::Last), _) => options.group_policy = GroupPolicy::Last,
        (Some(PolicyArg::All), _) => options.group_policy = GroupPolicy::All,
        (Some(PolicyArg::Prefix), None) => options.group_policy = GroupPolicy::timepoints(),
        (Some(PolicyArg::Prefix) | None, Some(prefix)) => {
            options.group_policy = GroupPolicy::Prefix(prefix.clone())
        }
        (None, None) => {}
    }
    if let Some(filter) = &app.filter {
        options.file_filter = FileFilter::Pattern(filter.clone());
    }
    if app.skip_existing {
        options.skip_existing = true;
    }
    if app.overwrite {
        options.skip_existing = false;
    }
    if let Some(compression) = app.compression {
        options.compression = Some(compression);
    }
    if let Some(level) = app.level {
        options.level = CompressionLevel::new(level);
    }
    if app.imagej {
        options.imagej = true;
    }
    if app.reshape_pages {
        options.reshape_pages = true;
    }
    if let Some(spacing) = app.spacing {
        options.calibration.spacing = Some(spacing);
    }
    if let Some(pixel_size) = app.pixel_size {
        options.calibration.pixel_size = Some(pixel_size);
    }
    if let Some(unit) = &app.unit {
        options.calibration.unit = Some(unit.clone());
    }
    if let Some(dir) = &app.output_dir {
        options.output_dir = Some(dir.clone());
    }

    Ok((root, options))
}

fn main() -> ExitCode {
    let app = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if app.verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("[ERROR] Could not set up global logging subscriber: {}", e);
    });

    let (root, options) = match build_options(&app) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(1);
        }
    };
    info!(
        "Exporting {} to {} {} files below {}",
        options.source.extension(),
        options.bit_width,
        options.output.extension(),
        root.display()
    );

    let report = match Converter::new(options).and_then(|converter| converter.run(&root)) {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    if app.fail_on_error && report.has_failures() {
        for failure in &report.failures {
            error!("{}: {}", failure.location, failure.message);
        }
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
