//! ImageJ metadata carried by exported TIFF stacks

use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};

/// Version string ImageJ expects at the head of the description
pub const IMAGEJ_VERSION: &str = "1.11a";

/// Physical calibration attached to an ImageJ-compatible TIFF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageJMetadata {
    /// Distance between consecutive slices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacing: Option<f64>,

    /// Unit of `spacing` and of the resolution (e.g. "microns")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// In-plane pixel size; written as X/Y resolution (pixels per unit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<f64>,
}

impl ImageJMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set slice spacing
    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = Some(spacing);
        self
    }

    /// Set calibration unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set in-plane pixel size
    pub fn with_pixel_size(mut self, pixel_size: f64) -> Self {
        self.pixel_size = Some(pixel_size);
        self
    }

    /// Pixels per unit along X and Y, if a pixel size is known
    pub fn resolution(&self) -> Option<f64> {
        self.pixel_size.map(|size| 1.0 / size)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("spacing", self.spacing), ("pixel size", self.pixel_size)] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(ConvertError::Configuration(format!(
                        "{} must be a positive number, got {}",
                        name, v
                    )));
                }
            }
        }
        if let Some(unit) = &self.unit {
            if unit.contains(['\n', '=']) {
                return Err(ConvertError::Configuration(format!(
                    "unit {:?} cannot be stored in an ImageJ description",
                    unit
                )));
            }
        }
        Ok(())
    }
}

/// How ImageJ splits the non-planar axes of a grayscale stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hyperstack {
    pub frames: usize,
    pub slices: usize,
    pub channels: usize,
}

impl Hyperstack {
    /// Interpret a row-major shape ending in `(Y, X)`.
    ///
    /// Leading axes are right-aligned against `(T, Z, C)`, so a bare 3-D
    /// stack is read as channels and a `(Z, 1, Y, X)` stack as slices.
    pub fn from_shape(shape: &[usize]) -> Result<Self> {
        if shape.len() < 2 || shape.len() > 5 {
            return Err(ConvertError::InvalidDimensions(format!(
                "ImageJ stacks have 2 to 5 axes, got shape {:?}",
                shape
            )));
        }
        let mut tzc = [1usize; 3];
        let leading = &shape[..shape.len() - 2];
        tzc[3 - leading.len()..].copy_from_slice(leading);
        Ok(Self {
            frames: tzc[0],
            slices: tzc[1],
            channels: tzc[2],
        })
    }

    pub fn images(&self) -> usize {
        self.frames * self.slices * self.channels
    }
}

/// Build the `ImageDescription` text ImageJ uses to recognise a stack
pub fn imagej_description(shape: &[usize], metadata: &ImageJMetadata) -> Result<String> {
    let stack = Hyperstack::from_shape(shape)?;

    let mut lines = vec![
        format!("ImageJ={}", IMAGEJ_VERSION),
        format!("images={}", stack.images()),
    ];
    if stack.channels > 1 {
        lines.push(format!("channels={}", stack.channels));
    }
    if stack.slices > 1 {
        lines.push(format!("slices={}", stack.slices));
    }
    if stack.frames > 1 {
        lines.push(format!("frames={}", stack.frames));
    }
    lines.push("hyperstack=true".to_string());
    lines.push("mode=grayscale".to_string());
    if stack.frames > 1 {
        lines.push("loop=false".to_string());
    }
    if let Some(spacing) = metadata.spacing {
        lines.push(format!("spacing={}", spacing));
    }
    if let Some(unit) = &metadata.unit {
        lines.push(format!("unit={}", unit));
    }

    let mut description = lines.join("\n");
    description.push('\n');
    Ok(description)
}

/// Approximate a positive value as a TIFF rational `(numerator, denominator)`
pub fn to_rational(value: f64) -> Option<(u32, u32)> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let mut denominator = 1_000_000u32;
    while denominator > 1 && value * denominator as f64 > u32::MAX as f64 {
        denominator /= 10;
    }
    let numerator = (value * denominator as f64).round();
    if numerator < 1.0 || numerator > u32::MAX as f64 {
        return None;
    }
    Some((numerator as u32, denominator))
}
