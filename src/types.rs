//! Core data types for volume export

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sample types a source volume may carry.
///
/// The discriminants follow the KLB `dataType` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleType {
    /// Unsigned 8-bit integer
    U8 = 0,
    /// Unsigned 16-bit integer
    U16 = 1,
    /// Unsigned 32-bit integer
    U32 = 2,
    /// Unsigned 64-bit integer
    U64 = 3,
    /// Signed 8-bit integer
    I8 = 4,
    /// Signed 16-bit integer
    I16 = 5,
    /// Signed 32-bit integer
    I32 = 6,
    /// Signed 64-bit integer
    I64 = 7,
    /// 32-bit floating point
    F32 = 8,
    /// 64-bit floating point
    F64 = 9,
}

impl SampleType {
    /// Size in bytes of this sample type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::U64 | SampleType::I64 | SampleType::F64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    /// Get the type from its KLB header code
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SampleType::U8),
            1 => Some(SampleType::U16),
            2 => Some(SampleType::U32),
            3 => Some(SampleType::U64),
            4 => Some(SampleType::I8),
            5 => Some(SampleType::I16),
            6 => Some(SampleType::I32),
            7 => Some(SampleType::I64),
            8 => Some(SampleType::F32),
            9 => Some(SampleType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Target unsigned sample width of every exported volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitWidth {
    #[serde(rename = "8")]
    Eight,
    #[default]
    #[serde(rename = "16")]
    Sixteen,
}

impl BitWidth {
    pub fn bits(&self) -> u32 {
        match self {
            BitWidth::Eight => 8,
            BitWidth::Sixteen => 16,
        }
    }

    /// Interpret a legacy command line bit-depth token.
    ///
    /// Only the leading characters matter, so `8`, `8bit` and `8-bit`
    /// all select 8 bits.
    pub fn from_token(token: &str) -> Option<Self> {
        if token.starts_with('8') {
            Some(BitWidth::Eight)
        } else if token.starts_with("16") {
            Some(BitWidth::Sixteen)
        } else {
            None
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            BitWidth::Eight => SampleType::U8,
            BitWidth::Sixteen => SampleType::U16,
        }
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

impl FromStr for BitWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BitWidth::from_token(s).ok_or_else(|| format!("not a bit depth: {s:?} (expected 8 or 16)"))
    }
}

/// Layout of the files the converter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// BigDataViewer HDF5 (`/<group>/<entry>/0/cells`)
    H5,
    /// Keller Lab Block file, one volume per file
    Klb,
}

impl SourceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::H5 => "h5",
            SourceFormat::Klb => "klb",
        }
    }

    /// Whether the format holds named groups of entries
    pub fn is_hierarchical(&self) -> bool {
        matches!(self, SourceFormat::H5)
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h5" | "hdf5" => Ok(SourceFormat::H5),
            "klb" => Ok(SourceFormat::Klb),
            _ => Err(format!("unknown source format: {s}")),
        }
    }
}

/// Format of the files the converter writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Tiff,
    Klb,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Tiff => "tif",
            OutputFormat::Klb => "klb",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tif" | "tiff" => Ok(OutputFormat::Tiff),
            "klb" => Ok(OutputFormat::Klb),
            _ => Err(format!("unknown output format: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_type_sizes() {
        assert_eq!(SampleType::U8.size_in_bytes(), 1);
        assert_eq!(SampleType::I16.size_in_bytes(), 2);
        assert_eq!(SampleType::F32.size_in_bytes(), 4);
        assert_eq!(SampleType::U64.size_in_bytes(), 8);
    }

    #[test]
    fn test_sample_type_codes() {
        for code in 0..10u8 {
            let ty = SampleType::from_u8(code).unwrap();
            assert_eq!(ty as u8, code);
        }
        assert_eq!(SampleType::from_u8(10), None);
    }

    #[test]
    fn test_bit_width_tokens() {
        assert_eq!(BitWidth::from_token("8"), Some(BitWidth::Eight));
        assert_eq!(BitWidth::from_token("8bit"), Some(BitWidth::Eight));
        assert_eq!(BitWidth::from_token("16"), Some(BitWidth::Sixteen));
        assert_eq!(BitWidth::from_token("32"), None);
        assert_eq!(BitWidth::from_token(""), None);
        assert_eq!(BitWidth::default(), BitWidth::Sixteen);
        assert!("12".parse::<BitWidth>().is_err());
    }

    #[test]
    fn test_format_names() {
        assert_eq!("HDF5".parse::<SourceFormat>().unwrap(), SourceFormat::H5);
        assert_eq!("tiff".parse::<OutputFormat>().unwrap(), OutputFormat::Tiff);
        assert_eq!(OutputFormat::Klb.extension(), "klb");
        assert!(!SourceFormat::Klb.is_hierarchical());
    }
}
