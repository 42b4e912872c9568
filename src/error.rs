//! Error types for volume export operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for export operations
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open container {}: {reason}", path.display())]
    ContainerOpen { path: PathBuf, reason: String },

    #[error("Cannot extract {location}: {reason}")]
    Extraction { location: String, reason: String },

    #[error("Cannot write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Specialized Result type for export operations
pub type Result<T> = std::result::Result<T, ConvertError>;

impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        ConvertError::Serialization(err.to_string())
    }
}

impl ConvertError {
    /// Wrap any error raised while producing an output file.
    pub(crate) fn write(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        ConvertError::Write {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Wrap any error raised while opening a source container.
    pub(crate) fn open(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        ConvertError::ContainerOpen {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Wrap any error raised while reading one volume out of a container.
    pub(crate) fn extraction(location: impl Into<String>, err: impl ToString) -> Self {
        ConvertError::Extraction {
            location: location.into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = ConvertError::open("data/t1.h5", "not an HDF5 file");
        assert_eq!(
            err.to_string(),
            "Cannot open container data/t1.h5: not an HDF5 file"
        );

        let err = ConvertError::extraction("/t00000/s00/0/cells", "no such dataset");
        assert!(err.to_string().contains("/t00000/s00/0/cells"));
    }
}
