//! Source containers and the policies that pick which groups to export

use crate::error::{ConvertError, Result};
use crate::klb::{read_header, read_klb, KlbHeader};
use crate::types::SourceFormat;
use crate::volume::SourceVolume;
use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Group-name prefix of BigDataViewer timepoints
pub const DEFAULT_GROUP_PREFIX: &str = "t0";

/// Location of the full-resolution array below a BDV entry
pub const CELLS_PATH: &str = "0/cells";

/// Which top-level groups of a hierarchical container get exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Only the group reported last by the container
    Last,
    /// Every group whose name starts with the literal
    Prefix(String),
    /// Every group
    All,
}

impl GroupPolicy {
    /// Prefix policy with the BigDataViewer timepoint prefix
    pub fn timepoints() -> Self {
        GroupPolicy::Prefix(DEFAULT_GROUP_PREFIX.to_string())
    }

    /// Pick groups out of `names`, keeping their order
    pub fn select(&self, names: &[String]) -> Vec<String> {
        match self {
            GroupPolicy::Last => names.last().cloned().into_iter().collect(),
            GroupPolicy::Prefix(prefix) => names
                .iter()
                .filter(|name| name.starts_with(prefix.as_str()))
                .cloned()
                .collect(),
            GroupPolicy::All => names.to_vec(),
        }
    }
}

/// A source file holding one or more volumes
pub trait Container {
    /// Path the container was opened from
    fn path(&self) -> &Path;

    fn format(&self) -> SourceFormat;

    /// Top-level group names in the container's native order
    fn group_names(&self) -> Result<Vec<String>>;

    /// Entry names inside `group`, in native order
    fn entry_names(&self, group: &str) -> Result<Vec<String>>;

    /// Read one entry fully into memory
    fn read_volume(&self, group: &str, entry: &str) -> Result<SourceVolume>;
}

/// Open `path` read-only as a container of the given format
pub fn open_container(path: impl AsRef<Path>, format: SourceFormat) -> Result<Box<dyn Container>> {
    let path = path.as_ref();
    match format {
        SourceFormat::H5 => Ok(Box::new(BdvContainer::open(path)?)),
        SourceFormat::Klb => Ok(Box::new(KlbContainer::open(path)?)),
    }
}

/// BigDataViewer HDF5 file: `/<group>/<entry>/0/cells`
pub struct BdvContainer {
    path: PathBuf,
    file: hdf5::File,
}

impl BdvContainer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = hdf5::File::open(path).map_err(|e| ConvertError::open(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn cells_location(group: &str, entry: &str) -> String {
        format!("/{}/{}/{}", group, entry, CELLS_PATH)
    }
}

fn read_typed<T: hdf5::H5Type>(dataset: &hdf5::Dataset) -> hdf5::Result<Vec<T>> {
    dataset.read_raw::<T>()
}

impl Container for BdvContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::H5
    }

    fn group_names(&self) -> Result<Vec<String>> {
        Ok(self.file.member_names()?)
    }

    fn entry_names(&self, group: &str) -> Result<Vec<String>> {
        let group = self
            .file
            .group(group)
            .map_err(|e| ConvertError::extraction(format!("/{}", group), e))?;
        Ok(group.member_names()?)
    }

    fn read_volume(&self, group: &str, entry: &str) -> Result<SourceVolume> {
        let location = Self::cells_location(group, entry);
        let dataset = self
            .file
            .dataset(&location)
            .map_err(|e| ConvertError::extraction(&location, e))?;
        let shape = dataset.shape();
        let descriptor = dataset
            .dtype()
            .and_then(|dtype| dtype.to_descriptor())
            .map_err(|e| ConvertError::extraction(&location, e))?;
        debug!("Reading {} {:?} ({:?})", location, shape, descriptor);

        let fail = |e: hdf5::Error| ConvertError::extraction(&location, e);
        let volume = match descriptor {
            TypeDescriptor::Unsigned(IntSize::U1) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<u8>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Unsigned(IntSize::U2) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<u16>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Unsigned(IntSize::U4) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<u32>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Unsigned(IntSize::U8) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<u64>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Integer(IntSize::U1) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<i8>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Integer(IntSize::U2) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<i16>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Integer(IntSize::U4) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<i32>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Integer(IntSize::U8) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<i64>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Float(FloatSize::U4) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<f32>(&dataset).map_err(fail)?)
            }
            TypeDescriptor::Float(FloatSize::U8) => {
                SourceVolume::from_shape_vec(&shape, read_typed::<f64>(&dataset).map_err(fail)?)
            }
            other => {
                return Err(ConvertError::extraction(
                    &location,
                    ConvertError::UnsupportedDataType(format!("{:?}", other)),
                ))
            }
        };
        volume.map_err(|e| ConvertError::extraction(&location, e))
    }
}

/// A KLB file seen as a single group (the file stem) with one unnamed entry
pub struct KlbContainer {
    path: PathBuf,
    stem: String,
    header: KlbHeader,
}

impl KlbContainer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let header = read_header(path).map_err(|e| ConvertError::open(path, e))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| ConvertError::open(path, "file name has no stem"))?;
        Ok(Self {
            path: path.to_path_buf(),
            stem,
            header,
        })
    }

    pub fn header(&self) -> &KlbHeader {
        &self.header
    }
}

impl Container for KlbContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Klb
    }

    fn group_names(&self) -> Result<Vec<String>> {
        Ok(vec![self.stem.clone()])
    }

    fn entry_names(&self, group: &str) -> Result<Vec<String>> {
        if group != self.stem {
            return Err(ConvertError::extraction(
                group,
                format!("{} holds only {}", self.path.display(), self.stem),
            ));
        }
        Ok(vec![String::new()])
    }

    fn read_volume(&self, group: &str, entry: &str) -> Result<SourceVolume> {
        if group != self.stem || !entry.is_empty() {
            return Err(ConvertError::extraction(
                format!("{}/{}", group, entry),
                format!("{} holds a single volume", self.path.display()),
            ));
        }
        read_klb(&self.path).map_err(|e| ConvertError::extraction(self.path.display().to_string(), e))
    }
}
