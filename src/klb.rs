//! Keller Lab Block (KLB) volume files.
//!
//! A KLB file is a fixed header followed by independently compressed
//! blocks. All header fields are little-endian:
//!
//! | field          | type            |
//! |----------------|-----------------|
//! | version        | `u8` (= 2)      |
//! | xyzct          | `u32 × 5`       |
//! | pixel size     | `f32 × 5`       |
//! | data type      | `u8`            |
//! | compression    | `u8`            |
//! | metadata       | `[u8; 256]`     |
//! | block size     | `u32 × 5`       |
//! | block offsets  | `u64 × nBlocks` |
//!
//! Blocks are enumerated with x varying fastest, and so are the samples
//! inside a block. `blockOffset[i]` is the end of block `i`, counted from
//! the end of the header.

use crate::compression::{get_compressor, CompressionLevel, CompressionMethod};
use crate::error::{ConvertError, Result};
use crate::types::SampleType;
use crate::volume::{Sample, SourceVolume};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::ArrayD;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

pub const KLB_HEADER_VERSION: u8 = 2;
pub const KLB_DATA_DIMS: usize = 5;
pub const KLB_METADATA_SIZE: usize = 256;

/// Block shape used by the reference KLB writer
pub const DEFAULT_BLOCK_SIZE: [u32; KLB_DATA_DIMS] = [96, 96, 8, 1, 1];

const FIXED_HEADER_SIZE: usize = 1 + 4 * KLB_DATA_DIMS * 3 + 2 + KLB_METADATA_SIZE;

const OFFSET_PREALLOC: usize = 4096;

/// Parsed KLB header
#[derive(Debug, Clone, PartialEq)]
pub struct KlbHeader {
    /// Extent along x, y, z, channel and time
    pub xyzct: [u32; KLB_DATA_DIMS],
    /// Physical sample spacing along each axis
    pub pixel_size: [f32; KLB_DATA_DIMS],
    pub data_type: SampleType,
    pub compression: CompressionMethod,
    /// Free-form text, at most 255 bytes
    pub metadata: String,
    pub block_size: [u32; KLB_DATA_DIMS],
    /// Cumulative end offset of every block after the header
    pub block_offsets: Vec<u64>,
}

impl KlbHeader {
    /// Header for an array in row-major `(..., z, y, x)` order.
    ///
    /// Arrays with more than five axes cannot be represented.
    pub fn for_shape(shape: &[usize], data_type: SampleType) -> Result<Self> {
        if shape.is_empty() || shape.len() > KLB_DATA_DIMS {
            return Err(ConvertError::InvalidDimensions(format!(
                "KLB holds 1 to {} axes, got shape {:?}",
                KLB_DATA_DIMS, shape
            )));
        }

        let mut xyzct = [1u32; KLB_DATA_DIMS];
        for (dim, &extent) in xyzct.iter_mut().zip(shape.iter().rev()) {
            *dim = u32::try_from(extent).map_err(|_| {
                ConvertError::InvalidDimensions(format!("axis of {} samples is too long", extent))
            })?;
            if *dim == 0 {
                return Err(ConvertError::InvalidDimensions(format!(
                    "empty axis in shape {:?}",
                    shape
                )));
            }
        }

        Ok(Self {
            xyzct,
            pixel_size: [1.0; KLB_DATA_DIMS],
            data_type,
            compression: CompressionMethod::Bzip2,
            metadata: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            block_offsets: Vec::new(),
        })
    }

    /// Row-major shape, dropping singleton time and channel axes.
    ///
    /// A plain volume comes back as `(z, y, x)`.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.xyzct.iter().rev().map(|&d| d as usize).collect();
        while shape.len() > 3 && shape[0] == 1 {
            shape.remove(0);
        }
        shape
    }

    pub fn num_samples(&self) -> usize {
        self.xyzct.iter().map(|&d| d as usize).product()
    }

    pub fn num_blocks(&self) -> usize {
        BlockGrid::new(self.xyzct, self.block_size).len()
    }

    /// Size of the serialized header in bytes
    pub fn header_size(&self) -> usize {
        FIXED_HEADER_SIZE + 8 * self.num_blocks()
    }

    /// Byte range of block `index`, relative to the end of the header
    pub fn block_range(&self, index: usize) -> (u64, u64) {
        let start = if index == 0 {
            0
        } else {
            self.block_offsets[index - 1]
        };
        (start, self.block_offsets[index])
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let version = reader.read_u8().map_err(truncated)?;
        if version != KLB_HEADER_VERSION {
            return Err(ConvertError::InvalidFormat(format!(
                "unsupported KLB header version {}",
                version
            )));
        }

        let mut xyzct = [0u32; KLB_DATA_DIMS];
        reader
            .read_u32_into::<LittleEndian>(&mut xyzct)
            .map_err(truncated)?;
        let mut pixel_size = [0f32; KLB_DATA_DIMS];
        reader
            .read_f32_into::<LittleEndian>(&mut pixel_size)
            .map_err(truncated)?;

        let code = reader.read_u8().map_err(truncated)?;
        let data_type = SampleType::from_u8(code).ok_or_else(|| {
            ConvertError::UnsupportedDataType(format!("KLB data type code {}", code))
        })?;
        let code = reader.read_u8().map_err(truncated)?;
        let compression = CompressionMethod::from_u8(code).ok_or_else(|| {
            ConvertError::InvalidFormat(format!("unknown KLB compression code {}", code))
        })?;

        let mut metadata = [0u8; KLB_METADATA_SIZE];
        reader.read_exact(&mut metadata).map_err(truncated)?;
        let text_len = metadata.iter().position(|&b| b == 0).unwrap_or(KLB_METADATA_SIZE);
        let metadata = String::from_utf8_lossy(&metadata[..text_len]).into_owned();

        let mut block_size = [0u32; KLB_DATA_DIMS];
        reader
            .read_u32_into::<LittleEndian>(&mut block_size)
            .map_err(truncated)?;
        if xyzct.contains(&0) || block_size.contains(&0) {
            return Err(ConvertError::InvalidFormat(format!(
                "zero extent in KLB header (dims {:?}, blocks {:?})",
                xyzct, block_size
            )));
        }

        let (_, num_blocks) = checked_counts(&xyzct, &block_size)?;
        // grown as read so a lying block count stops at the end of the file
        let mut block_offsets = Vec::with_capacity(num_blocks.min(OFFSET_PREALLOC));
        for _ in 0..num_blocks {
            block_offsets.push(reader.read_u64::<LittleEndian>().map_err(truncated)?);
        }
        if block_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConvertError::InvalidFormat(
                "KLB block offsets are not increasing".to_string(),
            ));
        }

        Ok(Self {
            xyzct,
            pixel_size,
            data_type,
            compression,
            metadata,
            block_size,
            block_offsets,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(KLB_HEADER_VERSION)?;
        for &d in &self.xyzct {
            writer.write_u32::<LittleEndian>(d)?;
        }
        for &p in &self.pixel_size {
            writer.write_f32::<LittleEndian>(p)?;
        }
        writer.write_u8(self.data_type as u8)?;
        writer.write_u8(self.compression as u8)?;

        let mut metadata = [0u8; KLB_METADATA_SIZE];
        let text = self.metadata.as_bytes();
        let len = text.len().min(KLB_METADATA_SIZE - 1);
        metadata[..len].copy_from_slice(&text[..len]);
        writer.write_all(&metadata)?;

        for &b in &self.block_size {
            writer.write_u32::<LittleEndian>(b)?;
        }
        for &offset in &self.block_offsets {
            writer.write_u64::<LittleEndian>(offset)?;
        }
        Ok(())
    }
}

/// Samples and blocks described by a header, rejecting counts that overflow
fn checked_counts(
    xyzct: &[u32; KLB_DATA_DIMS],
    block_size: &[u32; KLB_DATA_DIMS],
) -> Result<(usize, usize)> {
    let overflow = || {
        ConvertError::InvalidFormat(format!(
            "KLB dims {:?} with blocks {:?} are too large",
            xyzct, block_size
        ))
    };
    let mut samples = 1usize;
    let mut blocks = 1usize;
    for (&dim, &block) in xyzct.iter().zip(block_size) {
        let dim = dim as usize;
        samples = samples.checked_mul(dim).ok_or_else(overflow)?;
        blocks = blocks
            .checked_mul(dim.div_ceil((block as usize).max(1)))
            .ok_or_else(overflow)?;
    }
    Ok((samples, blocks))
}

fn truncated(err: io::Error) -> ConvertError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ConvertError::InvalidFormat("truncated KLB header".to_string())
    } else {
        ConvertError::Io(err)
    }
}

/// Partition of a 5-D extent into blocks, x fastest
struct BlockGrid {
    dims: [usize; KLB_DATA_DIMS],
    block: [usize; KLB_DATA_DIMS],
    counts: [usize; KLB_DATA_DIMS],
}

impl BlockGrid {
    fn new(dims: [u32; KLB_DATA_DIMS], block: [u32; KLB_DATA_DIMS]) -> Self {
        let dims = dims.map(|d| d as usize);
        let block = block.map(|b| (b as usize).max(1));
        let mut counts = [0; KLB_DATA_DIMS];
        for i in 0..KLB_DATA_DIMS {
            counts[i] = dims[i].div_ceil(block[i]);
        }
        Self {
            dims,
            block,
            counts,
        }
    }

    fn len(&self) -> usize {
        self.counts.iter().product()
    }

    /// Half-open sample range covered by block `index` along each axis
    fn extent(&self, index: usize) -> [(usize, usize); KLB_DATA_DIMS] {
        let mut remaining = index;
        let mut extent = [(0, 0); KLB_DATA_DIMS];
        for i in 0..KLB_DATA_DIMS {
            let coord = remaining % self.counts[i];
            remaining /= self.counts[i];
            let start = coord * self.block[i];
            extent[i] = (start, (start + self.block[i]).min(self.dims[i]));
        }
        extent
    }

    fn block_samples(&self, index: usize) -> usize {
        self.extent(index).iter().map(|(s, e)| e - s).product()
    }

    /// Visit every contiguous x-run of block `index` as
    /// `(offset in image, offset in block, run length)`, in samples.
    fn for_each_run(&self, index: usize, mut f: impl FnMut(usize, usize, usize)) {
        let [(x0, x1), (y0, y1), (z0, z1), (c0, c1), (t0, t1)] = self.extent(index);
        let [nx, ny, nz, nc, _] = self.dims;
        let run = x1 - x0;
        let mut block_offset = 0;
        for t in t0..t1 {
            for c in c0..c1 {
                for z in z0..z1 {
                    for y in y0..y1 {
                        let image_offset = (((t * nc + c) * nz + z) * ny + y) * nx + x0;
                        f(image_offset, block_offset, run);
                        block_offset += run;
                    }
                }
            }
        }
    }
}

/// Options for writing a KLB file
#[derive(Debug, Clone)]
pub struct KlbWriteOptions {
    pub compression: CompressionMethod,
    pub level: CompressionLevel,
    pub block_size: [u32; KLB_DATA_DIMS],
    pub pixel_size: [f32; KLB_DATA_DIMS],
    pub metadata: String,
}

impl Default for KlbWriteOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Bzip2,
            level: CompressionLevel::best(),
            block_size: DEFAULT_BLOCK_SIZE,
            pixel_size: [1.0; KLB_DATA_DIMS],
            metadata: String::new(),
        }
    }
}

/// Read only the header of a KLB file
pub fn read_header(path: impl AsRef<Path>) -> Result<KlbHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    KlbHeader::read_from(&mut reader)
}

/// Read a whole KLB file into memory
pub fn read_klb(path: impl AsRef<Path>) -> Result<SourceVolume> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    let header = KlbHeader::read_from(&mut reader)?;
    let mut payload = Vec::new();
    reader.read_to_end(&mut payload)?;

    let data_end = header.block_offsets.last().copied().unwrap_or(0);
    if data_end > payload.len() as u64 {
        return Err(ConvertError::InvalidFormat(format!(
            "{} declares {} bytes of blocks but holds {}",
            path.display(),
            data_end,
            payload.len()
        )));
    }

    let sample_size = header.data_type.size_in_bytes();
    let (num_samples, _) = checked_counts(&header.xyzct, &header.block_size)?;
    let image_len = num_samples.checked_mul(sample_size).ok_or_else(|| {
        ConvertError::InvalidFormat(format!("{} samples do not fit in memory", num_samples))
    })?;
    let mut image = Vec::new();
    image.try_reserve_exact(image_len).map_err(|e| {
        ConvertError::InvalidFormat(format!("cannot hold {} bytes of samples: {}", image_len, e))
    })?;
    image.resize(image_len, 0u8);

    let grid = BlockGrid::new(header.xyzct, header.block_size);
    let compressor = get_compressor(header.compression);

    for index in 0..grid.len() {
        let (start, end) = header.block_range(index);
        let block = payload.get(start as usize..end as usize).ok_or_else(|| {
            ConvertError::InvalidFormat(format!(
                "block {} ({}..{}) lies past the end of {}",
                index,
                start,
                end,
                path.display()
            ))
        })?;
        let expected = grid.block_samples(index) * sample_size;
        let block = compressor.decompress(block, Some(expected))?;
        if block.len() != expected {
            return Err(ConvertError::Decompression(format!(
                "block {} holds {} bytes, expected {}",
                index,
                block.len(),
                expected
            )));
        }

        grid.for_each_run(index, |image_offset, block_offset, run| {
            let dst = image_offset * sample_size;
            let src = block_offset * sample_size;
            let len = run * sample_size;
            image[dst..dst + len].copy_from_slice(&block[src..src + len]);
        });
    }

    debug!(
        "Read KLB {} ({:?} {}, {} blocks)",
        path.display(),
        header.xyzct,
        header.data_type,
        grid.len()
    );
    SourceVolume::from_le_bytes(header.data_type, &header.shape(), &image)
}

/// Write an array as a KLB file.
///
/// The array is taken in row-major `(..., z, y, x)` order.
pub fn write_klb<T: Sample>(
    path: impl AsRef<Path>,
    array: &ArrayD<T>,
    options: &KlbWriteOptions,
) -> Result<KlbHeader> {
    let mut header = KlbHeader::for_shape(array.shape(), T::SAMPLE_TYPE)?;
    header.compression = options.compression;
    header.block_size = options.block_size.map(|b| b.max(1));
    header.pixel_size = options.pixel_size;
    header.metadata = options.metadata.clone();

    let standard = array.as_standard_layout();
    let samples = standard
        .as_slice()
        .ok_or_else(|| ConvertError::InvalidDimensions("array is not contiguous".to_string()))?;

    let grid = BlockGrid::new(header.xyzct, header.block_size);
    let compressor = get_compressor(header.compression);
    let mut blocks = Vec::with_capacity(grid.len());
    let mut staging: Vec<T> = Vec::new();
    let mut bytes = Vec::new();
    let mut end = 0u64;

    for index in 0..grid.len() {
        staging.clear();
        grid.for_each_run(index, |image_offset, _, run| {
            staging.extend_from_slice(&samples[image_offset..image_offset + run]);
        });
        bytes.clear();
        T::extend_le_bytes(&staging, &mut bytes);
        let compressed = compressor.compress(&bytes, options.level)?;
        end += compressed.len() as u64;
        header.block_offsets.push(end);
        blocks.push(compressed);
    }

    let mut writer = BufWriter::new(File::create(path)?);
    header.write_to(&mut writer)?;
    for block in &blocks {
        writer.write_all(block)?;
    }
    writer.flush()?;
    Ok(header)
}
