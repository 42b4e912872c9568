//! In-memory volumes and the unsigned narrowing cast applied before export

use crate::error::{ConvertError, Result};
use crate::types::{BitWidth, SampleType};
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{ArrayD, Axis, IxDyn};
use num_traits::AsPrimitive;

/// A primitive numeric sample that can be stored in a volume file.
pub trait Sample: Copy + Default + Send + Sync + AsPrimitive<i64> + 'static {
    const SAMPLE_TYPE: SampleType;

    /// Append the little-endian encoding of `src` to `dst`
    fn extend_le_bytes(src: &[Self], dst: &mut Vec<u8>);

    /// Decode little-endian samples from `src` into `dst`.
    ///
    /// `src.len()` must equal `dst.len() * size_of::<Self>()`.
    fn read_le_bytes(src: &[u8], dst: &mut [Self]);
}

macro_rules! impl_sample {
    ($ty:ty, $variant:ident, $write:ident, $read:ident) => {
        impl Sample for $ty {
            const SAMPLE_TYPE: SampleType = SampleType::$variant;

            fn extend_le_bytes(src: &[Self], dst: &mut Vec<u8>) {
                let start = dst.len();
                dst.resize(start + std::mem::size_of_val(src), 0);
                LittleEndian::$write(src, &mut dst[start..]);
            }

            fn read_le_bytes(src: &[u8], dst: &mut [Self]) {
                LittleEndian::$read(src, dst);
            }
        }
    };
}

impl Sample for u8 {
    const SAMPLE_TYPE: SampleType = SampleType::U8;

    fn extend_le_bytes(src: &[Self], dst: &mut Vec<u8>) {
        dst.extend_from_slice(src);
    }

    fn read_le_bytes(src: &[u8], dst: &mut [Self]) {
        dst.copy_from_slice(src);
    }
}

impl Sample for i8 {
    const SAMPLE_TYPE: SampleType = SampleType::I8;

    fn extend_le_bytes(src: &[Self], dst: &mut Vec<u8>) {
        dst.extend(src.iter().map(|&v| v as u8));
    }

    fn read_le_bytes(src: &[u8], dst: &mut [Self]) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = s as i8;
        }
    }
}

impl_sample!(u16, U16, write_u16_into, read_u16_into);
impl_sample!(u32, U32, write_u32_into, read_u32_into);
impl_sample!(u64, U64, write_u64_into, read_u64_into);
impl_sample!(i16, I16, write_i16_into, read_i16_into);
impl_sample!(i32, I32, write_i32_into, read_i32_into);
impl_sample!(i64, I64, write_i64_into, read_i64_into);
impl_sample!(f32, F32, write_f32_into, read_f32_into);
impl_sample!(f64, F64, write_f64_into, read_f64_into);

/// A volume exactly as it was read from a source container
#[derive(Debug, Clone, PartialEq)]
pub enum SourceVolume {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Run `$body` with `$array` bound to the typed array inside a `SourceVolume`.
macro_rules! with_source_array {
    ($volume:expr, $array:ident => $body:expr) => {
        match $volume {
            SourceVolume::U8($array) => $body,
            SourceVolume::U16($array) => $body,
            SourceVolume::U32($array) => $body,
            SourceVolume::U64($array) => $body,
            SourceVolume::I8($array) => $body,
            SourceVolume::I16($array) => $body,
            SourceVolume::I32($array) => $body,
            SourceVolume::I64($array) => $body,
            SourceVolume::F32($array) => $body,
            SourceVolume::F64($array) => $body,
        }
    };
}

impl SourceVolume {
    pub fn sample_type(&self) -> SampleType {
        match self {
            SourceVolume::U8(_) => SampleType::U8,
            SourceVolume::U16(_) => SampleType::U16,
            SourceVolume::U32(_) => SampleType::U32,
            SourceVolume::U64(_) => SampleType::U64,
            SourceVolume::I8(_) => SampleType::I8,
            SourceVolume::I16(_) => SampleType::I16,
            SourceVolume::I32(_) => SampleType::I32,
            SourceVolume::I64(_) => SampleType::I64,
            SourceVolume::F32(_) => SampleType::F32,
            SourceVolume::F64(_) => SampleType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_source_array!(self, a => a.shape())
    }

    /// Build a volume from a flat, row-major sample buffer
    pub fn from_shape_vec<T: Sample>(shape: &[usize], data: Vec<T>) -> Result<Self>
    where
        ArrayD<T>: Into<SourceVolume>,
    {
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| ConvertError::InvalidDimensions(e.to_string()))?;
        Ok(array.into())
    }

    /// Decode a little-endian, row-major sample buffer of the given type
    pub fn from_le_bytes(sample_type: SampleType, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        fn decode<T: Sample>(shape: &[usize], bytes: &[u8]) -> Result<SourceVolume>
        where
            ArrayD<T>: Into<SourceVolume>,
        {
            let count: usize = shape.iter().product();
            if bytes.len() != count * std::mem::size_of::<T>() {
                return Err(ConvertError::InvalidFormat(format!(
                    "expected {} bytes of {} samples, got {}",
                    count * std::mem::size_of::<T>(),
                    T::SAMPLE_TYPE,
                    bytes.len()
                )));
            }
            let mut data = vec![T::default(); count];
            T::read_le_bytes(bytes, &mut data);
            SourceVolume::from_shape_vec(shape, data)
        }

        match sample_type {
            SampleType::U8 => decode::<u8>(shape, bytes),
            SampleType::U16 => decode::<u16>(shape, bytes),
            SampleType::U32 => decode::<u32>(shape, bytes),
            SampleType::U64 => decode::<u64>(shape, bytes),
            SampleType::I8 => decode::<i8>(shape, bytes),
            SampleType::I16 => decode::<i16>(shape, bytes),
            SampleType::I32 => decode::<i32>(shape, bytes),
            SampleType::I64 => decode::<i64>(shape, bytes),
            SampleType::F32 => decode::<f32>(shape, bytes),
            SampleType::F64 => decode::<f64>(shape, bytes),
        }
    }
}

macro_rules! impl_from_array {
    ($ty:ty, $variant:ident) => {
        impl From<ArrayD<$ty>> for SourceVolume {
            fn from(array: ArrayD<$ty>) -> Self {
                SourceVolume::$variant(array)
            }
        }
    };
}

impl_from_array!(u8, U8);
impl_from_array!(u16, U16);
impl_from_array!(u32, U32);
impl_from_array!(u64, U64);
impl_from_array!(i8, I8);
impl_from_array!(i16, I16);
impl_from_array!(i32, I32);
impl_from_array!(i64, I64);
impl_from_array!(f32, F32);
impl_from_array!(f64, F64);

/// A volume narrowed to the export sample width
#[derive(Debug, Clone, PartialEq)]
pub enum Volume {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
}

impl Volume {
    pub fn shape(&self) -> &[usize] {
        match self {
            Volume::U8(a) => a.shape(),
            Volume::U16(a) => a.shape(),
        }
    }

    pub fn bit_width(&self) -> BitWidth {
        match self {
            Volume::U8(_) => BitWidth::Eight,
            Volume::U16(_) => BitWidth::Sixteen,
        }
    }

    /// Uncompressed size of the sample data in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Volume::U8(a) => a.len(),
            Volume::U16(a) => a.len() * 2,
        }
    }

    /// Turn a `(Z, Y, X)` stack into `(Z, 1, Y, X)`.
    ///
    /// With the singleton axis in place ImageJ reads the leading axis as
    /// slices rather than channels. Volumes of any other rank are rejected.
    pub fn reshape_pages(self) -> Result<Self> {
        if self.shape().len() != 3 {
            return Err(ConvertError::InvalidDimensions(format!(
                "page reshape needs a 3-D volume, got shape {:?}",
                self.shape()
            )));
        }
        Ok(match self {
            Volume::U8(a) => Volume::U8(a.insert_axis(Axis(1))),
            Volume::U16(a) => Volume::U16(a.insert_axis(Axis(1))),
        })
    }
}

fn wrap_samples<T, U>(array: &ArrayD<T>) -> ArrayD<U>
where
    T: Sample,
    U: Copy + 'static,
    i64: AsPrimitive<U>,
{
    array.mapv(|v| {
        let wide: i64 = v.as_();
        <i64 as AsPrimitive<U>>::as_(wide)
    })
}

/// Narrow every sample of `volume` to an unsigned integer of `width` bits.
///
/// No clamping is performed: integers wrap modulo `2^width` (two's
/// complement for signed types), floats are first truncated toward zero
/// into an `i64` (saturating, NaN becomes 0) and then wrapped. The shape
/// is preserved.
pub fn cast_to_unsigned(volume: &SourceVolume, width: BitWidth) -> Volume {
    with_source_array!(volume, a => match width {
        BitWidth::Eight => Volume::U8(wrap_samples(a)),
        BitWidth::Sixteen => Volume::U16(wrap_samples(a)),
    })
}
