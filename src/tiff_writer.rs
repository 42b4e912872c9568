//! Multi-page grayscale TIFF output

use crate::compression::CompressionLevel;
use crate::error::{ConvertError, Result};
use crate::metadata::{imagej_description, to_rational, ImageJMetadata};
use crate::volume::Volume;
use ndarray::ArrayD;
use std::io::{Seek, Write};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::compression::{Compression, Deflate, DeflateLevel, Uncompressed};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::{ResolutionUnit, Tag};

/// Options for writing a TIFF stack
#[derive(Debug, Clone, Default)]
pub struct TiffWriteOptions {
    /// Deflate level for every strip, or `None` for uncompressed pages
    pub deflate: Option<CompressionLevel>,
    /// Write an ImageJ hyperstack description and calibration
    pub imagej: Option<ImageJMetadata>,
}

fn deflate_level(level: CompressionLevel) -> DeflateLevel {
    match level.value() {
        0..=3 => DeflateLevel::Fast,
        4..=6 => DeflateLevel::Balanced,
        _ => DeflateLevel::Best,
    }
}

/// Write `volume` as one page per trailing `(Y, X)` plane.
///
/// All leading axes are flattened into the page sequence, so a
/// `(Z, Y, X)` volume and its `(Z, 1, Y, X)` reshape produce the same
/// pages; only the ImageJ description differs.
pub fn write_tiff<W: Write + Seek>(
    writer: W,
    volume: &Volume,
    options: &TiffWriteOptions,
) -> Result<usize> {
    let shape = volume.shape();
    if shape.len() < 2 {
        return Err(ConvertError::InvalidDimensions(format!(
            "a TIFF page needs at least 2 axes, got shape {:?}",
            shape
        )));
    }

    let description = match &options.imagej {
        Some(metadata) => Some(imagej_description(shape, metadata)?),
        None => None,
    };
    let resolution = options
        .imagej
        .as_ref()
        .and_then(ImageJMetadata::resolution)
        .and_then(to_rational)
        .map(|(n, d)| Rational { n, d });

    let page = PageSettings {
        description: description.as_deref(),
        resolution,
    };

    match (volume, options.deflate) {
        (Volume::U8(a), None) => write_pages::<_, colortype::Gray8, _>(writer, a, Uncompressed, &page),
        (Volume::U16(a), None) => {
            write_pages::<_, colortype::Gray16, _>(writer, a, Uncompressed, &page)
        }
        (Volume::U8(a), Some(level)) => write_pages::<_, colortype::Gray8, _>(
            writer,
            a,
            Deflate::with_level(deflate_level(level)),
            &page,
        ),
        (Volume::U16(a), Some(level)) => write_pages::<_, colortype::Gray16, _>(
            writer,
            a,
            Deflate::with_level(deflate_level(level)),
            &page,
        ),
    }
}

struct PageSettings<'a> {
    description: Option<&'a str>,
    resolution: Option<Rational>,
}

fn write_pages<W, C, D>(
    writer: W,
    array: &ArrayD<C::Inner>,
    compression: D,
    page: &PageSettings<'_>,
) -> Result<usize>
where
    W: Write + Seek,
    C: ColorType,
    C::Inner: Clone,
    [C::Inner]: TiffValue,
    D: Compression + Clone,
{
    let shape = array.shape();
    let height = shape[shape.len() - 2];
    let width = shape[shape.len() - 1];
    let plane = width * height;
    let (width, height) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(ConvertError::InvalidDimensions(format!(
                "cannot store {}x{} pages in a TIFF",
                width, height
            )))
        }
    };

    let standard = array.as_standard_layout();
    let samples = standard
        .as_slice()
        .ok_or_else(|| ConvertError::InvalidDimensions("array is not contiguous".to_string()))?;

    let mut encoder = TiffEncoder::new(writer)?;
    let mut pages = 0;
    for (index, data) in samples.chunks_exact(plane).enumerate() {
        let mut image =
            encoder.new_image_with_compression::<C, D>(width, height, compression.clone())?;
        if index == 0 {
            if let Some(description) = page.description {
                image
                    .encoder()
                    .write_tag(Tag::ImageDescription, description)?;
            }
        }
        if let Some(resolution) = &page.resolution {
            image.resolution(ResolutionUnit::None, resolution.clone());
        }
        image.write_data(data)?;
        pages += 1;
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};
    use std::io::Cursor;
    use tiff::decoder::{Decoder, DecodingResult};

    fn stack(z: usize, y: usize, x: usize) -> Volume {
        Volume::U16(Array3::from_shape_fn((z, y, x), |(k, j, i)| (k * 100 + j * 10 + i) as u16).into_dyn())
    }

    fn decode_pages(bytes: Vec<u8>) -> Vec<DecodingResult> {
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let mut pages = vec![decoder.read_image().unwrap()];
        while decoder.more_images() {
            decoder.next_image().unwrap();
            pages.push(decoder.read_image().unwrap());
        }
        pages
    }

    #[test]
    fn test_one_page_per_plane() {
        let mut buffer = Cursor::new(Vec::new());
        let pages = write_tiff(&mut buffer, &stack(4, 3, 5), &TiffWriteOptions::default()).unwrap();
        assert_eq!(pages, 4);

        let decoded = decode_pages(buffer.into_inner());
        assert_eq!(decoded.len(), 4);
        match &decoded[2] {
            DecodingResult::U16(data) => {
                assert_eq!(data.len(), 15);
                assert_eq!(data[0], 200);
                assert_eq!(data[14], 224);
            }
            _ => panic!("expected 16-bit samples"),
        }
    }

    #[test]
    fn test_deflate_with_imagej_description() {
        let options = TiffWriteOptions {
            deflate: Some(CompressionLevel::default()),
            imagej: Some(
                ImageJMetadata::new()
                    .with_spacing(2.0)
                    .with_unit("microns")
                    .with_pixel_size(0.5),
            ),
        };
        let volume = stack(3, 8, 8).reshape_pages().unwrap();
        let mut buffer = Cursor::new(Vec::new());
        assert_eq!(write_tiff(&mut buffer, &volume, &options).unwrap(), 3);

        let mut decoder = Decoder::new(Cursor::new(buffer.into_inner())).unwrap();
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
        assert!(description.starts_with("ImageJ=1.11a\nimages=3\nslices=3\n"));
        assert!(description.contains("unit=microns"));
        assert_eq!(decoder.dimensions().unwrap(), (8, 8));
        match decoder.read_image().unwrap() {
            DecodingResult::U16(data) => assert_eq!(data[9], 11),
            _ => panic!("expected 16-bit samples"),
        }
    }

    #[test]
    fn test_eight_bit_plane() {
        let volume = Volume::U8(ArrayD::from_elem(IxDyn(&[6, 7]), 42u8));
        let mut buffer = Cursor::new(Vec::new());
        assert_eq!(write_tiff(&mut buffer, &volume, &TiffWriteOptions::default()).unwrap(), 1);
        match decode_pages(buffer.into_inner()).remove(0) {
            DecodingResult::U8(data) => assert_eq!(data, vec![42u8; 42]),
            _ => panic!("expected 8-bit samples"),
        }
    }

    #[test]
    fn test_rejects_one_dimensional_volume() {
        let volume = Volume::U8(ArrayD::zeros(IxDyn(&[10])));
        let result = write_tiff(Cursor::new(Vec::new()), &volume, &TiffWriteOptions::default());
        assert!(matches!(result, Err(ConvertError::InvalidDimensions(_))));
    }
}
