//! End-to-end conversion tests over small BigDataViewer and KLB fixtures
//!
//! Fixtures are written into temporary directories with the `hdf5` crate and
//! the exporter's own KLB writer, then converted and decoded again.

use bdv_export::klb::{read_klb, write_klb, KlbWriteOptions};
use bdv_export::{
    BitWidth, ConvertOptions, Converter, GroupPolicy, OutputFormat, Preset, SourceVolume,
};
use ndarray::{ArrayD, IxDyn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

const SHAPE: [usize; 3] = [3, 4, 5];

fn samples(offset: u16) -> Vec<u16> {
    (0..SHAPE.iter().product::<usize>())
        .map(|i| offset + i as u16 * 100)
        .collect()
}

/// Write a BDV-style file: an `s00` setup group plus `/<t>/<s>/0/cells` for
/// every `(timepoint, setup)` pair. Pairs listed in `missing` get the entry
/// group but no cells dataset.
fn write_bdv(path: &Path, timepoints: &[&str], setups: &[&str], missing: &[(&str, &str)]) {
    let file = hdf5::File::create(path).unwrap();
    file.create_group("s00").unwrap();
    for (t, timepoint) in timepoints.iter().enumerate() {
        let group = file.create_group(timepoint).unwrap();
        for (s, setup) in setups.iter().enumerate() {
            let entry = group.create_group(setup).unwrap();
            if missing.contains(&(*timepoint, *setup)) {
                continue;
            }
            let level = entry.create_group("0").unwrap();
            let data = samples((t * 10 + s) as u16);
            level
                .new_dataset::<u16>()
                .shape(SHAPE.to_vec())
                .create("cells")
                .unwrap()
                .write_raw(&data[..])
                .unwrap();
        }
    }
}

fn tiff_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tif"))
        .collect();
    names.sort();
    names
}

fn decode_pages(path: &Path) -> Vec<DecodingResult> {
    let mut decoder = Decoder::new(File::open(path).unwrap()).unwrap();
    let mut pages = vec![decoder.read_image().unwrap()];
    while decoder.more_images() {
        decoder.next_image().unwrap();
        pages.push(decoder.read_image().unwrap());
    }
    pages
}

fn options(preset: Preset) -> ConvertOptions {
    preset.options()
}

#[test]
fn test_timepoint_prefix_export() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_bdv(&root.join("dataset.h5"), &["t00000", "t00001"], &["s00", "s01"], &[]);

    let report = Converter::new(options(Preset::H5Tif)).unwrap().run(root).unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.entries_written, 4);
    assert!(!report.has_failures());
    assert_eq!(
        tiff_names(root),
        vec!["t00000_s00.tif", "t00000_s01.tif", "t00001_s00.tif", "t00001_s01.tif"]
    );

    let pages = decode_pages(&root.join("t00001_s01.tif"));
    assert_eq!(pages.len(), SHAPE[0]);
    let expected = samples(11);
    match &pages[1] {
        DecodingResult::U16(data) => assert_eq!(data[..], expected[20..40]),
        other => panic!("unexpected page type {:?}", std::mem::discriminant(other)),
    }
}

#[test]
fn test_last_group_eight_bit() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_bdv(&root.join("dataset00.h5"), &["t00000", "t00001"], &["s00"], &[]);
    // no digit before the extension, not picked up
    write_bdv(&root.join("dataset.h5"), &["t00000"], &["s00"], &[]);

    let mut options = options(Preset::H5TifLast);
    options.bit_width = BitWidth::Eight;
    let report = Converter::new(options).unwrap().run(root).unwrap();

    assert_eq!(report.files_processed, 1);
    assert_eq!(tiff_names(root), vec!["t00001_s00.tif"]);

    let pages = decode_pages(&root.join("t00001_s00.tif"));
    let expected: Vec<u8> = samples(10).iter().map(|&v| v as u8).collect();
    match &pages[0] {
        DecodingResult::U8(data) => assert_eq!(data[..], expected[..20]),
        other => panic!("unexpected page type {:?}", std::mem::discriminant(other)),
    }
}

#[test]
fn test_rerun_skips_existing() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_bdv(&root.join("dataset.h5"), &["t00000", "t00001"], &["s00"], &[]);

    let converter = Converter::new(options(Preset::H5Tif)).unwrap();
    let first = converter.run(root).unwrap();
    assert_eq!(first.entries_written, 2);
    let before: Vec<_> = first
        .written
        .iter()
        .map(|p| fs::metadata(p).unwrap().modified().unwrap())
        .collect();

    let second = converter.run(root).unwrap();
    assert_eq!(second.entries_written, 0);
    assert_eq!(second.entries_skipped, 2);
    let after: Vec<_> = first
        .written
        .iter()
        .map(|p| fs::metadata(p).unwrap().modified().unwrap())
        .collect();
    assert_eq!(before, after);
    assert_eq!(tiff_names(root), vec!["t00000_s00.tif", "t00001_s00.tif"]);
}

#[test]
fn test_missing_cells_fails_only_that_entry() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_bdv(
        &root.join("dataset.h5"),
        &["t00000"],
        &["s00", "s01", "s02"],
        &[("t00000", "s01")],
    );

    let report = Converter::new(options(Preset::H5Tif)).unwrap().run(root).unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.entries_written, 2);
    assert_eq!(report.entries_failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].location.ends_with("t00000_s01.tif"));
    assert_eq!(tiff_names(root), vec!["t00000_s00.tif", "t00000_s02.tif"]);
}

#[test]
fn test_no_matching_groups() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_bdv(&root.join("dataset.h5"), &[], &[], &[]);

    let report = Converter::new(options(Preset::H5Tif)).unwrap().run(root).unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.entries_written, 0);
    assert!(!report.has_failures());
    assert!(tiff_names(root).is_empty());
}

#[test]
fn test_unreadable_file_does_not_stop_batch() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("broken.h5"), b"not hdf5").unwrap();
    write_bdv(&root.join("dataset.h5"), &["t00000"], &["s00"], &[]);

    let report = Converter::new(options(Preset::H5Tif)).unwrap().run(root).unwrap();
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_processed, 1);
    assert_eq!(tiff_names(root), vec!["t00000_s00.tif"]);
}

#[test]
fn test_all_groups_to_klb_in_output_dir() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_bdv(&root.join("dataset1.h5"), &["t00000"], &["s00"], &[]);
    let out: PathBuf = root.join("export");

    let mut options = options(Preset::H5Klb);
    options.group_policy = GroupPolicy::All;
    options.output_dir = Some(out.clone());
    let report = Converter::new(options).unwrap().run(root).unwrap();

    // the empty `s00` setup group yields no entries
    assert_eq!(report.entries_written, 1);
    assert_eq!(report.written, vec![out.join("t00000_s00.klb")]);
    match read_klb(&report.written[0]).unwrap() {
        SourceVolume::U16(array) => {
            assert_eq!(array.shape(), SHAPE);
            assert_eq!(array.iter().copied().collect::<Vec<_>>(), samples(0));
        }
        other => panic!("read back {}", other.sample_type()),
    }
}

#[test]
fn test_klb_to_imagej_tiff_pages() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let array = ArrayD::from_shape_vec(IxDyn(&SHAPE), samples(7)).unwrap();
    write_klb(root.join("TM0001.klb"), &array, &KlbWriteOptions::default()).unwrap();

    let mut options = options(Preset::KlbTif);
    assert_eq!(options.output, OutputFormat::Tiff);
    options.output_dir = Some(root.join("tif"));
    let report = Converter::new(options).unwrap().run(root).unwrap();
    assert_eq!(report.entries_written, 1);

    let path = root.join("tif").join("TM0001.tif");
    assert_eq!(decode_pages(&path).len(), SHAPE[0]);

    let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
    assert!(description.starts_with("ImageJ="));
    assert!(description.contains("images=3\n"));
    assert!(description.contains("slices=3\n"));
    assert!(!description.contains("channels="));
    assert!(description.contains("spacing=1.52196113824\n"));
    assert!(description.contains("unit=microns\n"));
}

#[test]
fn test_klb_to_klb_in_source_directory_keeps_source() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let source = root.join("TM0002.klb");
    let array = ArrayD::from_shape_vec(IxDyn(&SHAPE), samples(300)).unwrap();
    write_klb(&source, &array, &KlbWriteOptions::default()).unwrap();
    let original = fs::read(&source).unwrap();

    let mut options = options(Preset::KlbTif);
    options.output = OutputFormat::Klb;
    options.compression = None;
    options.bit_width = BitWidth::Eight;
    let report = Converter::new(options).unwrap().run(root).unwrap();

    assert_eq!(report.entries_written, 0);
    assert_eq!(report.entries_failed, 1);
    assert!(report.has_failures());
    assert_eq!(fs::read(&source).unwrap(), original);
    assert_eq!(read_klb(&source).unwrap(), SourceVolume::U16(array));
}
