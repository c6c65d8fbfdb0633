//! Test fixtures: generated images and zip containers.

use image::{ImageFormat, Rgb, RgbImage};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Small solid-color PNG; `seed` varies the color.
pub fn png(seed: u32) -> Vec<u8> {
    let color = Rgb([(seed * 37 % 256) as u8, (seed * 91 % 256) as u8, 120]);
    let img = RgbImage::from_pixel(24, 16, color);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Zip with the given (path, bytes) entries, deflated.
pub fn zip_of(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in entries {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer
}

/// `n` PNGs split across folders `a/` and `b/`, pairwise sharing basenames,
/// plus macOS junk that must be ignored.
pub fn batch_zip(n: u32) -> Vec<u8> {
    let mut entries: Vec<(String, Vec<u8>)> = (0..n)
        .map(|i| {
            let folder = if i % 2 == 0 { "a" } else { "b" };
            (format!("{}/img_{:03}.png", folder, i / 2), png(i))
        })
        .collect();
    entries.push(("__MACOSX/a/._img_000.png".to_string(), vec![0; 8]));
    entries.push((".DS_Store".to_string(), vec![0; 8]));
    zip_of(&entries)
}

/// Read back an archive: entry names in order.
pub fn archive_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn archive_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    use std::io::Read;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}
