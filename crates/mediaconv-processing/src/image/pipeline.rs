//! Conversion pipeline shared by the thumbnail and conversion workers.
//!
//! Steps, each depending on the previous one: sequential decode from disk,
//! alpha flattened onto white, 8-bit sRGB, bounded downscale, EXIF
//! orientation, metadata strip and progressive JPEG re-encode.

use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, DynamicImage, ImageReader, RgbImage};
use mediaconv_core::models::Rendition;
use mediaconv_core::PipelineConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::encode::encode_progressive_jpeg;
use super::orientation::ImageOrientation;

const SHARPEN_SIGMA: f32 = 0.5;
const SHARPEN_THRESHOLD: i32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub thumb_small_size: u32,
    pub thumb_large_size: u32,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            jpeg_quality: config.jpeg_quality,
            thumb_small_size: config.thumb_small_size,
            thumb_large_size: config.thumb_large_size,
        }
    }
}

/// Blocking image pipeline; run it on a blocking thread.
#[derive(Debug, Clone, Copy)]
pub struct ImagePipeline {
    settings: PipelineSettings,
}

impl ImagePipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    /// Produce the normalized JPEG for the `converted` rendition.
    pub fn normalize(&self, source: &Path) -> Result<Vec<u8>> {
        let img = self.prepare(source, self.settings.max_dimension)?;
        encode_progressive_jpeg(&img, self.settings.jpeg_quality)
    }

    /// Produce the small and large thumbnails.
    ///
    /// The source is decoded once, bounded by the large size, and both
    /// thumbnails are derived from that buffer.
    pub fn thumbnails(&self, source: &Path) -> Result<Vec<(Rendition, Vec<u8>)>> {
        let base = self.prepare(source, self.settings.thumb_large_size)?;

        let mut out = Vec::with_capacity(2);
        for (rendition, size) in [
            (Rendition::ThumbSmall, self.settings.thumb_small_size),
            (Rendition::ThumbLarge, self.settings.thumb_large_size),
        ] {
            let fitted = downscale(base.clone(), size);
            let sharpened = imageops::unsharpen(&fitted, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
            out.push((
                rendition,
                encode_progressive_jpeg(&sharpened, self.settings.jpeg_quality)?,
            ));
        }
        Ok(out)
    }

    fn prepare(&self, source: &Path, bound: u32) -> Result<RgbImage> {
        let img = decode_sequential(source)?;
        let rgb = flatten_to_rgb(img);
        let scaled = downscale(rgb, bound);
        let orientation = read_orientation(source);
        Ok(ImageOrientation::apply(scaled, orientation))
    }
}

/// Decode from a buffered file reader without loading the file into memory first.
fn decode_sequential(source: &Path) -> Result<DynamicImage> {
    let file = File::open(source)
        .with_context(|| format!("Failed to open image {}", source.display()))?;
    ImageReader::new(BufReader::new(file))
        .with_guessed_format()
        .context("Failed to sniff image format")?
        .decode()
        .context("Failed to decode image")
}

fn read_orientation(source: &Path) -> u8 {
    match File::open(source) {
        Ok(file) => ImageOrientation::read_exif_orientation(&mut BufReader::new(file)),
        Err(_) => 1,
    }
}

/// Composite any alpha channel over white and reduce to 8-bit RGB.
pub fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Target size that fits `(width, height)` inside `bound` on both axes.
///
/// Scales by the smaller of the two axis ratios; never upscales.
pub fn fit_within(width: u32, height: u32, bound: u32) -> (u32, u32) {
    if width <= bound && height <= bound {
        return (width, height);
    }
    let ratio = f64::min(
        bound as f64 / width as f64,
        bound as f64 / height as f64,
    );
    let w = ((width as f64 * ratio).round() as u32).clamp(1, bound);
    let h = ((height as f64 * ratio).round() as u32).clamp(1, bound);
    (w, h)
}

fn downscale(img: RgbImage, bound: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let (w, h) = fit_within(width, height, bound);
    if (w, h) == (width, height) {
        return img;
    }
    imageops::resize(&img, w, h, FilterType::Lanczos3)
}
