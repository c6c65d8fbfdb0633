use anyhow::{Context, Result};
use image::RgbImage;

/// Encode an RGB buffer as a progressive JPEG.
///
/// mozjpeg writes a bare JFIF stream, so nothing from the source's EXIF,
/// XMP or ICC segments survives.
pub fn encode_progressive_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = img.dimensions();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality.clamp(1, 100) as f32);
    comp.set_progressive_mode();
    comp.set_optimize_coding(true);

    let mut comp = comp
        .start_compress(Vec::new())
        .context("Failed to start JPEG compression")?;
    comp.write_scanlines(img.as_raw())
        .context("Failed to write JPEG scanlines")?;
    comp.finish().context("Failed to finish JPEG compression")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    #[test]
    fn output_is_a_decodable_jpeg() {
        let img = RgbImage::from_pixel(40, 20, Rgb([10, 200, 30]));
        let data = encode_progressive_jpeg(&img, 85).unwrap();
        assert_eq!(&data[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (40, 20));
    }
}
