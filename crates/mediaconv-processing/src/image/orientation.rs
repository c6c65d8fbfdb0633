use image::{imageops, RgbImage};
use std::io::{BufRead, Seek};

/// EXIF orientation handling
pub struct ImageOrientation;

impl ImageOrientation {
    /// Read the EXIF orientation tag (1-8); anything missing or invalid is 1.
    pub fn read_exif_orientation<R: BufRead + Seek>(reader: &mut R) -> u8 {
        let exif = match exif::Reader::new().read_from_container(reader) {
            Ok(exif) => exif,
            Err(_) => return 1,
        };

        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .filter(|v| (1..=8).contains(v))
            .map(|v| v as u8)
            .unwrap_or(1)
    }

    /// Rotation (clockwise degrees) and flips needed to display an image
    /// stored with the given orientation. Rotation is applied first.
    pub fn transforms(orientation: u8) -> (Option<u16>, bool, bool) {
        match orientation {
            1 => (None, false, false),
            2 => (None, true, false),
            3 => (Some(180), false, false),
            4 => (None, false, true),
            5 => (Some(90), true, false),
            6 => (Some(90), false, false),
            7 => (Some(270), true, false),
            8 => (Some(270), false, false),
            _ => (None, false, false),
        }
    }

    pub fn apply(img: RgbImage, orientation: u8) -> RgbImage {
        let (rotate, flip_h, flip_v) = Self::transforms(orientation);
        if orientation != 1 {
            tracing::debug!(
                orientation = orientation,
                rotate = ?rotate,
                flip_horizontal = flip_h,
                flip_vertical = flip_v,
                "Applying EXIF orientation"
            );
        }

        let mut img = match rotate {
            Some(90) => imageops::rotate90(&img),
            Some(180) => imageops::rotate180(&img),
            Some(270) => imageops::rotate270(&img),
            _ => img,
        };
        if flip_h {
            imageops::flip_horizontal_in_place(&mut img);
        }
        if flip_v {
            imageops::flip_vertical_in_place(&mut img);
        }
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    /// 3x2 image with a single red marker in the top-left corner.
    fn marked() -> RgbImage {
        let mut img = RgbImage::from_pixel(3, 2, BLACK);
        img.put_pixel(0, 0, RED);
        img
    }

    fn red_at(img: &RgbImage) -> (u32, u32) {
        img.enumerate_pixels()
            .find(|(_, _, p)| **p == RED)
            .map(|(x, y, _)| (x, y))
            .unwrap()
    }

    #[test]
    fn every_orientation_lands_the_marker_correctly() {
        // (orientation, expected dimensions, expected marker position)
        let cases = [
            (1, (3, 2), (0, 0)),
            (2, (3, 2), (2, 0)),
            (3, (3, 2), (2, 1)),
            (4, (3, 2), (0, 1)),
            (5, (2, 3), (0, 0)),
            (6, (2, 3), (1, 0)),
            (7, (2, 3), (1, 2)),
            (8, (2, 3), (0, 2)),
        ];
        for (orientation, dims, marker) in cases {
            let out = ImageOrientation::apply(marked(), orientation);
            assert_eq!(out.dimensions(), dims, "orientation {orientation}");
            assert_eq!(red_at(&out), marker, "orientation {orientation}");
        }
    }

    #[test]
    fn invalid_orientation_is_identity() {
        assert_eq!(ImageOrientation::transforms(0), (None, false, false));
        assert_eq!(ImageOrientation::transforms(9), (None, false, false));
        assert_eq!(red_at(&ImageOrientation::apply(marked(), 42)), (0, 0));
    }

    #[test]
    fn missing_exif_reads_as_normal() {
        let mut cursor = Cursor::new(b"not an image".to_vec());
        assert_eq!(ImageOrientation::read_exif_orientation(&mut cursor), 1);
    }
}
