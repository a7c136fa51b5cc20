use image::{Rgb, RgbImage};

use crate::ocr::BoundingBox;

pub const DEFAULT_PADDING: u32 = 10;

/// Erases text by filling each box with the mean colour of its padded
/// surroundings.
#[derive(Debug, Clone, Copy)]
pub struct Inpainter {
    padding: u32,
}

impl Default for Inpainter {
    fn default() -> Self {
        Self::new(DEFAULT_PADDING)
    }
}

impl Inpainter {
    pub fn new(padding: u32) -> Self {
        Self { padding }
    }

    /// Boxes are handled in order, so a later box may sample pixels an
    /// earlier one already filled. The padded rectangle is read but only the
    /// box itself is written.
    pub fn erase(&self, mut image: RgbImage, boxes: &[BoundingBox]) -> RgbImage {
        let (width, height) = image.dimensions();
        for bbox in boxes {
            let Some(bbox) = bbox.clamp_to(width, height) else {
                continue;
            };
            let sample = bbox.expand(self.padding, width, height);
            let fill = mean_colour(&image, &sample);
            for y in bbox.y..bbox.bottom() {
                for x in bbox.x..bbox.right() {
                    image.put_pixel(x, y, fill);
                }
            }
        }
        image
    }
}

/// Per-channel mean over `rect`, rounded half up. The rectangle includes the
/// box interior.
fn mean_colour(image: &RgbImage, rect: &BoundingBox) -> Rgb<u8> {
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let Rgb(pixel) = *image.get_pixel(x, y);
            for (sum, value) in sums.iter_mut().zip(pixel) {
                *sum += u64::from(value);
            }
            count += 1;
        }
    }
    if count == 0 {
        return Rgb([0, 0, 0]);
    }
    let channel = |sum: u64| ((2 * sum + count) / (2 * count)).min(255) as u8;
    Rgb([channel(sums[0]), channel(sums[1]), channel(sums[2])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::solid_image;

    const WHITE: [u8; 3] = [255, 255, 255];
    const BLACK: [u8; 3] = [0, 0, 0];

    /// 60x40 white slide with a black 10x5 "glyph" at (20, 15).
    fn slide_with_text() -> (RgbImage, BoundingBox) {
        let mut image = solid_image(60, 40, WHITE);
        let bbox = BoundingBox::new(20, 15, 10, 5);
        for y in bbox.y..bbox.bottom() {
            for x in bbox.x..bbox.right() {
                image.put_pixel(x, y, Rgb(BLACK));
            }
        }
        (image, bbox)
    }

    fn inside(bbox: &BoundingBox, x: u32, y: u32) -> bool {
        x >= bbox.x && x < bbox.right() && y >= bbox.y && y < bbox.bottom()
    }

    #[test]
    fn box_interior_becomes_uniform_mean() {
        let (image, bbox) = slide_with_text();
        let erased = Inpainter::default().erase(image, &[bbox]);

        // Padded rect is 30x25 = 750 pixels, 50 of them black: 255 * 700 / 750.
        for y in bbox.y..bbox.bottom() {
            for x in bbox.x..bbox.right() {
                assert_eq!(erased.get_pixel(x, y), &Rgb([238, 238, 238]));
            }
        }
    }

    #[test]
    fn pixels_outside_the_box_are_untouched() {
        let (image, bbox) = slide_with_text();
        let original = image.clone();
        let erased = Inpainter::default().erase(image, &[bbox]);
        for (x, y, pixel) in erased.enumerate_pixels() {
            if !inside(&bbox, x, y) {
                assert_eq!(pixel, original.get_pixel(x, y), "pixel ({x}, {y}) changed");
            }
        }
    }

    #[test]
    fn interior_pixels_bias_the_fill_colour() {
        // The sample includes the text itself, so the fill is darker than the
        // pure background around it.
        let (image, bbox) = slide_with_text();
        let erased = Inpainter::default().erase(image, &[bbox]);
        assert_ne!(erased.get_pixel(bbox.x, bbox.y), &Rgb(WHITE));
    }

    #[test]
    fn erasing_twice_keeps_box_uniform() {
        let (image, bbox) = slide_with_text();
        let inpainter = Inpainter::default();
        let once = inpainter.erase(image, &[bbox]);
        let twice = inpainter.erase(once, &[bbox]);
        let first = *twice.get_pixel(bbox.x, bbox.y);
        for y in bbox.y..bbox.bottom() {
            for x in bbox.x..bbox.right() {
                assert_eq!(twice.get_pixel(x, y), &first);
            }
        }
    }

    #[test]
    fn boxes_at_the_edge_are_clamped() {
        let image = solid_image(60, 40, [10, 20, 30]);
        let erased = Inpainter::default().erase(
            image,
            &[BoundingBox::new(55, 35, 20, 20), BoundingBox::new(100, 100, 5, 5)],
        );
        assert_eq!(erased.dimensions(), (60, 40));
        assert_eq!(erased.get_pixel(59, 39), &Rgb([10, 20, 30]));
    }

    #[test]
    fn mean_rounds_half_up() {
        let mut image = solid_image(2, 1, [0, 0, 0]);
        image.put_pixel(1, 0, Rgb([1, 3, 255]));
        let mean = mean_colour(&image, &BoundingBox::new(0, 0, 2, 1));
        assert_eq!(mean, Rgb([1, 2, 128]));
    }

    #[test]
    fn later_boxes_sample_earlier_fills() {
        let (image, first) = slide_with_text();
        // Blank area whose padded sample overlaps the first box.
        let second = BoundingBox::new(32, 15, 10, 5);
        let erased = Inpainter::default().erase(image, &[first, second]);
        assert_eq!(erased.get_pixel(first.x, first.y), &Rgb([238, 238, 238]));
        // 710 white pixels plus 40 already filled with 238.
        assert_eq!(erased.get_pixel(second.x, second.y), &Rgb([254, 254, 254]));
    }
}
