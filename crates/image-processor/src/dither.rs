//! Half-toning algorithms that turn an RGBA raster into a packed bitmap.
//!
//! Every algorithm works on the gray value `(R + G + B) / 3`, visits pixels
//! in raster order and writes one bit per pixel, MSB first. Error-diffusion
//! targets that fall outside the image are dropped.

use image::RgbaImage;
use tracing::debug;

use crate::options::DitherAlgorithm;
use crate::printer_image::PrinterImage;
use crate::{ConvertError, Result};

/// Ordered-dither threshold matrix, values 0..=63.
pub const BAYER_8X8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// One error-diffusion target: column offset, row offset, weight.
type Tap = (i32, u32, f32);

/// Floyd-Steinberg:
/// - Right:        7/16
/// - Bottom-left:  3/16
/// - Bottom:       5/16
/// - Bottom-right: 1/16
const FLOYD_STEINBERG: &[Tap] = &[
    (1, 0, 7.0 / 16.0),
    (-1, 1, 3.0 / 16.0),
    (0, 1, 5.0 / 16.0),
    (1, 1, 1.0 / 16.0),
];

/// Atkinson spreads 6/8 of the error; the other 2/8 is dropped.
const ATKINSON: &[Tap] = &[
    (1, 0, 1.0 / 8.0),
    (2, 0, 1.0 / 8.0),
    (-1, 1, 1.0 / 8.0),
    (0, 1, 1.0 / 8.0),
    (1, 1, 1.0 / 8.0),
    (0, 2, 1.0 / 8.0),
];

const SIERRA_LITE: &[Tap] = &[(1, 0, 2.0 / 4.0), (-1, 1, 1.0 / 4.0), (0, 1, 1.0 / 4.0)];

/// Convert a raster into a [`PrinterImage`].
///
/// `threshold` is the tone-adjusted threshold. The raster width must be a
/// multiple of 8; callers size the canvas to the paper width.
pub fn to_printer_image(
    img: &RgbaImage,
    threshold: u8,
    algorithm: DitherAlgorithm,
    invert: bool,
) -> Result<PrinterImage> {
    let (width, height) = img.dimensions();
    if width == 0 || width % 8 != 0 || height == 0 {
        return Err(ConvertError::Validation(format!(
            "cannot pack a {width}x{height} raster; width must be a positive multiple of 8"
        )));
    }
    debug!(width, height, threshold, ?algorithm, invert, "Half-toning raster");

    let mut packer = BitPacker::new(width, height, invert);
    match algorithm {
        DitherAlgorithm::Basic => basic(img, threshold, &mut packer),
        DitherAlgorithm::Dither => diffuse(img, threshold, FLOYD_STEINBERG, &mut packer),
        DitherAlgorithm::Atkinson => diffuse(img, threshold, ATKINSON, &mut packer),
        DitherAlgorithm::Bayer => bayer(img, threshold, &mut packer),
        DitherAlgorithm::SierraLite => diffuse(img, threshold, SIERRA_LITE, &mut packer),
    }

    PrinterImage::from_bits(width, height, packer.bits)
}

/// Writes black/white decisions into an MSB-first buffer, applying inversion.
struct BitPacker {
    stride: usize,
    invert: bool,
    bits: Vec<u8>,
}

impl BitPacker {
    fn new(width: u32, height: u32, invert: bool) -> Self {
        let stride = (width / 8) as usize;
        Self {
            stride,
            invert,
            bits: vec![0; stride * height as usize],
        }
    }

    fn set(&mut self, x: u32, y: u32, black: bool) {
        if black != self.invert {
            self.bits[y as usize * self.stride + (x / 8) as usize] |= 0x80 >> (x % 8);
        }
    }
}

fn channel_sum(img: &RgbaImage, x: u32, y: u32) -> u32 {
    let [r, g, b, _] = img.get_pixel(x, y).0;
    u32::from(r) + u32::from(g) + u32::from(b)
}

/// Plain threshold. Compares the channel sum against `threshold * 3`
/// rather than the averaged gray against `threshold`.
fn basic(img: &RgbaImage, threshold: u8, packer: &mut BitPacker) {
    let limit = u32::from(threshold) * 3;
    for (x, y, _) in img.enumerate_pixels() {
        packer.set(x, y, channel_sum(img, x, y) < limit);
    }
}

fn bayer(img: &RgbaImage, threshold: u8, packer: &mut BitPacker) {
    let threshold = f32::from(threshold);
    for (x, y, _) in img.enumerate_pixels() {
        let gray = channel_sum(img, x, y) as f32 / 3.0;
        let offset = (f32::from(BAYER_8X8[(y % 8) as usize][(x % 8) as usize]) - 31.5) * 2.0;
        packer.set(x, y, gray < threshold + offset);
    }
}

fn diffuse(img: &RgbaImage, threshold: u8, taps: &[Tap], packer: &mut BitPacker) {
    let (width, height) = img.dimensions();
    let threshold = f32::from(threshold);

    // Work in f32 so diffused error can leave the 0..=255 range.
    let mut buffer: Vec<f32> = img
        .enumerate_pixels()
        .map(|(x, y, _)| channel_sum(img, x, y) as f32 / 3.0)
        .collect();

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            let old_pixel = buffer[idx];
            let new_pixel = if old_pixel < threshold { 0.0 } else { 255.0 };
            let error = old_pixel - new_pixel;
            packer.set(x, y, new_pixel == 0.0);

            for &(dx, dy, weight) in taps {
                let tx = x as i64 + i64::from(dx);
                let ty = y + dy;
                if tx < 0 || tx >= i64::from(width) || ty >= height {
                    continue;
                }
                buffer[(ty * width) as usize + tx as usize] += error * weight;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const ALL_ALGORITHMS: [DitherAlgorithm; 5] = [
        DitherAlgorithm::Basic,
        DitherAlgorithm::Dither,
        DitherAlgorithm::Atkinson,
        DitherAlgorithm::Bayer,
        DitherAlgorithm::SierraLite,
    ];

    fn uniform(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    /// Create a small test image with a gradient pattern.
    fn create_gradient_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let val = ((x + y) * 255 / (width + height - 2)) as u8;
            Rgba([val, val, val, 255])
        })
    }

    #[test]
    fn test_buffer_length_for_every_algorithm() {
        let img = create_gradient_image(24, 13);
        for algorithm in ALL_ALGORITHMS {
            for invert in [false, true] {
                let out = to_printer_image(&img, 128, algorithm, invert).unwrap();
                assert_eq!(out.bits().len(), (24 / 8) * 13, "{algorithm:?} invert={invert}");
                assert_eq!((out.width(), out.height()), (24, 13));
            }
        }
    }

    #[test]
    fn test_rejects_unaligned_width() {
        let img = uniform(10, 4, 0);
        let err = to_printer_image(&img, 128, DitherAlgorithm::Basic, false).unwrap_err();
        assert!(matches!(err, ConvertError::Validation(_)));
    }

    #[test]
    fn test_invert_flips_every_bit() {
        let img = create_gradient_image(16, 16);
        for algorithm in ALL_ALGORITHMS {
            let plain = to_printer_image(&img, 128, algorithm, false).unwrap();
            let inverted = to_printer_image(&img, 128, algorithm, true).unwrap();
            for (a, b) in plain.bits().iter().zip(inverted.bits()) {
                assert_eq!(a ^ 0xFF, *b, "{algorithm:?}");
            }
        }
    }

    #[test]
    fn test_same_input_is_byte_identical() {
        let img = create_gradient_image(32, 20);
        for algorithm in ALL_ALGORITHMS {
            let a = to_printer_image(&img, 100, algorithm, false).unwrap();
            let b = to_printer_image(&img, 100, algorithm, false).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_all_white_and_all_black_inputs() {
        for algorithm in ALL_ALGORITHMS {
            let white = to_printer_image(&uniform(16, 8, 255), 128, algorithm, false).unwrap();
            assert!(white.bits().iter().all(|&b| b == 0), "{algorithm:?}");
            let black = to_printer_image(&uniform(16, 8, 0), 128, algorithm, false).unwrap();
            assert!(black.bits().iter().all(|&b| b == 0xFF), "{algorithm:?}");
        }
    }

    // Basic compares R+G+B against threshold*3 while the other algorithms
    // compare the averaged gray against threshold. Kept as observed.
    #[test]
    fn test_basic_compares_channel_sum() {
        let mut img = uniform(8, 1, 255);
        img.put_pixel(0, 0, Rgba([128, 128, 127, 255])); // sum 383
        img.put_pixel(1, 0, Rgba([128, 128, 128, 255])); // sum 384
        img.put_pixel(2, 0, Rgba([255, 129, 0, 255])); // sum 384, uneven channels
        let out = to_printer_image(&img, 128, DitherAlgorithm::Basic, false).unwrap();
        assert!(out.pixel(0, 0));
        assert!(!out.pixel(1, 0));
        assert!(!out.pixel(2, 0));
    }

    #[test]
    fn test_atkinson_uniform_light_gray_stays_white() {
        // Steady state keeps light gray above threshold, so no dots appear.
        let out =
            to_printer_image(&uniform(32, 32, 240), 128, DitherAlgorithm::Atkinson, false).unwrap();
        assert!(out.bits().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_atkinson_uniform_dark_gray_stays_black() {
        let out =
            to_printer_image(&uniform(32, 32, 16), 128, DitherAlgorithm::Atkinson, false).unwrap();
        assert!(out.bits().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_atkinson_discards_a_quarter_of_the_error() {
        let spread: f32 = ATKINSON.iter().map(|&(_, _, w)| w).sum();
        assert!((spread - 0.75).abs() < f32::EPSILON);
        let fs: f32 = FLOYD_STEINBERG.iter().map(|&(_, _, w)| w).sum();
        assert!((fs - 1.0).abs() < f32::EPSILON);
        let sierra: f32 = SIERRA_LITE.iter().map(|&(_, _, w)| w).sum();
        assert!((sierra - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bayer_mid_gray_tiles_checkerboard() {
        let out = to_printer_image(&uniform(16, 16, 127), 128, DitherAlgorithm::Bayer, false)
            .unwrap();
        for y in 0..16u32 {
            let expected = if y % 2 == 0 { 0x55 } else { 0xAA };
            let row = &out.bits()[y as usize * 2..y as usize * 2 + 2];
            assert_eq!(row, &[expected, expected], "row {y}");
        }
    }

    #[test]
    fn test_bayer_pattern_follows_matrix() {
        let out =
            to_printer_image(&uniform(8, 8, 127), 128, DitherAlgorithm::Bayer, false).unwrap();
        for y in 0..8u32 {
            for x in 0..8u32 {
                let expected = BAYER_8X8[y as usize][x as usize] >= 32;
                assert_eq!(out.pixel(x, y), expected, "({x}, {y})");
            }
        }
    }

    #[test]
    fn test_floyd_steinberg_known_row() {
        // 100 -> black (error +100), right neighbour 100 + 43.75 -> white.
        let mut img = uniform(8, 1, 255);
        img.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 0, Rgba([100, 100, 100, 255]));
        let out = to_printer_image(&img, 128, DitherAlgorithm::Dither, false).unwrap();
        assert!(out.pixel(0, 0));
        assert!(!out.pixel(1, 0));
    }

    #[test]
    fn test_sierra_lite_diffuses_right_half() {
        // 100 -> black (error +100), right neighbour gets +50 -> 150 -> white.
        let mut img = uniform(8, 2, 255);
        img.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 0, Rgba([100, 100, 100, 255]));
        let out = to_printer_image(&img, 128, DitherAlgorithm::SierraLite, false).unwrap();
        assert!(out.pixel(0, 0));
        assert!(!out.pixel(1, 0));
    }

    #[test]
    fn test_error_diffusion_on_single_column_edges() {
        // Width 8 with a dark last column exercises right-edge clamping.
        let img = RgbaImage::from_fn(8, 3, |x, _| {
            if x == 7 { Rgba([10, 10, 10, 255]) } else { Rgba([250, 250, 250, 255]) }
        });
        for algorithm in [DitherAlgorithm::Dither, DitherAlgorithm::Atkinson, DitherAlgorithm::SierraLite] {
            let out = to_printer_image(&img, 128, algorithm, false).unwrap();
            assert!(out.pixel(7, 0), "{algorithm:?}");
        }
    }
}
