//! Quarter-turn rotation for thermal printer output.

use image::RgbaImage;
use image::imageops;
use tracing::debug;

use crate::options::Rotation;

/// Rotate an image clockwise by a multiple of 90 degrees.
///
/// 90 and 270 degree turns swap width and height.
pub fn rotate(img: &RgbaImage, rotation: Rotation) -> RgbaImage {
    let (w, h) = img.dimensions();
    debug!(w, h, degrees = rotation.degrees(), "Rotating image");
    match rotation {
        Rotation::None => img.clone(),
        Rotation::Cw90 => imageops::rotate90(img),
        Rotation::Cw180 => imageops::rotate180(img),
        Rotation::Cw270 => imageops::rotate270(img),
    }
}

/// Dimensions of `(width, height)` after applying `rotation`.
pub fn rotated_dimensions(width: u32, height: u32, rotation: Rotation) -> (u32, u32) {
    if rotation.swaps_axes() {
        (height, width)
    } else {
        (width, height)
    }
}
