//! Geometric stage: rotation, percentage scaling, resampling and centring.
//!
//! The scaled image spans `widthPercentage` of the paper width, is centred
//! horizontally with white margins, and is cropped from the top to
//! `heightPercentage` of its full scaled height.

use image::RgbaImage;
use image::imageops::{self, FilterType};
use tracing::debug;

use crate::compose;
use crate::filters::{ResampleKernel, Resampler};
use crate::options::{ConversionOptions, ResizeAlgorithm, Rotation, SmoothingQuality};
use crate::rotate::{self, rotated_dimensions};
use crate::{ConvertError, Result};

/// Largest scaled image height, before the height crop.
///
/// Long thin sources would otherwise ask for canvases too large to allocate.
pub const MAX_SCALED_HEIGHT: u32 = 65_536;

/// Output layout computed from the source size and options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    /// Canvas width; the packed bitmap width.
    pub paper_width: u32,
    /// Width of the scaled image inside the canvas.
    pub image_width: u32,
    /// Height of the scaled image before the height crop.
    pub full_height: u32,
    /// Canvas height; the packed bitmap height.
    pub output_height: u32,
    pub rotation: Rotation,
}

impl Geometry {
    /// Left margin of the centred image.
    pub fn left_margin(&self) -> u32 {
        compose::center_offset(self.paper_width, self.image_width).max(0) as u32
    }
}

/// Compute the layout for a `src_width` x `src_height` source.
pub fn compute_geometry(
    src_width: u32,
    src_height: u32,
    paper_width: u32,
    options: &ConversionOptions,
) -> Result<Geometry> {
    validate_paper_width(paper_width)?;
    if src_width == 0 || src_height == 0 {
        return Err(ConvertError::Validation(format!(
            "source image is empty ({src_width}x{src_height})"
        )));
    }

    let (eff_w, eff_h) = rotated_dimensions(src_width, src_height, options.rotation);
    let image_width =
        ((f64::from(paper_width) * f64::from(options.width_percentage) / 100.0).round() as u32)
            .clamp(1, paper_width);
    let full_height =
        ((f64::from(eff_h) * f64::from(image_width) / f64::from(eff_w)).round() as u32).max(1);
    if full_height > MAX_SCALED_HEIGHT {
        return Err(ConvertError::Validation(format!(
            "scaled height {full_height} exceeds the maximum of {MAX_SCALED_HEIGHT}"
        )));
    }
    let output_height =
        ((f64::from(full_height) * f64::from(options.height_percentage) / 100.0).round() as u32)
            .max(1);

    Ok(Geometry {
        paper_width,
        image_width,
        full_height,
        output_height,
        rotation: options.rotation,
    })
}

/// The packed bitmap needs whole bytes per row.
pub fn validate_paper_width(paper_width: u32) -> Result<()> {
    if paper_width == 0 || paper_width % 8 != 0 {
        return Err(ConvertError::Validation(format!(
            "output width must be a positive multiple of 8, got {paper_width}"
        )));
    }
    Ok(())
}

/// Reject sizes a resampler must never see.
pub fn validate_target(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ConvertError::Validation(format!(
            "resize target must be positive, got {width}x{height}"
        )));
    }
    Ok(())
}

/// Kernel requested by `algorithm`, or `None` for the default smoothing path.
pub fn kernel_for(algorithm: ResizeAlgorithm) -> Option<ResampleKernel> {
    match algorithm {
        ResizeAlgorithm::Default => None,
        ResizeAlgorithm::Nearest => Some(ResampleKernel::Nearest),
        ResizeAlgorithm::Linear => Some(ResampleKernel::Linear),
        ResizeAlgorithm::Cubic => Some(ResampleKernel::Cubic),
        ResizeAlgorithm::Area => Some(ResampleKernel::Area),
        ResizeAlgorithm::Lanczos4 => Some(ResampleKernel::Lanczos4),
    }
}

/// Filter the default path uses for the smoothing settings.
fn smoothing_filter(enabled: bool, quality: SmoothingQuality) -> FilterType {
    if !enabled {
        return FilterType::Nearest;
    }
    match quality {
        SmoothingQuality::Low => FilterType::Triangle,
        SmoothingQuality::Medium => FilterType::CatmullRom,
        SmoothingQuality::High => FilterType::Lanczos3,
    }
}

/// Resize to an exact size with the algorithm selected in `options`.
pub fn resize(
    img: &RgbaImage,
    width: u32,
    height: u32,
    options: &ConversionOptions,
    resampler: &dyn Resampler,
) -> Result<RgbaImage> {
    validate_target(width, height)?;
    if img.dimensions() == (width, height) {
        debug!(width, height, "Image already at target size, skipping resize");
        return Ok(img.clone());
    }

    match kernel_for(options.resize_algorithm) {
        Some(kernel) => {
            debug!(width, height, ?kernel, "Resampling with named kernel");
            resampler
                .resample(img, width, height, kernel)
                .map_err(|e| ConvertError::from_filter("resample", e))
        }
        None => {
            let filter = smoothing_filter(
                options.image_smoothing_enabled,
                options.image_smoothing_quality,
            );
            debug!(width, height, ?filter, "Resampling with default smoothing");
            Ok(imageops::resize(img, width, height, filter))
        }
    }
}

/// Rotate, scale and centre `img` on a white paper canvas.
pub fn resize_onto_paper(
    img: &RgbaImage,
    geometry: &Geometry,
    options: &ConversionOptions,
    resampler: &dyn Resampler,
) -> Result<RgbaImage> {
    let rotated = rotate::rotate(img, geometry.rotation);
    let scaled = resize(
        &rotated,
        geometry.image_width,
        geometry.full_height,
        options,
        resampler,
    )?;

    debug!(
        paper_width = geometry.paper_width,
        image_width = geometry.image_width,
        output_height = geometry.output_height,
        "Placing image on paper"
    );
    Ok(compose::center_on_canvas(
        &scaled,
        geometry.paper_width,
        geometry.output_height,
    ))
}
