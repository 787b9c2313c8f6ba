//! Tonal corrections: paper-thickness bias, contrast/brightness and the
//! optional automatic normalisation steps.

use image::RgbaImage;
use tracing::debug;

use crate::filters::ImageFilters;
use crate::options::{ConversionOptions, PaperThickness};
use crate::pipeline::{CancelCheck, checkpoint};
use crate::{ConvertError, Result};

/// Threshold and tone factors after the paper profile has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneParams {
    pub threshold: u8,
    pub contrast: f32,
    pub exposure: f32,
}

/// Bias threshold/contrast/exposure for the selected paper stock.
///
/// | paper     | exposure x | threshold | contrast x |
/// |-----------|------------|-----------|------------|
/// | light     | 1.15       | +12       | 1.0        |
/// | heavy     | 0.92       | -13       | 1.0        |
/// | dedicated | 1.0        | -3        | 1.1        |
pub fn adjust_for_paper(
    threshold: u8,
    contrast: f32,
    exposure: f32,
    paper: PaperThickness,
) -> ToneParams {
    let (exposure_factor, threshold_delta, contrast_factor) = match paper {
        PaperThickness::None | PaperThickness::Medium => (1.0, 0, 1.0),
        PaperThickness::Light => (1.15, 12, 1.0),
        PaperThickness::Heavy => (0.92, -13, 1.0),
        PaperThickness::Dedicated => (1.0, -3, 1.1),
    };

    ToneParams {
        threshold: (i16::from(threshold) + threshold_delta).clamp(0, 255) as u8,
        contrast: contrast * contrast_factor,
        exposure: exposure * exposure_factor,
    }
}

impl ToneParams {
    pub fn from_options(options: &ConversionOptions) -> Self {
        adjust_for_paper(
            options.threshold,
            options.contrast,
            options.exposure,
            options.paper_thickness,
        )
    }

    /// Whether contrast/brightness would change any pixel.
    pub fn is_neutral(&self) -> bool {
        (self.contrast - 1.0).abs() < f32::EPSILON && (self.exposure - 1.0).abs() < f32::EPSILON
    }
}

/// Apply contrast then brightness, like a `contrast(c) brightness(b)` filter
/// chain. Each step clamps to the displayable range; alpha is untouched.
pub fn apply_contrast_brightness(img: &RgbaImage, contrast: f32, brightness: f32) -> RgbaImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            let v = f32::from(*channel) / 255.0;
            let v = ((v - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
            let v = (v * brightness).clamp(0.0, 1.0);
            *channel = (v * 255.0).round() as u8;
        }
    }
    out
}

/// Run auto-levels, auto-contrast and auto-exposure, in that order, for
/// each flag that is set. Each step consumes the previous step's output;
/// cancellation is polled before every step.
pub fn apply_auto_adjust(
    img: RgbaImage,
    options: &ConversionOptions,
    filters: &dyn ImageFilters,
    cancel: &dyn CancelCheck,
) -> Result<RgbaImage> {
    let mut current = img;
    if options.auto_levels {
        checkpoint(cancel)?;
        debug!("Applying auto levels");
        current = filters
            .auto_levels(&current)
            .map_err(|e| ConvertError::from_filter("auto levels", e))?;
    }
    if options.auto_contrast {
        checkpoint(cancel)?;
        debug!("Applying auto contrast");
        current = filters
            .auto_contrast(&current)
            .map_err(|e| ConvertError::from_filter("auto contrast", e))?;
    }
    if options.auto_exposure {
        checkpoint(cancel)?;
        debug!("Applying auto exposure");
        current = filters
            .auto_exposure(&current)
            .map_err(|e| ConvertError::from_filter("auto exposure", e))?;
    }
    Ok(current)
}
