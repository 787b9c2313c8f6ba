//! External image-processing capabilities.
//!
//! The pipeline only talks to [`ImageFilters`] and [`Resampler`]. Backends
//! report failures as a numeric code plus message ([`FilterError`]); the
//! pipeline maps those to [`crate::ConvertError::ExternalCapability`].
//!
//! [`BuiltinFilters`] and [`BuiltinResampler`] are implemented with the
//! `image` and `imageproc` crates. [`IdentityFilters`] returns its input
//! unchanged and is meant for tests.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};
use tracing::debug;

use crate::options::{PreprocessFilter, SharpenStrength};

/// Code used when a capability receives an image it cannot process.
pub const ERR_EMPTY_IMAGE: i32 = -215;

/// Code used when a capability is asked for a size it cannot produce.
pub const ERR_BAD_SIZE: i32 = -201;

/// Failure reported by an external capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("capability error {code}: {message}")]
pub struct FilterError {
    pub code: i32,
    pub message: String,
}

impl FilterError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

type FilterResult = Result<RgbaImage, FilterError>;

/// Enhancement and normalisation filters.
pub trait ImageFilters: Send + Sync {
    /// Run a named enhancement preset.
    fn preprocess(&self, img: &RgbaImage, kind: PreprocessFilter) -> FilterResult;

    /// Unsharp-mask the image.
    fn sharpen(&self, img: &RgbaImage, strength: SharpenStrength) -> FilterResult;

    fn auto_levels(&self, img: &RgbaImage) -> FilterResult;

    fn auto_contrast(&self, img: &RgbaImage) -> FilterResult;

    fn auto_exposure(&self, img: &RgbaImage) -> FilterResult;
}

/// Named resampling kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResampleKernel {
    Nearest,
    Linear,
    Cubic,
    Area,
    Lanczos4,
}

/// Resamples an image to an exact size with a named kernel.
pub trait Resampler: Send + Sync {
    fn resample(
        &self,
        img: &RgbaImage,
        width: u32,
        height: u32,
        kernel: ResampleKernel,
    ) -> FilterResult;
}

/// Filters that return their input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFilters;

impl ImageFilters for IdentityFilters {
    fn preprocess(&self, img: &RgbaImage, _kind: PreprocessFilter) -> FilterResult {
        Ok(img.clone())
    }

    fn sharpen(&self, img: &RgbaImage, _strength: SharpenStrength) -> FilterResult {
        Ok(img.clone())
    }

    fn auto_levels(&self, img: &RgbaImage) -> FilterResult {
        Ok(img.clone())
    }

    fn auto_contrast(&self, img: &RgbaImage) -> FilterResult {
        Ok(img.clone())
    }

    fn auto_exposure(&self, img: &RgbaImage) -> FilterResult {
        Ok(img.clone())
    }
}

/// Percentile clipped at each end of the histogram by the stretch filters.
const CLIP_PERCENT: f32 = 0.5;

/// Median luminance auto-exposure aims for.
const TARGET_MEDIAN: f32 = 128.0;

/// Gain limits for auto-exposure.
const MIN_GAIN: f32 = 0.5;
const MAX_GAIN: f32 = 2.0;

/// Filters implemented with `image` and `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFilters;

impl ImageFilters for BuiltinFilters {
    fn preprocess(&self, img: &RgbaImage, kind: PreprocessFilter) -> FilterResult {
        ensure_not_empty(img)?;
        debug!(?kind, width = img.width(), height = img.height(), "Running preprocess filter");
        match kind {
            PreprocessFilter::None => Ok(img.clone()),
            PreprocessFilter::Portrait => {
                let img = self.auto_contrast(img)?;
                self.sharpen(&img, SharpenStrength::Light)
            }
            PreprocessFilter::Pet => {
                let img = self.auto_levels(img)?;
                self.sharpen(&img, SharpenStrength::Medium)
            }
            PreprocessFilter::LinePlus => Ok(emphasize_edges(img)),
            PreprocessFilter::Auto => {
                let img = self.auto_levels(img)?;
                let img = self.auto_contrast(&img)?;
                self.auto_exposure(&img)
            }
            PreprocessFilter::Draft => Ok(draft(img)),
        }
    }

    fn sharpen(&self, img: &RgbaImage, strength: SharpenStrength) -> FilterResult {
        ensure_not_empty(img)?;
        let (sigma, threshold) = match strength {
            SharpenStrength::None => return Ok(img.clone()),
            SharpenStrength::Light => (1.0, 4),
            SharpenStrength::Medium => (1.5, 2),
            SharpenStrength::Strong => (2.0, 0),
        };
        Ok(imageops::unsharpen(img, sigma, threshold))
    }

    fn auto_levels(&self, img: &RgbaImage) -> FilterResult {
        ensure_not_empty(img)?;
        let mut out = img.clone();
        for channel in 0..3 {
            let mut histogram = [0u32; 256];
            for p in img.pixels() {
                histogram[p.0[channel] as usize] += 1;
            }
            let (low, high) = clip_range(&histogram, pixel_count(img));
            for p in out.pixels_mut() {
                p.0[channel] = stretch(p.0[channel], low, high);
            }
        }
        Ok(out)
    }

    fn auto_contrast(&self, img: &RgbaImage) -> FilterResult {
        ensure_not_empty(img)?;
        let mut histogram = [0u32; 256];
        for p in img.pixels() {
            histogram[luminance(&p.0) as usize] += 1;
        }
        let (low, high) = clip_range(&histogram, pixel_count(img));
        let mut out = img.clone();
        for p in out.pixels_mut() {
            for channel in p.0.iter_mut().take(3) {
                *channel = stretch(*channel, low, high);
            }
        }
        Ok(out)
    }

    fn auto_exposure(&self, img: &RgbaImage) -> FilterResult {
        ensure_not_empty(img)?;
        let mut histogram = [0u32; 256];
        for p in img.pixels() {
            histogram[luminance(&p.0) as usize] += 1;
        }
        let median = percentile(&histogram, pixel_count(img), 50.0).max(1);
        let gain = (TARGET_MEDIAN / f32::from(median)).clamp(MIN_GAIN, MAX_GAIN);
        debug!(median, gain, "Auto exposure gain");

        let mut out = img.clone();
        for p in out.pixels_mut() {
            for channel in p.0.iter_mut().take(3) {
                *channel = (f32::from(*channel) * gain).round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(out)
    }
}

/// Resampler backed by `image::imageops`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinResampler;

impl Resampler for BuiltinResampler {
    fn resample(
        &self,
        img: &RgbaImage,
        width: u32,
        height: u32,
        kernel: ResampleKernel,
    ) -> FilterResult {
        ensure_not_empty(img)?;
        if width == 0 || height == 0 {
            return Err(FilterError::new(
                ERR_BAD_SIZE,
                format!("cannot resample to {width}x{height}"),
            ));
        }
        let filter = match kernel {
            ResampleKernel::Nearest => FilterType::Nearest,
            ResampleKernel::Linear => FilterType::Triangle,
            ResampleKernel::Cubic => FilterType::CatmullRom,
            ResampleKernel::Lanczos4 => FilterType::Lanczos3,
            ResampleKernel::Area => {
                // Box averaging only applies when shrinking.
                if width <= img.width() && height <= img.height() {
                    return Ok(imageops::thumbnail(img, width, height));
                }
                FilterType::Triangle
            }
        };
        Ok(imageops::resize(img, width, height, filter))
    }
}

fn ensure_not_empty(img: &RgbaImage) -> Result<(), FilterError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(FilterError::new(ERR_EMPTY_IMAGE, "empty image"));
    }
    Ok(())
}

fn pixel_count(img: &RgbaImage) -> u64 {
    u64::from(img.width()) * u64::from(img.height())
}

fn luminance(rgba: &[u8; 4]) -> u8 {
    let [r, g, b, _] = *rgba;
    (0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)).round() as u8
}

/// Value at which the cumulative histogram reaches `percent` of `total`.
fn percentile(histogram: &[u32; 256], total: u64, percent: f32) -> u8 {
    let target = ((total as f64 * f64::from(percent) / 100.0) as u64).max(1);
    let mut cumulative = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        cumulative += u64::from(count);
        if cumulative >= target {
            return value as u8;
        }
    }
    255
}

fn clip_range(histogram: &[u32; 256], total: u64) -> (u8, u8) {
    (
        percentile(histogram, total, CLIP_PERCENT),
        percentile(histogram, total, 100.0 - CLIP_PERCENT),
    )
}

fn stretch(value: u8, low: u8, high: u8) -> u8 {
    if high <= low {
        return value;
    }
    let scaled = (f32::from(value) - f32::from(low)) * 255.0 / f32::from(high - low);
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Darken pixels along strong gradients so line art survives thresholding.
fn emphasize_edges(img: &RgbaImage) -> RgbaImage {
    let gray: GrayImage = GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([luminance(&img.get_pixel(x, y).0)])
    });
    let gradients = imageproc::gradients::sobel_gradients(&gray);
    let mut out = img.clone();
    for (x, y, p) in out.enumerate_pixels_mut() {
        let edge = f32::from(gradients.get_pixel(x, y).0[0].min(1020)) / 4.0;
        let base = f32::from(gray.get_pixel(x, y).0[0]);
        let v = (base - edge).clamp(0.0, 255.0) as u8;
        p.0[0] = v;
        p.0[1] = v;
        p.0[2] = v;
    }
    out
}

/// Soften and flatten the image for a fast, low-detail print.
fn draft(img: &RgbaImage) -> RgbaImage {
    let gray: GrayImage = GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([luminance(&img.get_pixel(x, y).0)])
    });
    let blurred = imageproc::filter::gaussian_blur_f32(&gray, 1.0);
    let mut out = img.clone();
    for (x, y, p) in out.enumerate_pixels_mut() {
        let v = blurred.get_pixel(x, y).0[0];
        let v = ((f32::from(v) - 128.0) * 1.5 + 128.0).clamp(0.0, 255.0) as u8;
        p.0[0] = v;
        p.0[1] = v;
        p.0[2] = v;
    }
    out
}
