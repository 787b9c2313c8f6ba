//! The staged conversion from source raster to [`PrinterImage`].
//!
//! Stage order:
//! 1. preprocess filter (before-resize order, cached)
//! 2. sharpen before resize
//! 3. rotate, scale and centre on the paper canvas
//! 4. preprocess filter (after-resize order, cached)
//! 5. contrast/brightness with the paper-adjusted factors
//! 6. auto levels / contrast / exposure
//! 7. sharpen after resize
//! 8. half-toning and bit packing
//!
//! Cancellation is polled between every stage. A stage that is already
//! running is allowed to finish; its result is then dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;
use tracing::debug;

use crate::dither::to_printer_image;
use crate::filters::{ImageFilters, Resampler};
use crate::options::{
    ConversionOptions, FilterOrder, PreprocessFilter, ResizeAlgorithm, Rotation, SharpenStrength,
    SmoothingQuality,
};
use crate::printer_image::PrinterImage;
use crate::resize::{self, Geometry};
use crate::text::{self, TextDocument, TextMetrics};
use crate::tone::{self, ToneParams};
use crate::{ConvertError, Result};

/// Polled between stages; returning `true` aborts the conversion.
pub trait CancelCheck {
    fn is_cancelled(&self) -> bool;
}

impl<F: Fn() -> bool> CancelCheck for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// A check that never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelCheck for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Return [`ConvertError::Cancelled`] if cancellation was requested.
pub fn checkpoint(cancel: &dyn CancelCheck) -> Result<()> {
    if cancel.is_cancelled() {
        debug!("Conversion cancelled at stage boundary");
        return Err(ConvertError::Cancelled);
    }
    Ok(())
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A decoded source raster with a process-unique identity.
///
/// Clones share the pixels and the identity.
#[derive(Debug, Clone)]
pub struct SourceImage {
    id: u64,
    raster: Arc<RgbaImage>,
}

impl SourceImage {
    pub fn new(raster: RgbaImage) -> Self {
        Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            raster: Arc::new(raster),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }
}

/// External capabilities a conversion may call.
#[derive(Clone, Copy)]
pub struct Capabilities<'a> {
    pub filters: &'a dyn ImageFilters,
    pub resampler: &'a dyn Resampler,
}

/// Finished bitmap plus advisory preview rasters.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub image: PrinterImage,
    /// Raster after every tonal step, as fed to the half-toner.
    pub adjusted_preview: RgbaImage,
    /// Raster right after the preprocess filter, if one ran.
    pub filtered_preview: Option<RgbaImage>,
}

/// Resize settings that shape an after-resize filter's input.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResizeKey {
    geometry: Geometry,
    algorithm: ResizeAlgorithm,
    smoothing: bool,
    quality: SmoothingQuality,
    sharpen: SharpenStrength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    source_id: u64,
    filter: PreprocessFilter,
    order: FilterOrder,
    resize: Option<ResizeKey>,
}

/// Single-entry cache of the last preprocess filter result.
///
/// The entry is replaced whenever the source, filter kind or filter order
/// changes. For after-resize filtering the resize layout is part of the key
/// too, since the filter input depends on it.
#[derive(Debug, Default)]
pub struct PreprocessCache {
    entry: Option<(CacheKey, RgbaImage)>,
}

impl PreprocessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    fn get_or_run(
        &mut self,
        key: CacheKey,
        run: impl FnOnce() -> Result<RgbaImage>,
    ) -> Result<RgbaImage> {
        if let Some((cached_key, image)) = &self.entry {
            if *cached_key == key {
                debug!(source_id = key.source_id, filter = ?key.filter, "Preprocess cache hit");
                return Ok(image.clone());
            }
        }
        self.entry = None;
        let image = run()?;
        self.entry = Some((key, image.clone()));
        Ok(image)
    }
}

/// Convert `source` into a packed bitmap `output_width` pixels wide.
pub fn convert(
    source: &SourceImage,
    output_width: u32,
    options: &ConversionOptions,
    caps: Capabilities<'_>,
    cache: &mut PreprocessCache,
    cancel: &dyn CancelCheck,
) -> Result<ConversionOutput> {
    options.validate()?;
    let (src_w, src_h) = source.raster().dimensions();
    let geometry = resize::compute_geometry(src_w, src_h, output_width, options)?;
    let tone = ToneParams::from_options(options);
    debug!(
        source_id = source.id(),
        src_w,
        src_h,
        output_width,
        output_height = geometry.output_height,
        algorithm = ?options.algorithm,
        "Starting conversion"
    );
    checkpoint(cancel)?;

    let filter = options.preprocess_filter;
    let mut filtered_preview = None;

    let mut working = if filter.is_enabled() && options.filter_order == FilterOrder::BeforeResize {
        let key = CacheKey {
            source_id: source.id(),
            filter,
            order: FilterOrder::BeforeResize,
            resize: None,
        };
        let filtered = cache.get_or_run(key, || run_preprocess(caps, source.raster(), filter))?;
        checkpoint(cancel)?;
        filtered_preview = Some(filtered.clone());
        filtered
    } else {
        source.raster().clone()
    };

    if options.sharpen_before_resize.is_enabled() {
        working = run_sharpen(caps, &working, options.sharpen_before_resize)?;
        checkpoint(cancel)?;
    }

    working = resize::resize_onto_paper(&working, &geometry, options, caps.resampler)?;
    checkpoint(cancel)?;

    if filter.is_enabled() && options.filter_order == FilterOrder::AfterResize {
        let key = CacheKey {
            source_id: source.id(),
            filter,
            order: FilterOrder::AfterResize,
            resize: Some(ResizeKey {
                geometry,
                algorithm: options.resize_algorithm,
                smoothing: options.image_smoothing_enabled,
                quality: options.image_smoothing_quality,
                sharpen: options.sharpen_before_resize,
            }),
        };
        let canvas = &working;
        working = cache.get_or_run(key, || run_preprocess(caps, canvas, filter))?;
        checkpoint(cancel)?;
        filtered_preview = Some(working.clone());
    }

    if !tone.is_neutral() {
        working = tone::apply_contrast_brightness(&working, tone.contrast, tone.exposure);
    }
    working = tone::apply_auto_adjust(working, options, caps.filters, cancel)?;
    checkpoint(cancel)?;

    if options.sharpen_after_resize.is_enabled() {
        working = run_sharpen(caps, &working, options.sharpen_after_resize)?;
        checkpoint(cancel)?;
    }

    let image = to_printer_image(&working, tone.threshold, options.algorithm, options.invert)?;
    debug!(
        width = image.width(),
        height = image.height(),
        "Conversion complete"
    );

    Ok(ConversionOutput {
        image,
        adjusted_preview: working,
        filtered_preview,
    })
}

/// Options used for text documents: no rotation, full width and height.
pub fn text_options(options: &ConversionOptions) -> ConversionOptions {
    ConversionOptions {
        rotation: Rotation::None,
        width_percentage: 100,
        height_percentage: 100,
        ..options.clone()
    }
}

/// Lay out and draw `doc`, then convert the raster at the paper width.
///
/// Options and paper width are validated before the font is touched.
pub fn convert_document(
    doc: &TextDocument,
    options: &ConversionOptions,
    caps: Capabilities<'_>,
    metrics: &dyn TextMetrics,
    cache: &mut PreprocessCache,
    cancel: &dyn CancelCheck,
) -> Result<ConversionOutput> {
    let options = text_options(options);
    options.validate()?;
    resize::validate_paper_width(doc.paper_width)?;
    checkpoint(cancel)?;

    let raster = text::render(doc, metrics, cancel)?;
    checkpoint(cancel)?;
    let source = SourceImage::new(raster);
    convert(
        &source,
        doc.paper_width,
        &options,
        caps,
        cache,
        cancel,
    )
}

fn run_preprocess(
    caps: Capabilities<'_>,
    img: &RgbaImage,
    filter: PreprocessFilter,
) -> Result<RgbaImage> {
    debug!(?filter, "Running preprocess filter");
    caps.filters
        .preprocess(img, filter)
        .map_err(|e| ConvertError::from_filter("preprocess", e))
}

fn run_sharpen(
    caps: Capabilities<'_>,
    img: &RgbaImage,
    strength: SharpenStrength,
) -> Result<RgbaImage> {
    debug!(?strength, "Sharpening");
    caps.filters
        .sharpen(img, strength)
        .map_err(|e| ConvertError::from_filter("sharpen", e))
}
