//! Conversion options.
//!
//! [`ConversionOptions`] is the full record for one conversion. Every field
//! has a default, and [`PartialConversionOptions`] carries the subset a
//! caller actually set so it can be merged over defaults or over a previous
//! record.

use serde::{Deserialize, Serialize};

use crate::{ConvertError, Result};

/// Clockwise rotation applied before any scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }

    /// Whether the rotation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Cw90 | Self::Cw270)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            90 => Ok(Self::Cw90),
            180 => Ok(Self::Cw180),
            270 => Ok(Self::Cw270),
            other => Err(format!("rotation must be 0, 90, 180 or 270, got {other}")),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// Half-toning method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DitherAlgorithm {
    Basic,
    #[default]
    Dither,
    Atkinson,
    Bayer,
    #[serde(alias = "sierra-lite")]
    SierraLite,
}

/// Printer heat profile for different paper stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperThickness {
    #[default]
    None,
    Light,
    Medium,
    Heavy,
    Dedicated,
}

/// Enhancement filter run by the external filter capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessFilter {
    #[default]
    None,
    Portrait,
    Pet,
    LinePlus,
    Auto,
    Draft,
}

impl PreprocessFilter {
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }
}

/// Whether the preprocess filter runs before or after the resize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOrder {
    #[default]
    BeforeResize,
    AfterResize,
}

/// Quality hint for the default resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingQuality {
    Low,
    Medium,
    #[default]
    High,
}

/// Resampling kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeAlgorithm {
    #[default]
    Default,
    Nearest,
    Linear,
    Cubic,
    Area,
    Lanczos4,
}

/// Unsharp-mask strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharpenStrength {
    #[default]
    None,
    Light,
    Medium,
    Strong,
}

impl SharpenStrength {
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }
}

/// Full configuration for one conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversionOptions {
    pub rotation: Rotation,
    pub threshold: u8,
    pub invert: bool,
    pub algorithm: DitherAlgorithm,
    pub contrast: f32,
    pub exposure: f32,
    pub height_percentage: u8,
    pub width_percentage: u8,
    pub paper_thickness: PaperThickness,
    pub preprocess_filter: PreprocessFilter,
    pub filter_order: FilterOrder,
    pub image_smoothing_enabled: bool,
    pub image_smoothing_quality: SmoothingQuality,
    pub resize_algorithm: ResizeAlgorithm,
    pub sharpen_before_resize: SharpenStrength,
    pub sharpen_after_resize: SharpenStrength,
    pub auto_levels: bool,
    pub auto_contrast: bool,
    pub auto_exposure: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            rotation: Rotation::None,
            threshold: 128,
            invert: false,
            algorithm: DitherAlgorithm::Dither,
            contrast: 1.0,
            exposure: 1.0,
            height_percentage: 100,
            width_percentage: 100,
            paper_thickness: PaperThickness::None,
            preprocess_filter: PreprocessFilter::None,
            filter_order: FilterOrder::BeforeResize,
            image_smoothing_enabled: true,
            image_smoothing_quality: SmoothingQuality::High,
            resize_algorithm: ResizeAlgorithm::Default,
            sharpen_before_resize: SharpenStrength::None,
            sharpen_after_resize: SharpenStrength::None,
            auto_levels: false,
            auto_contrast: false,
            auto_exposure: false,
        }
    }
}

impl ConversionOptions {
    /// Parse a JSON record, filling omitted fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let partial: PartialConversionOptions = serde_json_from_str(json)?;
        let options = partial.resolve();
        options.validate()?;
        Ok(options)
    }

    /// Overlay every field set in `partial` onto a copy of `self`.
    pub fn merged(&self, partial: &PartialConversionOptions) -> Self {
        Self {
            rotation: partial.rotation.unwrap_or(self.rotation),
            threshold: partial.threshold.unwrap_or(self.threshold),
            invert: partial.invert.unwrap_or(self.invert),
            algorithm: partial.algorithm.unwrap_or(self.algorithm),
            contrast: partial.contrast.unwrap_or(self.contrast),
            exposure: partial.exposure.unwrap_or(self.exposure),
            height_percentage: partial.height_percentage.unwrap_or(self.height_percentage),
            width_percentage: partial.width_percentage.unwrap_or(self.width_percentage),
            paper_thickness: partial.paper_thickness.unwrap_or(self.paper_thickness),
            preprocess_filter: partial.preprocess_filter.unwrap_or(self.preprocess_filter),
            filter_order: partial.filter_order.unwrap_or(self.filter_order),
            image_smoothing_enabled: partial
                .image_smoothing_enabled
                .unwrap_or(self.image_smoothing_enabled),
            image_smoothing_quality: partial
                .image_smoothing_quality
                .unwrap_or(self.image_smoothing_quality),
            resize_algorithm: partial.resize_algorithm.unwrap_or(self.resize_algorithm),
            sharpen_before_resize: partial
                .sharpen_before_resize
                .unwrap_or(self.sharpen_before_resize),
            sharpen_after_resize: partial
                .sharpen_after_resize
                .unwrap_or(self.sharpen_after_resize),
            auto_levels: partial.auto_levels.unwrap_or(self.auto_levels),
            auto_contrast: partial.auto_contrast.unwrap_or(self.auto_contrast),
            auto_exposure: partial.auto_exposure.unwrap_or(self.auto_exposure),
        }
    }

    /// Check numeric ranges that the field types do not already enforce.
    pub fn validate(&self) -> Result<()> {
        validate_factor("contrast", self.contrast)?;
        validate_factor("exposure", self.exposure)?;
        validate_percentage("heightPercentage", self.height_percentage)?;
        validate_percentage("widthPercentage", self.width_percentage)?;
        Ok(())
    }
}

/// A conversion record where every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialConversionOptions {
    pub rotation: Option<Rotation>,
    pub threshold: Option<u8>,
    pub invert: Option<bool>,
    pub algorithm: Option<DitherAlgorithm>,
    pub contrast: Option<f32>,
    pub exposure: Option<f32>,
    pub height_percentage: Option<u8>,
    pub width_percentage: Option<u8>,
    pub paper_thickness: Option<PaperThickness>,
    pub preprocess_filter: Option<PreprocessFilter>,
    pub filter_order: Option<FilterOrder>,
    pub image_smoothing_enabled: Option<bool>,
    pub image_smoothing_quality: Option<SmoothingQuality>,
    pub resize_algorithm: Option<ResizeAlgorithm>,
    pub sharpen_before_resize: Option<SharpenStrength>,
    pub sharpen_after_resize: Option<SharpenStrength>,
    pub auto_levels: Option<bool>,
    pub auto_contrast: Option<bool>,
    pub auto_exposure: Option<bool>,
}

impl PartialConversionOptions {
    /// Merge against the documented defaults.
    pub fn resolve(&self) -> ConversionOptions {
        ConversionOptions::default().merged(self)
    }
}

fn validate_factor(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=2.0).contains(&value) {
        return Err(ConvertError::Validation(format!(
            "{name} must be between 0.0 and 2.0, got {value}"
        )));
    }
    Ok(())
}

fn validate_percentage(name: &str, value: u8) -> Result<()> {
    if !(1..=100).contains(&value) {
        return Err(ConvertError::Validation(format!(
            "{name} must be between 1 and 100, got {value}"
        )));
    }
    Ok(())
}

fn serde_json_from_str<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| ConvertError::Validation(e.to_string()))
}
