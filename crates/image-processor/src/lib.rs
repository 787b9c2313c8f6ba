//! Image and text to 1-bit bitmap conversion for thermal printer output.
//!
//! The crate is synchronous and I/O-free. A conversion runs as a chain of
//! stages (filter, resize, tone, half-toning) driven by [`pipeline::convert`];
//! callers that need cancellation or throttling wrap it from an async runtime.

pub mod compose;
pub mod dither;
pub mod filters;
pub mod options;
pub mod pipeline;
pub mod printer_image;
pub mod resize;
pub mod rotate;
pub mod text;
pub mod tone;

// Re-exports for convenience
pub use dither::to_printer_image;
pub use filters::{BuiltinFilters, BuiltinResampler, FilterError, IdentityFilters, ImageFilters, Resampler};
pub use options::{ConversionOptions, DitherAlgorithm, PartialConversionOptions, Rotation};
pub use pipeline::{
    CancelCheck, Capabilities, ConversionOutput, NeverCancel, PreprocessCache, SourceImage, convert,
    convert_document,
};
pub use printer_image::PrinterImage;
pub use text::{TextBlock, TextDocument, TextMetrics, TextStyle};
pub use tone::{ToneParams, adjust_for_paper};

/// Standard thermal printer paper width in pixels.
pub const PAPER_WIDTH: u32 = 384;

/// Errors that can occur while converting an image.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("Invalid conversion input: {0}")]
    Validation(String),

    #[error("{stage} failed with code {code}: {message}")]
    ExternalCapability {
        stage: &'static str,
        code: i32,
        message: String,
    },

    #[error("Conversion superseded by a newer request")]
    Superseded,

    #[error("Conversion cancelled")]
    Cancelled,
}

impl ConvertError {
    /// Whether the error should be shown to the end user.
    ///
    /// Superseded and cancelled requests are bookkeeping only.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ExternalCapability { .. })
    }

    /// Whether a whole-conversion retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalCapability { .. })
    }

    pub(crate) fn from_filter(stage: &'static str, err: FilterError) -> Self {
        Self::ExternalCapability {
            stage,
            code: err.code,
            message: err.message,
        }
    }
}

/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_and_capability_errors_are_user_visible() {
        assert!(ConvertError::Validation("x".into()).is_user_visible());
        assert!(
            ConvertError::ExternalCapability {
                stage: "resample",
                code: -215,
                message: "bad size".into(),
            }
            .is_user_visible()
        );
        assert!(!ConvertError::Superseded.is_user_visible());
        assert!(!ConvertError::Cancelled.is_user_visible());
    }

    #[test]
    fn only_capability_errors_are_retryable() {
        assert!(!ConvertError::Validation("x".into()).is_retryable());
        assert!(!ConvertError::Cancelled.is_retryable());
        let err = ConvertError::from_filter("preprocess", FilterError::new(-4, "out of memory"));
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "preprocess failed with code -4: out of memory"
        );
    }
}
