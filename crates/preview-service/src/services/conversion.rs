//! Conversion jobs and the backend that executes them.
//!
//! The backend is synchronous; the scheduler runs it on the blocking pool
//! and hands it a cancellation check backed by the job's token.

use std::sync::Arc;

use image_processor::pipeline::{self, Capabilities};
use image_processor::{
    BuiltinFilters, BuiltinResampler, CancelCheck, ConversionOptions, ConversionOutput,
    ImageFilters, PreprocessCache, Resampler, SourceImage, TextDocument, TextMetrics,
};
use image_processor::{ConvertError, Result};

/// What to convert.
#[derive(Debug, Clone)]
pub enum ConversionInput {
    /// A decoded raster, scaled onto paper `output_width` dots wide.
    Image {
        source: SourceImage,
        output_width: u32,
    },
    /// A text document rendered at its own paper width.
    Text(TextDocument),
}

/// One conversion request: input plus the options to apply.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input: ConversionInput,
    pub options: ConversionOptions,
}

impl ConversionJob {
    pub fn image(source: SourceImage, output_width: u32, options: ConversionOptions) -> Self {
        Self {
            input: ConversionInput::Image {
                source,
                output_width,
            },
            options,
        }
    }

    pub fn text(doc: TextDocument, options: ConversionOptions) -> Self {
        Self {
            input: ConversionInput::Text(doc),
            options,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self.input {
            ConversionInput::Image { .. } => "image",
            ConversionInput::Text(_) => "text",
        }
    }
}

/// Executes a single conversion attempt.
pub trait ConversionBackend: Send + Sync + 'static {
    fn convert(
        &self,
        job: &ConversionJob,
        cache: &mut PreprocessCache,
        cancel: &dyn CancelCheck,
    ) -> Result<ConversionOutput>;
}

/// Backend running the image-processor pipeline with pluggable capabilities.
#[derive(Clone)]
pub struct PipelineBackend {
    filters: Arc<dyn ImageFilters>,
    resampler: Arc<dyn Resampler>,
    metrics: Option<Arc<dyn TextMetrics>>,
}

impl Default for PipelineBackend {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinFilters), Arc::new(BuiltinResampler))
    }
}

impl PipelineBackend {
    pub fn new(filters: Arc<dyn ImageFilters>, resampler: Arc<dyn Resampler>) -> Self {
        Self {
            filters,
            resampler,
            metrics: None,
        }
    }

    /// Enable text documents, measured and drawn with `metrics`.
    pub fn with_text_metrics(mut self, metrics: Arc<dyn TextMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl ConversionBackend for PipelineBackend {
    fn convert(
        &self,
        job: &ConversionJob,
        cache: &mut PreprocessCache,
        cancel: &dyn CancelCheck,
    ) -> Result<ConversionOutput> {
        let caps = Capabilities {
            filters: self.filters.as_ref(),
            resampler: self.resampler.as_ref(),
        };
        match &job.input {
            ConversionInput::Image {
                source,
                output_width,
            } => pipeline::convert(source, *output_width, &job.options, caps, cache, cancel),
            ConversionInput::Text(doc) => {
                let metrics = self.metrics.as_deref().ok_or_else(|| {
                    ConvertError::Validation("no font configured for text documents".into())
                })?;
                pipeline::convert_document(doc, &job.options, caps, metrics, cache, cancel)
            }
        }
    }
}
