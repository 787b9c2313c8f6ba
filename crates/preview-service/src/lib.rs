//! Interactive preview service for thermal printer conversions.
//!
//! Wraps the synchronous image-processor pipeline in a throttled,
//! cancellable scheduler and provides configuration, font loading and
//! export helpers for the `thermal-preview` binary.

pub mod config;
pub mod services;

pub use config::AppConfig;
pub use services::conversion::{ConversionBackend, ConversionInput, ConversionJob, PipelineBackend};
pub use services::scheduler::{
    ConversionScheduler, PendingConversion, SchedulerConfig, SchedulerState, SchedulerStats,
};
