//! Command-line front end: convert an image or a text document into a
//! thermal printer bitmap and write the results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use image_processor::text::GlyphTextMetrics;
use image_processor::{ConversionOptions, SourceImage, TextDocument};
use preview_service::services::export::{self, ExportTargets};
use preview_service::services::font;
use preview_service::{AppConfig, ConversionJob, ConversionScheduler, PipelineBackend};

/// Convert images and text into 1-bit thermal printer bitmaps
#[derive(Parser, Debug)]
#[command(name = "thermal-preview")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a raster image (PNG, JPEG, BMP, GIF, WebP)
    Image {
        /// Input image path
        path: PathBuf,

        /// Output width in dots (defaults to PAPER_WIDTH)
        #[arg(long)]
        width: Option<u32>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Render a JSON text document
    Text {
        /// Text document JSON path
        document: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the effective settings as JSON
    Settings,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Conversion options as inline JSON or a path to a JSON file
    #[arg(short = 'o', long)]
    options: Option<String>,

    /// Write the bitmap as PNG
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write the raw packed bits
    #[arg(long)]
    bits: Option<PathBuf>,

    /// Write a binary PBM (P4)
    #[arg(long)]
    pbm: Option<PathBuf>,

    /// Write the tone-adjusted raster as PNG
    #[arg(long)]
    preview: Option<PathBuf>,
}

impl OutputArgs {
    fn conversion_options(&self) -> anyhow::Result<ConversionOptions> {
        let Some(raw) = &self.options else {
            return Ok(ConversionOptions::default());
        };
        let json = if raw.trim_start().starts_with('{') {
            raw.clone()
        } else {
            std::fs::read_to_string(raw).with_context(|| format!("failed to read options {raw}"))?
        };
        Ok(ConversionOptions::from_json(&json)?)
    }

    fn targets(&self) -> ExportTargets<'_> {
        ExportTargets {
            png: self.out.as_deref(),
            bits: self.bits.as_deref(),
            pbm: self.pbm.as_deref(),
            preview: self.preview.as_deref(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Image {
            path,
            width,
            output,
        } => {
            let source = load_source(&path)?;
            let options = output.conversion_options()?;
            let job = ConversionJob::image(source, width.unwrap_or(config.paper_width), options);
            run(&config, PipelineBackend::default(), job, &output).await
        }
        Commands::Text { document, output } => {
            let json = std::fs::read_to_string(&document)
                .with_context(|| format!("failed to read {}", document.display()))?;
            let doc = TextDocument::from_json(&json)?;
            let font_data = font::load_font_data(config.font_path.as_deref())?;
            let metrics = GlyphTextMetrics::from_bytes(font_data)?;
            let backend = PipelineBackend::default().with_text_metrics(Arc::new(metrics));
            let options = output.conversion_options()?;
            run(&config, backend, ConversionJob::text(doc, options), &output).await
        }
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(&config.settings())?);
            Ok(())
        }
    }
}

fn load_source(path: &Path) -> anyhow::Result<SourceImage> {
    let image = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "Loaded source image"
    );
    Ok(SourceImage::new(image.to_rgba8()))
}

async fn run(
    config: &AppConfig,
    backend: PipelineBackend,
    job: ConversionJob,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let scheduler = ConversionScheduler::spawn(Arc::new(backend), config.into());
    let result = scheduler.submit(job).await;
    scheduler.shutdown().await;

    let converted = result?;
    tracing::info!(
        width = converted.image.width(),
        height = converted.image.height(),
        "Conversion finished"
    );
    export::export(&converted, &output.targets())?;
    Ok(())
}
