// Entry point for the scanned-schedule batch processor

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanprep::core::config::{
    clamp_jobs, BackgroundColor, BatchConfig, CropFractions, RotationDirection,
};
use scanprep::core::errors::ConfigError;
use scanprep::orchestration::BatchRunner;
use scanprep::services::MagickTrimMeasurer;
use scanprep::utils::paths::{discover_images, mirror_out_dir};

/// Rotate, crop, deskew, auto-trim, and background-normalize scanned
/// photographs of schedules.
#[derive(Parser)]
#[command(name = "scanprep", version, about)]
struct Cli {
    /// A directory of images, or an explicit list of image files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Where the processed files should be output
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Mirror the output path from the input path instead of specifying --out
    #[arg(long)]
    mirror_path: bool,

    /// Rotate which direction into portrait orientation
    #[arg(short, long, value_enum, default_value = "ccw")]
    rotate: RotateArg,

    /// What color is the scanning background
    #[arg(short, long, value_enum, default_value = "gray")]
    background: BackgroundArg,

    /// Fraction of the image to crop from the top and the bottom (0.0 to 1.0)
    #[arg(long, default_value_t = 0.1)]
    crop_height: f64,

    /// Fraction of the image to crop from the left and the right (0.0 to 1.0)
    #[arg(long, default_value_t = 0.1)]
    crop_width: f64,

    /// How many pixels of extra padding to keep around the trimmed content
    #[arg(short, long, default_value_t = 30)]
    padding: u32,

    /// How many images to process in parallel (0 picks a sane default for
    /// this system)
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    jobs: i64,

    /// Width of the solid border added before the trim measurement, in pixels
    #[arg(long, default_value_t = 100)]
    border: u32,

    /// Color distance treated as background by trim and flood fill, percent
    #[arg(long, default_value_t = 12.0)]
    fuzz: f64,

    /// Blur sigma the measurement tool applies before trimming
    #[arg(long, default_value_t = 30.0)]
    blur: f64,

    /// Upper bound on candidate angles scored by the deskew search
    #[arg(long, default_value_t = 10_000)]
    deskew_effort: u32,

    /// Flood-fill the background to true black before writing
    #[arg(long)]
    recolor_black: bool,

    /// File extension (case-sensitive) that marks an input image
    #[arg(long, default_value = ".JPG")]
    extension: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RotateArg {
    Ccw,
    Cw,
}

impl From<RotateArg> for RotationDirection {
    fn from(arg: RotateArg) -> Self {
        match arg {
            RotateArg::Ccw => RotationDirection::CounterClockwise,
            RotateArg::Cw => RotationDirection::Clockwise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackgroundArg {
    Black,
    Purple,
    Gray,
}

impl From<BackgroundArg> for BackgroundColor {
    fn from(arg: BackgroundArg) -> Self {
        match arg {
            BackgroundArg::Black => BackgroundColor::Black,
            BackgroundArg::Purple => BackgroundColor::Purple,
            BackgroundArg::Gray => BackgroundColor::Gray,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scanprep=info")),
        )
        .init();

    let images = discover_images(&cli.inputs, &cli.extension)?;

    let out_dir = match (cli.out, cli.mirror_path) {
        (Some(_), true) => return Err(ConfigError::ConflictingOutputOptions.into()),
        (None, false) => return Err(ConfigError::NoOutputLocation.into()),
        (Some(dir), false) => dir,
        (None, true) => mirror_out_dir(&images[0])?,
    };

    let jobs = clamp_jobs(cli.jobs, num_cpus::get());
    if cli.jobs > jobs as i64 {
        warn!("be realistic: running {jobs} jobs");
    }

    let config = BatchConfig {
        rotation: cli.rotate.into(),
        background: cli.background.into(),
        crop: CropFractions::symmetric(cli.crop_height, cli.crop_width),
        border_px: cli.border,
        padding_px: cli.padding,
        fuzz_percent: cli.fuzz,
        blur_sigma: cli.blur,
        deskew_effort: cli.deskew_effort,
        recolor_black: cli.recolor_black,
        jobs,
        extension: cli.extension,
        out_dir,
        magick_command: std::env::var("SCANPREP_MAGICK").unwrap_or_else(|_| "magick".to_string()),
    };
    config.validate()?;

    let measurer = MagickTrimMeasurer::new(
        config.magick_command.as_str(),
        config.blur_sigma,
        config.fuzz_percent,
    );
    // One-time bracket around the whole pool: confirm the external tool
    // before any worker starts.
    measurer
        .probe()
        .map_err(|source| ConfigError::MeasureToolUnavailable {
            command: config.magick_command.clone(),
            source,
        })?;

    info!(
        "processing {} images with {} workers into {}",
        images.len(),
        config.jobs,
        config.out_dir.display()
    );

    let runner = BatchRunner::new(Arc::new(config), Arc::new(measurer));
    let report = runner.run(images);

    info!(
        "done: {} processed, {} skipped, {} failed",
        report.processed,
        report.skipped,
        report.failed()
    );

    if !report.failures.is_empty() {
        println!("\nThe following images were not correctly processed:");
        for failure in &report.failures {
            println!("{}", failure.display());
        }
    }

    // Per-job failures are reported above but never change the exit code
    Ok(())
}
