// Library exports for the scanned-schedule batch processor

pub mod core;
pub mod orchestration;
pub mod pipeline;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::{clamp_jobs, BackgroundColor, BatchConfig, CropFractions, RotationDirection},
    errors::{ConfigError, MeasureError, PipelineError, TrimParseError},
    types::{BatchReport, CropRect, JobStatus, TrimGeometry},
};

pub use crate::orchestration::BatchRunner;
pub use crate::pipeline::process_scan;
pub use crate::services::{parse_trim, MagickTrimMeasurer, ScanCanvas, TrimMeasurer};
pub use crate::utils::{discover_images, mirror_out_dir, output_path};
