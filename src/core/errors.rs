// Error types for batch processing
//
// thiserror enums grouped per concern. ConfigError is fatal and reported
// before any worker starts; PipelineError and everything it wraps is a
// per-job failure that is logged and collected, never a batch abort.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems, reported before any processing begins
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("crop fractions for {axis} must each be in [0.0, 1.0) and sum below 1.0, got {first} + {second}")]
    CropTooAggressive {
        axis: &'static str,
        first: f64,
        second: f64,
    },

    #[error("fuzz tolerance must be in [0.0, 100.0], got {0}")]
    InvalidFuzz(f64),

    #[error("blur sigma must be non-negative, got {0}")]
    InvalidBlurSigma(f64),

    #[error("pass a single directory of images, or a list of image files")]
    InvalidInputArguments,

    #[error("could not find any images with the extension {extension}")]
    NoMatchingImages { extension: String },

    #[error("failed to read input path {path}: {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("the output directory {0} does not exist")]
    OutputDirMissing(PathBuf),

    #[error("this is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("specify an output directory with --out, or use --mirror-path")]
    NoOutputLocation,

    #[error("conflicting options: specify a directory with --out or use --mirror-path, but not both")]
    ConflictingOutputOptions,

    #[error("the mirror directory {0} was not found where expected")]
    MirrorTargetMissing(PathBuf),

    #[error("cannot derive a mirrored output path from {0}")]
    MirrorDerivationFailed(PathBuf),

    #[error("failed to create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("external trim tool '{command}' is not runnable: {source}")]
    MeasureToolUnavailable {
        command: String,
        source: std::io::Error,
    },
}

/// Malformed output from the external trim measurement tool
#[derive(Debug, Error)]
pub enum TrimParseError {
    #[error("expected 4 fields (width height x y), got {found} in {line:?}")]
    MissingFields { found: usize, line: String },

    #[error("{field} field is not an integer: {token:?}")]
    InvalidField { field: &'static str, token: String },
}

/// Failures of the external measurement step
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("failed to create measurement scratch file: {0}")]
    TempFile(std::io::Error),

    #[error("failed to serialize image for measurement: {0}")]
    Encode(image::ImageError),

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    ToolFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("trim tool produced non-UTF-8 output")]
    NonUtf8Output,

    #[error(transparent)]
    Parse(#[from] TrimParseError),
}

/// Per-job pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input path has no file name: {0}")]
    InvalidInputPath(PathBuf),

    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("crop of {width}x{height} at ({x}, {y}) leaves no pixels")]
    EmptyCrop {
        width: u32,
        height: u32,
        x: i64,
        y: i64,
    },

    #[error("trim measurement failed: {0}")]
    Measure(#[from] MeasureError),

    #[error("failed to encode {path}: {source}")]
    EncodeOutput {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

// Convenience type aliases for Results
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type MeasureResult<T> = Result<T, MeasureError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
