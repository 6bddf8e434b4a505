// External trim measurement
//
// The in-process editor cannot blur-before-trim as a single measurement
// primitive, so the bounding box comes from command-line ImageMagick. Only
// the measurement is taken from it; the destructive crop stays in-process.

use std::process::Command;
use tracing::{debug, warn};

use crate::core::errors::{MeasureError, MeasureResult, TrimParseError};
use crate::core::types::TrimGeometry;
use crate::services::canvas::ScanCanvas;

/// Prefix for measurement scratch files in the system temp directory
const SCRATCH_PREFIX: &str = "scanprep-measure-";

/// Measures the content bounding box of a canvas.
///
/// A seam rather than a direct call so the external tool can be swapped for
/// an in-process equivalent without touching the pipeline control flow.
pub trait TrimMeasurer: Send + Sync {
    fn measure(&self, canvas: &ScanCanvas) -> MeasureResult<TrimGeometry>;
}

/// Shells out to ImageMagick: blur to suppress small imperfections, trim
/// pixels matching the background within the fuzz tolerance, and report the
/// surviving bounding box without actually cropping anything.
pub struct MagickTrimMeasurer {
    command: String,
    blur_sigma: f64,
    fuzz_percent: f64,
}

impl MagickTrimMeasurer {
    pub fn new(command: impl Into<String>, blur_sigma: f64, fuzz_percent: f64) -> Self {
        Self {
            command: command.into(),
            blur_sigma,
            fuzz_percent,
        }
    }

    /// Confirm the external tool is present and runnable. Called once before
    /// any worker starts.
    pub fn probe(&self) -> std::io::Result<()> {
        let output = Command::new(&self.command).arg("-version").output()?;
        if !output.status.success() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("'{} -version' exited with {}", self.command, output.status),
            ));
        }
        Ok(())
    }
}

impl TrimMeasurer for MagickTrimMeasurer {
    fn measure(&self, canvas: &ScanCanvas) -> MeasureResult<TrimGeometry> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(".png")
            .tempfile()
            .map_err(MeasureError::TempFile)?;
        canvas
            .write_png(scratch.path())
            .map_err(MeasureError::Encode)?;

        let output = Command::new(&self.command)
            .arg(scratch.path())
            .args(["-virtual-pixel", "edge"])
            .args(["-blur", &format!("0x{}", self.blur_sigma)])
            .args(["-fuzz", &format!("{}%", self.fuzz_percent)])
            .arg("-trim")
            .args(["-format", "%w %h %X %Y"])
            .arg("info:")
            .output()
            .map_err(|source| MeasureError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // The scratch file has served its purpose either way
        if let Err(error) = scratch.close() {
            warn!("could not remove measurement scratch file: {error}");
        }

        if !output.status.success() {
            return Err(MeasureError::ToolFailed {
                command: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let line = std::str::from_utf8(&output.stdout).map_err(|_| MeasureError::NonUtf8Output)?;
        let geometry = parse_trim(line)?;
        debug!(
            "measured trim box {}x{} at ({}, {})",
            geometry.width, geometry.height, geometry.x, geometry.y
        );
        Ok(geometry)
    }
}

/// Parse the tool's one-line report, e.g. `"2109 2743 +312 +274"`:
/// width, height, then signed x and y offsets.
pub fn parse_trim(line: &str) -> Result<TrimGeometry, TrimParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(TrimParseError::MissingFields {
            found: fields.len(),
            line: line.trim().to_string(),
        });
    }
    Ok(TrimGeometry {
        width: parse_field("width", fields[0])?,
        height: parse_field("height", fields[1])?,
        x: parse_field("x offset", fields[2])?,
        y: parse_field("y offset", fields[3])?,
    })
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    token: &str,
) -> Result<T, TrimParseError> {
    token.parse().map_err(|_| TrimParseError::InvalidField {
        field,
        token: token.to_string(),
    })
}
