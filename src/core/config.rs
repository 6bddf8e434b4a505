// Batch configuration
//
// One immutable value constructed at startup, validated, and shared into
// every worker behind an Arc. Nothing here is mutated once the run starts.

use crate::core::errors::{ConfigError, ConfigResult};
use image::Rgb;
use std::path::PathBuf;

/// Canonical shade used by the optional terminal recolor step
pub const TRUE_BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Direction the landscape scans are rotated into portrait orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    /// 90 degrees clockwise
    Clockwise,
    /// 270 degrees clockwise
    CounterClockwise,
}

impl RotationDirection {
    pub fn degrees(self) -> u32 {
        match self {
            RotationDirection::Clockwise => 90,
            RotationDirection::CounterClockwise => 270,
        }
    }
}

/// Reference shades of the scanning table the schedules were photographed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundColor {
    Black,
    Purple,
    Gray,
}

impl BackgroundColor {
    /// sRGB triple declared as the image background.
    pub fn rgb(self) -> Rgb<u8> {
        match self {
            // The black scanning background isn't truly black
            BackgroundColor::Black => Rgb([30, 30, 37]),
            BackgroundColor::Purple => Rgb([146, 147, 199]),
            BackgroundColor::Gray => Rgb([95, 95, 125]),
        }
    }
}

/// Fraction of each edge removed before the trim measurement.
///
/// The corners distant from the schedule tend to be darker with a
/// gradient-like appearance, so they are cut by fraction rather than left
/// for the auto-trim to handle.
#[derive(Debug, Clone, Copy)]
pub struct CropFractions {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl CropFractions {
    /// The CLI shape: `height` taken from both top and bottom, `width` from
    /// both left and right.
    pub fn symmetric(height: f64, width: f64) -> Self {
        Self {
            top: height,
            bottom: height,
            left: width,
            right: width,
        }
    }
}

/// Process-wide settings, identical for every image in a batch
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub rotation: RotationDirection,
    pub background: BackgroundColor,
    pub crop: CropFractions,
    /// Solid border added before the trim measurement, in pixels
    pub border_px: u32,
    /// Extra pixels kept around the measured trim box
    pub padding_px: u32,
    /// Color distance treated as background by trim and flood fill, percent
    pub fuzz_percent: f64,
    /// Blur sigma the measurement tool applies before trimming
    pub blur_sigma: f64,
    /// Upper bound on candidate angles scored by the deskew search
    pub deskew_effort: u32,
    /// Flood-fill the background to true black before writing
    pub recolor_black: bool,
    /// Worker count, already clamped to [1, half the cores]
    pub jobs: usize,
    /// Case-sensitive extension that marks an input image
    pub extension: String,
    pub out_dir: PathBuf,
    /// Binary invoked for the trim measurement
    pub magick_command: String,
}

impl BatchConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_axis("width", self.crop.left, self.crop.right)?;
        validate_axis("height", self.crop.top, self.crop.bottom)?;

        if !(0.0..=100.0).contains(&self.fuzz_percent) {
            return Err(ConfigError::InvalidFuzz(self.fuzz_percent));
        }
        if self.blur_sigma < 0.0 {
            return Err(ConfigError::InvalidBlurSigma(self.blur_sigma));
        }

        if !self.out_dir.exists() {
            return Err(ConfigError::OutputDirMissing(self.out_dir.clone()));
        }
        if !self.out_dir.is_dir() {
            return Err(ConfigError::NotADirectory(self.out_dir.clone()));
        }

        Ok(())
    }
}

fn validate_axis(axis: &'static str, first: f64, second: f64) -> ConfigResult<()> {
    let in_range = (0.0..1.0).contains(&first) && (0.0..1.0).contains(&second);
    if !in_range || first + second >= 1.0 {
        return Err(ConfigError::CropTooAggressive {
            axis,
            first,
            second,
        });
    }
    Ok(())
}

/// How many images to process in parallel.
///
/// The pixel operations are internally parallel, so one worker per core
/// oversubscribes the machine; half the detected cores is the ceiling.
/// Zero asks for the default, anything out of range is clamped, never
/// rejected.
pub fn clamp_jobs(requested: i64, cores: usize) -> usize {
    let max_jobs = (cores / 2).max(1);
    if requested == 0 {
        max_jobs
    } else if requested < 0 {
        1
    } else {
        (requested as usize).min(max_jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_crop(crop: CropFractions, out_dir: PathBuf) -> BatchConfig {
        BatchConfig {
            rotation: RotationDirection::CounterClockwise,
            background: BackgroundColor::Gray,
            crop,
            border_px: 100,
            padding_px: 30,
            fuzz_percent: 12.0,
            blur_sigma: 30.0,
            deskew_effort: 10_000,
            recolor_black: false,
            jobs: 2,
            extension: ".JPG".to_string(),
            out_dir,
            magick_command: "magick".to_string(),
        }
    }

    #[test]
    fn accepts_reasonable_fractions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_crop(
            CropFractions::symmetric(0.1, 0.1),
            dir.path().to_path_buf(),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_fractions_that_leave_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_crop(
            CropFractions::symmetric(0.5, 0.1),
            dir.path().to_path_buf(),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CropTooAggressive { axis: "height", .. })
        ));
    }

    #[test]
    fn rejects_negative_fractions() {
        let dir = tempfile::tempdir().unwrap();
        let mut crop = CropFractions::symmetric(0.1, 0.1);
        crop.left = -0.2;
        let config = config_with_crop(crop, dir.path().to_path_buf());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fuzz_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_crop(
            CropFractions::symmetric(0.1, 0.1),
            dir.path().to_path_buf(),
        );
        config.fuzz_percent = 130.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFuzz(_))
        ));
    }

    #[test]
    fn rejects_missing_output_dir() {
        let config = config_with_crop(
            CropFractions::symmetric(0.1, 0.1),
            PathBuf::from("/definitely/not/here"),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutputDirMissing(_))
        ));
    }

    #[test]
    fn zero_jobs_picks_the_default() {
        assert_eq!(clamp_jobs(0, 8), 4);
        assert_eq!(clamp_jobs(0, 1), 1);
    }

    #[test]
    fn negative_jobs_clamp_to_one() {
        assert_eq!(clamp_jobs(-3, 8), 1);
    }

    #[test]
    fn oversized_jobs_clamp_to_the_ceiling() {
        assert_eq!(clamp_jobs(64, 8), 4);
        assert_eq!(clamp_jobs(3, 8), 3);
    }
}
