// The per-image transformation pipeline
//
// A fixed sequence tuned for photographs of schedules shot on a colored
// scanning table. Each step is a hard precondition for the next; any
// failure aborts this job only and leaves no partial output behind.

use std::path::Path;
use tracing::debug;

use crate::core::config::{BatchConfig, TRUE_BLACK};
use crate::core::errors::PipelineResult;
use crate::core::types::JobStatus;
use crate::services::canvas::ScanCanvas;
use crate::services::measure::TrimMeasurer;
use crate::utils::paths::output_path;

/// Process one scanned photograph end to end.
///
/// Re-running a batch over a partially completed output directory is safe
/// and cheap: finished outputs are skipped outright.
pub fn process_scan(
    input: &Path,
    config: &BatchConfig,
    measurer: &dyn TrimMeasurer,
) -> PipelineResult<JobStatus> {
    let output = output_path(input, &config.out_dir)?;
    if output.exists() {
        debug!("skipping {}: output already exists", input.display());
        return Ok(JobStatus::Skipped);
    }

    // The declared background drives the border, the deskew fill, the trim
    // measurement, and the optional flood fill.
    let mut canvas = ScanCanvas::open(input, config.background.rgb())?;

    canvas.rotate(config.rotation);

    // Lop off as much of each edge as can safely be taken as a fraction, so
    // the auto-trim is not asked to reach across the gradient-shaded corners.
    canvas.crop_fractions(&config.crop)?;

    // A uniform margin guarantees the corner pixels the trim measurement
    // keys on are exactly the background color.
    canvas.add_border(config.border_px);

    // The measurement tool reports buffer coordinates; the crop and border
    // above left the page origin stale.
    canvas.repage();

    canvas.deskew(config.deskew_effort);

    let geometry = measurer.measure(&canvas)?;
    canvas.crop_rect(geometry.padded(config.padding_px))?;

    if config.recolor_black {
        canvas.recolor_background(TRUE_BLACK, config.fuzz_percent);
    }

    canvas.write_jpeg_atomic(&output)?;
    debug!("wrote {}", output.display());
    Ok(JobStatus::Processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BackgroundColor, CropFractions, RotationDirection};
    use crate::core::errors::{MeasureResult, PipelineError};
    use crate::core::types::TrimGeometry;
    use image::RgbImage;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports the canvas interior, inset by a fixed margin, and counts how
    /// often it was asked.
    struct StubMeasurer {
        calls: AtomicUsize,
    }

    impl StubMeasurer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TrimMeasurer for StubMeasurer {
        fn measure(&self, canvas: &ScanCanvas) -> MeasureResult<TrimGeometry> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TrimGeometry {
                width: canvas.width() - 4,
                height: canvas.height() - 4,
                x: 2,
                y: 2,
            })
        }
    }

    fn test_config(out_dir: PathBuf) -> BatchConfig {
        BatchConfig {
            rotation: RotationDirection::CounterClockwise,
            background: BackgroundColor::Gray,
            crop: CropFractions::symmetric(0.1, 0.1),
            border_px: 8,
            padding_px: 2,
            fuzz_percent: 12.0,
            blur_sigma: 30.0,
            deskew_effort: 50,
            recolor_black: false,
            jobs: 1,
            extension: ".JPG".to_string(),
            out_dir,
            magick_command: "magick".to_string(),
        }
    }

    fn write_input(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let pixels = RgbImage::from_pixel(width, height, BackgroundColor::Gray.rgb());
        pixels.save(&path).unwrap();
        path
    }

    #[test]
    fn second_run_skips_without_measuring() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let input = write_input(in_dir.path(), "scan.JPG", 64, 48);
        let config = test_config(out_dir.path().to_path_buf());
        let measurer = StubMeasurer::new();

        let first = process_scan(&input, &config, &measurer).unwrap();
        assert_eq!(first, JobStatus::Processed);
        assert!(out_dir.path().join("scan.JPG").exists());
        assert_eq!(measurer.calls.load(Ordering::SeqCst), 1);

        let second = process_scan(&input, &config, &measurer).unwrap();
        assert_eq!(second, JobStatus::Skipped);
        assert_eq!(measurer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn output_dimensions_follow_the_step_arithmetic() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let input = write_input(in_dir.path(), "scan.JPG", 64, 48);
        let config = test_config(out_dir.path().to_path_buf());

        process_scan(&input, &config, &StubMeasurer::new()).unwrap();

        // 64x48 rotated to 48x64, fraction-cropped to 38x51, bordered to
        // 54x67; the stub trims 4 off each axis and the padding adds it back
        let written = image::open(out_dir.path().join("scan.JPG")).unwrap();
        assert_eq!(written.width(), 54);
        assert_eq!(written.height(), 67);
    }

    #[test]
    fn unreadable_input_fails_without_leaving_output() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let input = in_dir.path().join("broken.JPG");
        std::fs::write(&input, b"not an image at all").unwrap();
        let config = test_config(out_dir.path().to_path_buf());

        let result = process_scan(&input, &config, &StubMeasurer::new());
        assert!(matches!(result, Err(PipelineError::Load { .. })));
        assert!(!out_dir.path().join("broken.JPG").exists());
        assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn recolor_paints_the_border_true_black() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let input = write_input(in_dir.path(), "scan.JPG", 64, 48);
        let mut config = test_config(out_dir.path().to_path_buf());
        config.recolor_black = true;

        process_scan(&input, &config, &StubMeasurer::new()).unwrap();

        let written = image::open(out_dir.path().join("scan.JPG")).unwrap().to_rgb8();
        let corner = *written.get_pixel(0, 0);
        // JPEG encoding wiggles the values a little
        assert!(corner[0] < 12 && corner[1] < 12 && corner[2] < 12);
    }
}
