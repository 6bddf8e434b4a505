// Worker pool and batch driver
//
// A fixed set of worker threads drains a bounded queue holding the whole
// batch. One job's failure never stops the others: the worker logs it,
// records the path, and moves on to the next job.

use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, warn};

use crate::core::config::BatchConfig;
use crate::core::types::{BatchReport, JobStatus};
use crate::pipeline::process_scan;
use crate::services::measure::TrimMeasurer;

/// Batches smaller than this run without a progress bar
const MIN_JOBS_FOR_PROGRESS: usize = 10;

pub struct BatchRunner {
    config: Arc<BatchConfig>,
    measurer: Arc<dyn TrimMeasurer>,
}

impl BatchRunner {
    pub fn new(config: Arc<BatchConfig>, measurer: Arc<dyn TrimMeasurer>) -> Self {
        Self { config, measurer }
    }

    /// Process every job exactly once with `config.jobs` workers.
    ///
    /// Workers are started before the queue is seeded; the queue is sized to
    /// the batch, so seeding never blocks. The call returns once every
    /// worker has drained the queue and exited.
    pub fn run(&self, jobs: Vec<PathBuf>) -> BatchReport {
        let total = jobs.len();
        let (sender, receiver) = channel::bounded::<PathBuf>(total.max(1));
        let failures: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let processed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let progress = progress_bar(total);

        let mut workers = Vec::with_capacity(self.config.jobs);
        for _ in 0..self.config.jobs {
            let receiver = receiver.clone();
            let config = Arc::clone(&self.config);
            let measurer = Arc::clone(&self.measurer);
            let failures = Arc::clone(&failures);
            let processed = Arc::clone(&processed);
            let skipped = Arc::clone(&skipped);
            let progress = progress.clone();

            workers.push(thread::spawn(move || {
                for job in receiver.iter() {
                    match process_scan(&job, &config, measurer.as_ref()) {
                        Ok(JobStatus::Processed) => {
                            processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(JobStatus::Skipped) => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!("{}: {e}", job.display());
                            failures.lock().push(job);
                        }
                    }
                    progress.inc(1);
                }
            }));
        }
        drop(receiver);

        for job in jobs {
            if sender.send(job).is_err() {
                // Only possible if every worker already exited
                error!("all workers exited early, abandoning the rest of the queue");
                break;
            }
        }
        drop(sender);

        for worker in workers {
            if worker.join().is_err() {
                // A panicking worker loses only its in-flight job
                warn!("a worker thread panicked; its current job was lost");
            }
        }
        progress.finish();

        let failures = std::mem::take(&mut *failures.lock());
        BatchReport {
            total,
            processed: processed.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
            failures,
        }
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    if total < MIN_JOBS_FOR_PROGRESS {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{wide_bar} {pos}/{len} ({eta} left)")
            .expect("static progress template"),
    );
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BackgroundColor, BatchConfig, CropFractions, RotationDirection};
    use crate::core::errors::MeasureResult;
    use crate::core::types::TrimGeometry;
    use crate::services::canvas::ScanCanvas;
    use image::RgbImage;
    use std::collections::BTreeSet;
    use std::path::Path;

    struct InteriorMeasurer;

    impl TrimMeasurer for InteriorMeasurer {
        fn measure(&self, canvas: &ScanCanvas) -> MeasureResult<TrimGeometry> {
            Ok(TrimGeometry {
                width: canvas.width() - 4,
                height: canvas.height() - 4,
                x: 2,
                y: 2,
            })
        }
    }

    fn test_config(out_dir: &Path, jobs: usize) -> BatchConfig {
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
            jobs,
            extension: ".JPG".to_string(),
            out_dir: out_dir.to_path_buf(),
            magick_command: "magick".to_string(),
        }
    }

    /// Five readable scans plus one file that is not an image at all.
    fn seed_inputs(dir: &Path) -> Vec<PathBuf> {
        let mut inputs = Vec::new();
        for i in 0..5 {
            let path = dir.join(format!("scan-{i}.JPG"));
            RgbImage::from_pixel(64, 48, BackgroundColor::Gray.rgb())
                .save(&path)
                .unwrap();
            inputs.push(path);
        }
        let broken = dir.join("broken.JPG");
        std::fs::write(&broken, b"definitely not a JPEG").unwrap();
        inputs.push(broken);
        inputs
    }

    fn output_names(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn one_failure_does_not_stop_the_batch() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let inputs = seed_inputs(in_dir.path());

        let runner = BatchRunner::new(
            Arc::new(test_config(out_dir.path(), 3)),
            Arc::new(InteriorMeasurer),
        );
        let report = runner.run(inputs);

        assert_eq!(report.total, 6);
        assert_eq!(report.processed, 5);
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.failures[0].file_name().unwrap().to_string_lossy(),
            "broken.JPG"
        );
        assert_eq!(output_names(out_dir.path()).len(), 5);
    }

    #[test]
    fn worker_count_does_not_change_the_outcome() {
        let in_dir = tempfile::tempdir().unwrap();
        let inputs = seed_inputs(in_dir.path());

        let mut outcomes = Vec::new();
        for jobs in [1, 2, 8] {
            let out_dir = tempfile::tempdir().unwrap();
            let runner = BatchRunner::new(
                Arc::new(test_config(out_dir.path(), jobs)),
                Arc::new(InteriorMeasurer),
            );
            let report = runner.run(inputs.clone());

            let mut failed: Vec<String> = report
                .failures
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            failed.sort();
            outcomes.push((report.processed, failed, output_names(out_dir.path())));
        }

        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(outcomes[1], outcomes[2]);
    }

    #[test]
    fn rerun_skips_existing_outputs() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let inputs = seed_inputs(in_dir.path());

        let config = Arc::new(test_config(out_dir.path(), 2));
        let runner = BatchRunner::new(Arc::clone(&config), Arc::new(InteriorMeasurer));

        let first = runner.run(inputs.clone());
        assert_eq!(first.processed, 5);
        assert_eq!(first.skipped, 0);

        let second = runner.run(inputs);
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 5);
        assert_eq!(second.failed(), 1);
    }

    #[test]
    fn empty_batch_finishes_immediately() {
        let out_dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(
            Arc::new(test_config(out_dir.path(), 2)),
            Arc::new(InteriorMeasurer),
        );
        let report = runner.run(Vec::new());
        assert_eq!(report.total, 0);
        assert_eq!(report.processed, 0);
        assert!(report.failures.is_empty());
    }
}
