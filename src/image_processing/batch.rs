//! Super-resolution batch processor.
//!
//! Files are processed strictly in order, one inference call at a time. Per-file
//! problems become a [`FileOutcome`] and never abort the batch; only setup
//! failures (output directory) are returned as errors.

use anyhow::{bail, Context, Result};
use fast_image_resize::FilterType;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::alpha::{merge, replicate, split_channels};
use super::backend::UpscaleBackend;
use super::progress::{BatchEvent, ProgressCounter, ProgressObserver};
use super::resize::{needs_rescale, resize_rgb, target_dimensions};
use crate::utils::write_atomic;

pub const OUTPUT_SUBDIR: &str = "outputs";

/// Inference calls a file costs before its channels are known
const UNITS_PER_FILE: u64 = 1;

/// Immutable description of one upscale batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    input_paths: Vec<PathBuf>,
    output_dir: PathBuf,
    target_scale: f64,
    model_scale: f64,
}

impl BatchJob {
    pub fn new(
        input_paths: Vec<PathBuf>,
        output_dir: PathBuf,
        target_scale: f64,
        model_scale: f64,
    ) -> Result<Self> {
        if !target_scale.is_finite() || target_scale <= 0.0 {
            bail!("Target scale must be a positive number, got {}", target_scale);
        }
        if !model_scale.is_finite() || model_scale <= 0.0 {
            bail!("Model scale must be a positive number, got {}", model_scale);
        }

        Ok(Self {
            input_paths,
            output_dir,
            target_scale,
            model_scale,
        })
    }

    pub fn input_paths(&self) -> &[PathBuf] {
        &self.input_paths
    }

    pub fn target_scale(&self) -> f64 {
        self.target_scale
    }

    pub fn model_scale(&self) -> f64 {
        self.model_scale
    }

    /// Directory the PNGs are written to
    pub fn outputs_dir(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_SUBDIR)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed {
        output_path: PathBuf,
        /// Channel count of the decoded source
        channels: u8,
        units: u64,
    },
    SkippedMissing,
    SkippedDecode {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl FileOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, FileOutcome::Processed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            FileOutcome::SkippedMissing | FileOutcome::SkippedDecode { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub input_path: PathBuf,
    pub outcome: FileOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub progress: ProgressCounter,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_processed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Failed { .. }))
            .count()
    }
}

/// Render a scale the way output names carry it: `2.0`, `1.5`, `4.0`
pub fn format_scale(scale: f64) -> String {
    if scale.fract() == 0.0 {
        format!("{:.1}", scale)
    } else {
        format!("{}", scale)
    }
}

fn output_base(input_path: &Path, scale: f64) -> String {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}x-{}", format_scale(scale), stem)
}

/// First free `{scale}x-{stem}[(n)].png` in `dir`
pub fn resolve_output_path(dir: &Path, input_path: &Path, scale: f64) -> PathBuf {
    let base = output_base(input_path, scale);

    let mut candidate = dir.join(format!("{}.png", base));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}({}).png", base, n));
        n += 1;
    }
    candidate
}

/// Encode as PNG next to `path`, then move into place without replacing anything
fn write_png_atomic(img: &DynamicImage, path: &Path) -> Result<()> {
    write_atomic(path, |writer| Ok(img.write_with_encoder(PngEncoder::new(writer))?))
}

/// Units a single file has been charged and has consumed so far
#[derive(Debug, Default)]
struct FileUnits {
    expected: u64,
    done: u64,
}

struct BatchRunner<'a> {
    job: &'a BatchJob,
    output_dir: PathBuf,
    backend: &'a mut dyn UpscaleBackend,
    observer: &'a mut dyn ProgressObserver,
    counter: ProgressCounter,
}

impl<'a> BatchRunner<'a> {
    fn advance(&mut self) {
        let percentage = self.counter.advance();
        self.observer
            .on_event(&BatchEvent::progress(&self.counter, percentage));
    }

    fn consume(&mut self, units: &mut FileUnits) {
        units.done += 1;
        self.advance();
    }

    fn skip(&mut self) {
        for _ in 0..self.counter.units_per_file() {
            self.advance();
        }
    }

    fn process_file(&mut self, input_path: &Path) -> FileOutcome {
        if !input_path.exists() {
            self.skip();
            return FileOutcome::SkippedMissing;
        }

        let decoded = fs::read(input_path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| image::load_from_memory(&bytes).map_err(anyhow::Error::from));
        let img = match decoded {
            Ok(img) => img,
            Err(e) => {
                self.skip();
                return FileOutcome::SkippedDecode {
                    reason: format!("{:#}", e),
                };
            }
        };

        let mut units = FileUnits {
            expected: self.counter.units_per_file(),
            done: 0,
        };
        match self.upscale_file(input_path, img, &mut units) {
            Ok((output_path, channels)) => FileOutcome::Processed {
                output_path,
                channels,
                units: units.expected,
            },
            Err(e) => {
                while units.done < units.expected {
                    self.consume(&mut units);
                }
                FileOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    fn upscale_file(
        &mut self,
        input_path: &Path,
        img: DynamicImage,
        units: &mut FileUnits,
    ) -> Result<(PathBuf, u8)> {
        let split = split_channels(img);
        let original = split.rgb.dimensions();

        if split.is_grayscale() {
            self.observer.on_event(&BatchEvent::Notice {
                path: input_path.to_path_buf(),
                message: "Converted grayscale image to RGB".to_string(),
            });
        }
        if split.has_alpha() {
            self.counter.grow(1);
            units.expected += 1;
        }

        let rgb = self.upscale_pass(&split.rgb, original)?;
        self.consume(units);

        let output = match &split.alpha {
            Some(alpha) => {
                let alpha_rgb = self.upscale_pass(&replicate(alpha), original)?;
                self.consume(units);
                DynamicImage::ImageRgba8(merge(&rgb, &alpha_rgb)?)
            }
            None => DynamicImage::ImageRgb8(rgb),
        };

        let output_path = resolve_output_path(&self.output_dir, input_path, self.job.target_scale);
        let first_choice = self
            .output_dir
            .join(format!("{}.png", output_base(input_path, self.job.target_scale)));
        if output_path != first_choice {
            self.observer.on_event(&BatchEvent::Notice {
                path: input_path.to_path_buf(),
                message: format!(
                    "{} exists, writing {}",
                    first_choice.display(),
                    output_path.display()
                ),
            });
        }

        write_png_atomic(&output, &output_path)?;
        Ok((output_path, split.source_channels))
    }

    /// One inference call, then resize to the target scale when it differs
    /// from what the model produces natively
    fn upscale_pass(&mut self, img: &RgbImage, original: (u32, u32)) -> Result<RgbImage> {
        let upscaled = self.backend.run(img)?;

        if needs_rescale(self.job.target_scale, self.job.model_scale) {
            let (width, height) = target_dimensions(original, self.job.target_scale);
            resize_rgb(&upscaled, width, height, FilterType::Bilinear)
        } else {
            Ok(upscaled)
        }
    }
}

/// Upscale every file of `job` with `backend`, reporting to `observer`
pub fn run(
    job: &BatchJob,
    backend: &mut dyn UpscaleBackend,
    observer: &mut dyn ProgressObserver,
) -> Result<BatchReport> {
    let output_dir = job.outputs_dir();
    fs::create_dir_all(&output_dir).with_context(|| {
        format!("Failed to create output directory: {}", output_dir.display())
    })?;

    let counter = ProgressCounter::new(job.input_paths.len() as u64, UNITS_PER_FILE);
    observer.on_event(&BatchEvent::Started {
        total_files: job.input_paths.len(),
        total_units: counter.total_units(),
    });

    let mut runner = BatchRunner {
        job,
        output_dir,
        backend,
        observer,
        counter,
    };
    let percentage = runner.counter.report();
    runner
        .observer
        .on_event(&BatchEvent::progress(&runner.counter, percentage));

    let mut files = Vec::with_capacity(job.input_paths.len());
    for input_path in &job.input_paths {
        let start = Instant::now();
        let outcome = runner.process_file(input_path);
        let elapsed = start.elapsed();

        let event = match &outcome {
            FileOutcome::Processed { output_path, .. } => BatchEvent::FileProcessed {
                input_path: input_path.clone(),
                output_path: output_path.clone(),
                elapsed_ms: elapsed.as_millis(),
            },
            FileOutcome::SkippedMissing => BatchEvent::FileSkipped {
                input_path: input_path.clone(),
                reason: "File does not exist".to_string(),
            },
            FileOutcome::SkippedDecode { reason } => BatchEvent::FileSkipped {
                input_path: input_path.clone(),
                reason: format!("Failed to decode image: {}", reason),
            },
            FileOutcome::Failed { reason } => BatchEvent::FileFailed {
                input_path: input_path.clone(),
                error: reason.clone(),
            },
        };
        runner.observer.on_event(&event);

        files.push(FileReport {
            input_path: input_path.clone(),
            outcome,
            elapsed,
        });
    }

    let report = BatchReport {
        files,
        progress: runner.counter,
    };
    runner.observer.on_event(&BatchEvent::Finished {
        processed: report.processed(),
        skipped: report.skipped(),
        failed: report.failed(),
        percentage: report.progress.last_reported(),
    });

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::backend::scaled_dimensions;
    use image::imageops::{self, FilterType as NearestFilter};
    use image::{GenericImageView, GrayImage, Luma, Rgb, Rgba, RgbaImage};
    use tempfile::TempDir;

    /// Deterministic backend: nearest-neighbour by an integer factor
    struct NearestUpscaler {
        scale: u32,
        calls: usize,
    }

    impl NearestUpscaler {
        fn new(scale: u32) -> Self {
            Self { scale, calls: 0 }
        }
    }

    impl UpscaleBackend for NearestUpscaler {
        fn name(&self) -> &'static str {
            "nearest"
        }

        fn native_scale(&self) -> u32 {
            self.scale
        }

        fn run(&mut self, img: &RgbImage) -> Result<RgbImage> {
            self.calls += 1;
            let (width, height) = scaled_dimensions(img.dimensions(), self.scale)?;
            Ok(imageops::resize(img, width, height, NearestFilter::Nearest))
        }
    }

    struct BrokenUpscaler;

    impl UpscaleBackend for BrokenUpscaler {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn native_scale(&self) -> u32 {
            2
        }

        fn run(&mut self, _img: &RgbImage) -> Result<RgbImage> {
            bail!("inference exploded")
        }
    }

    fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
        let gray = dir.join("grayscale.jpg");
        GrayImage::from_fn(6, 4, |x, y| Luma([(x * 30 + y * 10) as u8]))
            .save(&gray)
            .unwrap();

        let rgba = dir.join("rgba.png");
        RgbaImage::from_fn(5, 3, |x, y| Rgba([200, (y * 60) as u8, 40, (x * 50) as u8]))
            .save(&rgba)
            .unwrap();

        (gray, rgba)
    }

    fn run_collecting(
        job: &BatchJob,
        backend: &mut dyn UpscaleBackend,
    ) -> (BatchReport, Vec<BatchEvent>) {
        let mut events = Vec::new();
        let report = {
            let mut observer = |event: &BatchEvent| events.push(event.clone());
            run(job, backend, &mut observer).unwrap()
        };
        (report, events)
    }

    fn percentages(events: &[BatchEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { percentage, .. } => Some(*percentage),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_job_rejects_bad_scales() {
        let out = PathBuf::from("/tmp/out");
        assert!(BatchJob::new(vec![], out.clone(), 0.0, 2.0).is_err());
        assert!(BatchJob::new(vec![], out.clone(), 2.0, -1.0).is_err());
        assert!(BatchJob::new(vec![], out.clone(), f64::NAN, 2.0).is_err());
        assert!(BatchJob::new(vec![], out, 2.0, 2.0).is_ok());
    }

    #[test]
    fn test_format_scale() {
        assert_eq!(format_scale(2.0), "2.0");
        assert_eq!(format_scale(4.0), "4.0");
        assert_eq!(format_scale(1.5), "1.5");
        assert_eq!(format_scale(0.25), "0.25");
    }

    #[test]
    fn test_mixed_scenario() {
        let dir = TempDir::new().unwrap();
        let (gray, rgba) = write_fixtures(dir.path());
        let missing = dir.path().join("missing.png");

        let job = BatchJob::new(
            vec![missing, gray, rgba],
            dir.path().join("out"),
            2.0,
            2.0,
        )
        .unwrap();
        let mut backend = NearestUpscaler::new(2);
        let (report, events) = run_collecting(&job, &mut backend);

        assert_eq!(report.files[0].outcome, FileOutcome::SkippedMissing);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(backend.calls, 3);

        let outputs = job.outputs_dir();
        let gray_out = image::open(outputs.join("2.0x-grayscale.png")).unwrap();
        assert_eq!(gray_out.dimensions(), (12, 8));
        assert!(!gray_out.color().has_alpha());

        let rgba_out = image::open(outputs.join("2.0x-rgba.png")).unwrap();
        assert_eq!(rgba_out.dimensions(), (10, 6));
        assert!(rgba_out.color().has_alpha());

        // 1 (skip) + 1 (gray) + 2 (rgba with alpha pass)
        assert_eq!(report.progress.total_units(), 4);
        assert_eq!(report.progress.completed_units(), 4);

        let pcts = percentages(&events);
        assert_eq!(pcts.first(), Some(&0.0));
        assert_eq!(pcts.last(), Some(&100.0));
        assert!(pcts.windows(2).all(|w| w[0] <= w[1]));

        assert!(matches!(events.first(), Some(BatchEvent::Started { total_units: 3, .. })));
        assert!(matches!(
            events.last(),
            Some(BatchEvent::Finished {
                processed: 2,
                skipped: 1,
                failed: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_collision_and_no_overwrite() {
        let dir = TempDir::new().unwrap();
        let (_, rgba) = write_fixtures(dir.path());
        let job = BatchJob::new(vec![rgba], dir.path().to_path_buf(), 2.0, 2.0).unwrap();

        let (first, _) = run_collecting(&job, &mut NearestUpscaler::new(2));
        let first_path = job.outputs_dir().join("2.0x-rgba.png");
        let first_bytes = fs::read(&first_path).unwrap();

        let (second, events) = run_collecting(&job, &mut NearestUpscaler::new(2));
        let second_path = job.outputs_dir().join("2.0x-rgba(1).png");

        assert!(matches!(
            &first.files[0].outcome,
            FileOutcome::Processed { output_path, .. } if *output_path == first_path
        ));
        assert!(matches!(
            &second.files[0].outcome,
            FileOutcome::Processed { output_path, .. } if *output_path == second_path
        ));
        assert_eq!(fs::read(&first_path).unwrap(), first_bytes);
        assert!(events
            .iter()
            .any(|e| matches!(e, BatchEvent::Notice { message, .. } if message.contains("exists"))));

        run_collecting(&job, &mut NearestUpscaler::new(2));
        assert!(job.outputs_dir().join("2.0x-rgba(2).png").exists());
    }

    #[test]
    fn test_scale_law() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("photo.png");
        RgbImage::from_pixel(5, 3, Rgb([10, 20, 30])).save(&input).unwrap();

        // |T - M| > tolerance: exact ceil(w * T)
        let job = BatchJob::new(vec![input.clone()], dir.path().to_path_buf(), 1.5, 2.0).unwrap();
        run_collecting(&job, &mut NearestUpscaler::new(2));
        let out = image::open(job.outputs_dir().join("1.5x-photo.png")).unwrap();
        assert_eq!(out.dimensions(), (8, 5));

        let job = BatchJob::new(vec![input.clone()], dir.path().to_path_buf(), 3.0, 2.0).unwrap();
        run_collecting(&job, &mut NearestUpscaler::new(2));
        let out = image::open(job.outputs_dir().join("3.0x-photo.png")).unwrap();
        assert_eq!(out.dimensions(), (15, 9));

        // Within tolerance: native model output is kept
        let job = BatchJob::new(vec![input], dir.path().to_path_buf(), 4.0005, 4.0).unwrap();
        run_collecting(&job, &mut NearestUpscaler::new(4));
        let out = image::open(job.outputs_dir().join("4.0005x-photo.png")).unwrap();
        assert_eq!(out.dimensions(), (20, 12));
    }

    #[test]
    fn test_alpha_ordering_preserved() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("fade.png");
        RgbaImage::from_fn(6, 2, |x, _| Rgba([50, 50, 50, (x * 40) as u8]))
            .save(&input)
            .unwrap();

        let job = BatchJob::new(vec![input], dir.path().to_path_buf(), 2.0, 2.0).unwrap();
        run_collecting(&job, &mut NearestUpscaler::new(2));

        let out = image::open(job.outputs_dir().join("2.0x-fade.png"))
            .unwrap()
            .to_rgba8();
        let row: Vec<u8> = (0..12).map(|x| out.get_pixel(x, 1)[3]).collect();
        assert!(row.windows(2).all(|w| w[0] <= w[1]));
        assert!(row[0] < row[11]);
    }

    #[test]
    fn test_gray_alpha_costs_two_units() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("la.png");
        image::GrayAlphaImage::from_pixel(3, 3, image::LumaA([100, 200]))
            .save(&input)
            .unwrap();

        let job = BatchJob::new(vec![input], dir.path().to_path_buf(), 2.0, 2.0).unwrap();
        let (report, _) = run_collecting(&job, &mut NearestUpscaler::new(2));

        assert!(matches!(
            report.files[0].outcome,
            FileOutcome::Processed {
                channels: 2,
                units: 2,
                ..
            }
        ));
        assert_eq!(report.progress.completed_units(), 2);
        assert_eq!(report.progress.total_units(), 2);
    }

    #[test]
    fn test_decode_by_content_and_undecodable() {
        let dir = TempDir::new().unwrap();
        // PNG bytes behind a misleading extension
        let disguised = dir.path().join("disguised.jpg");
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        fs::write(&disguised, bytes).unwrap();

        let garbage = dir.path().join("garbage.png");
        fs::write(&garbage, b"definitely not pixels").unwrap();

        let job = BatchJob::new(vec![disguised, garbage], dir.path().to_path_buf(), 2.0, 2.0)
            .unwrap();
        let (report, _) = run_collecting(&job, &mut NearestUpscaler::new(2));

        assert!(report.files[0].outcome.is_processed());
        assert!(matches!(
            report.files[1].outcome,
            FileOutcome::SkippedDecode { .. }
        ));
        assert_eq!(report.progress.completed_units(), report.progress.total_units());
    }

    #[test]
    fn test_backend_failure_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let (_, rgba) = write_fixtures(dir.path());

        let job = BatchJob::new(vec![rgba], dir.path().to_path_buf(), 2.0, 2.0).unwrap();
        let (report, events) = run_collecting(&job, &mut BrokenUpscaler);

        assert!(matches!(
            &report.files[0].outcome,
            FileOutcome::Failed { reason } if reason.contains("inference exploded")
        ));
        assert_eq!(report.progress.total_units(), 2);
        assert_eq!(report.progress.completed_units(), 2);
        assert_eq!(percentages(&events).last(), Some(&100.0));
        assert_eq!(fs::read_dir(job.outputs_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_overflowing_scale_fails_only_that_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("wide.png");
        RgbImage::from_pixel(4, 1, Rgb([5, 5, 5])).save(&input).unwrap();

        let job = BatchJob::new(
            vec![input.clone(), dir.path().join("missing.png")],
            dir.path().to_path_buf(),
            2.0,
            2.0,
        )
        .unwrap();
        let (report, _) = run_collecting(&job, &mut NearestUpscaler::new(u32::MAX / 2));

        assert!(matches!(
            &report.files[0].outcome,
            FileOutcome::Failed { reason } if reason.contains("too large")
        ));
        assert_eq!(report.files[1].outcome, FileOutcome::SkippedMissing);
        assert_eq!(report.progress.completed_units(), report.progress.total_units());
    }

    #[test]
    fn test_empty_batch() {
        let dir = TempDir::new().unwrap();
        let job = BatchJob::new(vec![], dir.path().to_path_buf(), 2.0, 2.0).unwrap();
        let (report, _) = run_collecting(&job, &mut NearestUpscaler::new(2));

        assert!(report.files.is_empty());
        assert_eq!(report.progress.total_units(), 0);
        assert!(job.outputs_dir().is_dir());
    }

    #[test]
    fn test_unwritable_output_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let job = BatchJob::new(vec![], blocker, 2.0, 2.0).unwrap();
        let mut observer = |_: &BatchEvent| {};
        assert!(run(&job, &mut NearestUpscaler::new(2), &mut observer).is_err());
    }
}
