pub mod alpha;
pub mod backend;
pub mod batch;
pub mod compress;
pub mod format;
#[cfg(feature = "ai")]
pub mod onnx;
pub mod progress;
pub mod relocate;
pub mod remove_bg;
pub mod resize;

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use strum_macros::Display;

use crate::config_file::{AppConfig, Command, Final2xConfig};
use crate::utils::{expand_inputs, Console};
use backend::select_backend;
use batch::{BatchJob, FileOutcome};
use progress::ProgressObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResultStatus {
    #[strum(serialize = "completed")]
    Completed,
    #[strum(serialize = "skipped")]
    Skipped,
    #[strum(serialize = "failed")]
    Failed,
}

/// What happened to one input of a command
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub status: ResultStatus,
    /// Command-specific note: target format, compression ratio, error text
    pub detail: String,
    pub processing_time: Duration,
}

impl ProcessingResult {
    pub fn new(
        input_path: &Path,
        output_path: Option<PathBuf>,
        status: ResultStatus,
        detail: String,
        start: Instant,
    ) -> Self {
        Self {
            input_path: input_path.to_path_buf(),
            output_path,
            status,
            detail,
            processing_time: start.elapsed(),
        }
    }

    pub fn completed(input_path: &Path, output_path: PathBuf, detail: String, start: Instant) -> Self {
        Self::new(input_path, Some(output_path), ResultStatus::Completed, detail, start)
    }
}

#[derive(Debug, Clone)]
pub struct CommandSummary {
    pub command: Command,
    pub results: Vec<ProcessingResult>,
    pub duration: Duration,
}

impl CommandSummary {
    fn count(&self, status: ResultStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn processed(&self) -> usize {
        self.count(ResultStatus::Completed)
    }

    pub fn skipped(&self) -> usize {
        self.count(ResultStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(ResultStatus::Failed)
    }

    /// Per-file failures only fail the conversion commands; upscale and
    /// relocation batches succeed as long as they complete
    pub fn is_failure(&self) -> bool {
        match self.command {
            Command::Format | Command::Compress | Command::RemoveBg => self.failed() > 0,
            Command::Final2x | Command::SaveFile => false,
        }
    }
}

fn section<'a, T>(section: &'a Option<T>, command: Command) -> Result<&'a T> {
    section
        .as_ref()
        .ok_or_else(|| anyhow!("Missing configuration section for '{}'", command))
}

pub struct ProcessingEngine {
    config: AppConfig,
    console: Console,
}

impl ProcessingEngine {
    /// Validates the configuration up front; nothing is written on failure
    pub fn new(config: AppConfig, console: Console) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, console })
    }

    pub fn command(&self) -> Command {
        self.config.command
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Route the configured command to its processor
    pub fn dispatch(&self, observer: &mut dyn ProgressObserver) -> Result<CommandSummary> {
        let start = Instant::now();
        let command = self.config.command;
        self.console.verbose(&format!("Dispatching command '{}'", command));

        let results = match command {
            Command::Format => {
                format::run(section(&self.config.format_config, command)?, &self.console)?
            }
            Command::Compress => {
                compress::run(section(&self.config.compress_config, command)?, &self.console)?
            }
            Command::RemoveBg => {
                remove_bg::run(section(&self.config.remove_bg_config, command)?, &self.console)?
            }
            Command::Final2x => {
                self.run_final2x(section(&self.config.final2x_config, command)?, observer)?
            }
            Command::SaveFile => {
                relocate::run(section(&self.config.save_file_config, command)?, &self.console)?
            }
        };

        Ok(CommandSummary {
            command,
            results,
            duration: start.elapsed(),
        })
    }

    fn run_final2x(
        &self,
        config: &Final2xConfig,
        observer: &mut dyn ProgressObserver,
    ) -> Result<Vec<ProcessingResult>> {
        let model = config.model()?;
        self.console.info(&format!("Loading model: {}", model.describe()));

        let mut backend = select_backend(config.backend, &model)?;
        let model_scale = backend.native_scale();
        let target_scale = config.effective_target_scale(model_scale);
        self.console.verbose(&format!(
            "Backend: {}, model scale: {}, target scale: {}",
            backend.name(),
            model_scale,
            batch::format_scale(target_scale)
        ));

        let job = BatchJob::new(
            expand_inputs(&config.base.input_path)?,
            config.base.output_path.clone(),
            target_scale,
            model_scale as f64,
        )?;
        let report = batch::run(&job, backend.as_mut(), observer)?;

        let results = report
            .files
            .into_iter()
            .map(|file| {
                let (output_path, status, detail) = match file.outcome {
                    FileOutcome::Processed {
                        output_path,
                        channels,
                        ..
                    } => (
                        Some(output_path),
                        ResultStatus::Completed,
                        format!("{} channel(s)", channels),
                    ),
                    FileOutcome::SkippedMissing => {
                        (None, ResultStatus::Skipped, "file does not exist".to_string())
                    }
                    FileOutcome::SkippedDecode { reason } => (None, ResultStatus::Skipped, reason),
                    FileOutcome::Failed { reason } => (None, ResultStatus::Failed, reason),
                };

                ProcessingResult {
                    input_path: file.input_path,
                    output_path,
                    status,
                    detail,
                    processing_time: file.elapsed,
                }
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};
    use progress::BatchEvent;
    use tempfile::TempDir;

    fn engine(json: serde_json::Value) -> Result<ProcessingEngine> {
        let config: AppConfig = serde_json::from_value(json)?;
        ProcessingEngine::new(config, Console::new(false, true))
    }

    #[test]
    fn test_invalid_config_is_rejected_before_dispatch() {
        let dir = TempDir::new().unwrap();
        let result = engine(serde_json::json!({
            "command": "compress",
            "compressConfig": {
                "input_path": [dir.path().join("nope.png")],
                "output_path": dir.path(),
                "target_format": "jpg",
                "quality": 50,
            }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_final2x_dispatch() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("tiny.png");
        RgbImage::from_pixel(4, 3, Rgb([80, 120, 160])).save(&input).unwrap();
        let out = dir.path().join("out");

        let engine = engine(serde_json::json!({
            "command": "final2x",
            "final2xConfig": {
                "input_path": [input, dir.path().join("missing.png")],
                "output_path": out,
                "pretrained_model_name": "bilinear",
                "device": "cpu",
                "model_scale": 2,
            }
        }))
        .unwrap();

        let mut events = Vec::new();
        let summary = {
            let mut observer = |event: &BatchEvent| events.push(event.clone());
            engine.dispatch(&mut observer).unwrap()
        };

        assert_eq!(summary.processed(), 1);
        assert_eq!(summary.skipped(), 1);
        assert!(!summary.is_failure());

        let written = out.join("outputs").join("2.0x-tiny.png");
        assert_eq!(image::open(written).unwrap().dimensions(), (8, 6));
        assert!(matches!(events.last(), Some(BatchEvent::Finished { .. })));
    }

    #[test]
    fn test_target_scale_defaults_to_model_scale() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("tiny.png");
        RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])).save(&input).unwrap();

        let engine = engine(serde_json::json!({
            "command": "final2x",
            "final2xConfig": {
                "input_path": [input],
                "output_path": dir.path(),
                "pretrained_model_name": "lanczos3",
                "model_scale": 4,
                "target_scale": -1.0,
            }
        }))
        .unwrap();

        let mut observer = |_: &BatchEvent| {};
        engine.dispatch(&mut observer).unwrap();
        assert!(dir.path().join("outputs").join("4.0x-tiny.png").exists());
    }

    #[test]
    fn test_format_failure_fails_command() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"nope").unwrap();

        let engine = engine(serde_json::json!({
            "command": "format",
            "formatConfig": {
                "input_path": [bad],
                "output_path": dir.path(),
                "target_format": "bmp",
            }
        }))
        .unwrap();

        let mut observer = |_: &BatchEvent| {};
        let summary = engine.dispatch(&mut observer).unwrap();
        assert_eq!(summary.failed(), 1);
        assert!(summary.is_failure());
    }
}
