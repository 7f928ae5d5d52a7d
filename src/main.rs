use anyhow::{bail, Context, Result};
use clap::Parser;
use console::style;
use indicatif::ProgressBar;

use picforge::cli::Args;
use picforge::config_file::AppConfig;
use picforge::image_processing::progress::{BatchEvent, ProgressObserver};
use picforge::image_processing::{CommandSummary, ProcessingEngine};
use picforge::json_output::{JsonMessage, LogLevel};
use picforge::report;
use picforge::utils::{create_progress_bar, format_duration, Console};

/// Drives the terminal (progress bar + styled lines) or JSON lines from batch events
struct CliObserver {
    console: Console,
    command: String,
    progress: Option<ProgressBar>,
}

impl CliObserver {
    fn new(console: Console, command: String) -> Self {
        Self {
            console,
            command,
            progress: None,
        }
    }

    /// Print without tearing the progress bar
    fn print(&self, f: impl FnOnce()) {
        match &self.progress {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }
}

impl ProgressObserver for CliObserver {
    fn on_event(&mut self, event: &BatchEvent) {
        let console = self.console;

        if console.json {
            match event {
                BatchEvent::Started {
                    total_files,
                    total_units,
                } => JsonMessage::started(self.command.as_str(), *total_files, *total_units),
                BatchEvent::Progress {
                    percentage,
                    completed,
                    total,
                } => JsonMessage::progress(*percentage, *completed, *total),
                BatchEvent::Notice { path, message } => console.verbose(&format!(
                    "{}: {}",
                    path.display(),
                    message
                )),
                BatchEvent::FileProcessed {
                    input_path,
                    output_path,
                    elapsed_ms,
                } => JsonMessage::file_completed(input_path, output_path, *elapsed_ms),
                BatchEvent::FileSkipped { input_path, reason } => {
                    JsonMessage::file_skipped(input_path, reason.as_str())
                }
                BatchEvent::FileFailed { input_path, error } => {
                    JsonMessage::file_failed(input_path, error.as_str())
                }
                BatchEvent::Finished { .. } => {}
            }
            return;
        }

        match event {
            BatchEvent::Started {
                total_files,
                total_units,
            } => {
                console.info(&format!(
                    "Upscaling {} file(s), {} inference unit(s) planned",
                    total_files, total_units
                ));
                let pb = create_progress_bar();
                pb.set_message("Upscaling");
                self.progress = Some(pb);
            }
            BatchEvent::Progress {
                percentage,
                completed,
                total,
            } => {
                if let Some(pb) = &self.progress {
                    pb.set_position((percentage * 10.0).round() as u64);
                    pb.set_message(format!("{:.1}% ({}/{} units)", percentage, completed, total));
                }
            }
            BatchEvent::Notice { path, message } => {
                let line = format!("{}: {}", path.display(), message);
                self.print(|| console.verbose(&line));
            }
            BatchEvent::FileProcessed {
                input_path,
                output_path,
                elapsed_ms,
            } => {
                let line = format!(
                    "{} -> {} ({}ms)",
                    input_path.display(),
                    output_path.display(),
                    elapsed_ms
                );
                self.print(|| console.success(&line));
            }
            BatchEvent::FileSkipped { input_path, reason } => {
                let line = format!("Skipping {}: {}", input_path.display(), reason);
                self.print(|| console.warn(&line));
            }
            BatchEvent::FileFailed { input_path, error } => {
                let line = format!("Failed to process {}: {}", input_path.display(), error);
                self.print(|| console.error(&line));
            }
            BatchEvent::Finished { percentage, .. } => {
                if let Some(pb) = self.progress.take() {
                    pb.finish_with_message(format!("✓ Upscale complete ({:.1}%)", percentage));
                }
            }
        }
    }
}

fn print_summary(summary: &CommandSummary) {
    println!();
    println!("{}", style("Processing Summary").bold().green());
    println!("  Command: {}", style(summary.command).cyan());
    println!("  Files: {}", summary.results.len());
    println!("  Completed: {}", style(summary.processed()).green());
    if summary.skipped() > 0 {
        println!("  Skipped: {}", style(summary.skipped()).yellow());
    }
    if summary.failed() > 0 {
        println!("  Failed: {}", style(summary.failed()).red());
    }
    println!("  Total time: {}", format_duration(summary.duration));
}

fn run(args: &Args, console: Console) -> Result<()> {
    let source = args
        .config_source()
        .context("One of --yaml, --json or --base64 is required")?;
    let config = AppConfig::from_source(&source)?;
    let engine = ProcessingEngine::new(config, console).context("Invalid configuration")?;

    console.verbose(&format!("Command: {}", engine.command()));

    let mut observer = CliObserver::new(console, engine.command().to_string());
    let summary = engine.dispatch(&mut observer)?;

    if console.json {
        JsonMessage::summary(
            summary.command.to_string(),
            summary.results.len(),
            summary.processed(),
            summary.skipped(),
            summary.failed(),
            summary.duration.as_secs_f64(),
        );
    } else {
        print_summary(&summary);
        if args.report {
            report::print_report(&summary);
        }
    }

    if summary.is_failure() {
        bail!(
            "{} of {} file(s) failed for '{}'",
            summary.failed(),
            summary.results.len(),
            summary.command
        );
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let console = Console::new(args.verbose, args.json_progress);

    if !console.json {
        println!("{}", style("picforge - Image Processor").bold().blue());
        println!("{}", style("Convert, compress, cut out, upscale and relocate images").dim());
        println!();
    }

    let result = run(&args, console);
    if console.json {
        if let Err(e) = &result {
            JsonMessage::log(LogLevel::Error, format!("{:#}", e));
        }
    }
    result
}
