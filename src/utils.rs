use anyhow::{anyhow, Context, Result};
use console::style;
use image::{DynamicImage, ImageReader};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use regex::Regex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::json_output::{JsonMessage, LogLevel};

/// Extensions picked up when an input entry is a directory
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff", "gif", "ico",
];

/// Create a styled progress bar driven by percentage (0-1000, one decimal place)
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.blue} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {msg} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb
}

/// Format duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", mins, secs)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Format a byte count as kilobytes with two decimals
pub fn format_kb(bytes: u64) -> String {
    format!("{:.2} KB", bytes as f64 / 1024.0)
}

/// Print verbose information if verbose mode is enabled
pub fn verbose_println(verbose: bool, message: &str) {
    if verbose {
        println!("{} {}", style("[VERBOSE]").dim(), message);
    }
}

pub fn info_println(message: &str) {
    println!("{} {}", style("[INFO]").blue().bold(), message);
}

/// Print warning message
pub fn warn_println(message: &str) {
    println!("{} {}", style("[WARNING]").yellow().bold(), message);
}

/// Print error message
pub fn error_println(message: &str) {
    eprintln!("{} {}", style("[ERROR]").red().bold(), message);
}

pub fn success_println(message: &str) {
    println!("{} {}", style("[SUCCESS]").green().bold(), message);
}

/// Routes log lines either to the styled console or to JSON lines on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    pub verbose: bool,
    pub json: bool,
}

impl Console {
    pub fn new(verbose: bool, json: bool) -> Self {
        Self { verbose, json }
    }

    pub fn info(&self, message: &str) {
        if self.json {
            JsonMessage::log(LogLevel::Info, message);
        } else {
            info_println(message);
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.json {
            if self.verbose {
                JsonMessage::log(LogLevel::Debug, message);
            }
        } else {
            verbose_println(self.verbose, message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.json {
            JsonMessage::log(LogLevel::Warning, message);
        } else {
            warn_println(message);
        }
    }

    pub fn error(&self, message: &str) {
        if self.json {
            JsonMessage::log(LogLevel::Error, message);
        } else {
            error_println(message);
        }
    }

    pub fn success(&self, message: &str) {
        if self.json {
            JsonMessage::log(LogLevel::Success, message);
        } else {
            success_println(message);
        }
    }
}

/// Get file extension in lowercase
pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file has one of the specified extensions
pub fn has_valid_extension(path: &Path, extensions: &[&str]) -> bool {
    if let Some(ext) = get_file_extension(path) {
        extensions.contains(&ext.as_str())
    } else {
        false
    }
}

/// Expand directory entries into the image files they contain.
///
/// File entries (and entries that do not exist) are kept as-is and in order;
/// missing paths are reported later by whoever processes them.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut expanded = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            expanded.push(input.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(input).follow_links(false).max_depth(10) {
            let entry = entry
                .with_context(|| format!("Failed to read directory entry in {}", input.display()))?;
            let path = entry.path();
            if path.is_file() && has_valid_extension(path, IMAGE_EXTENSIONS) {
                found.push(path.to_path_buf());
            }
        }

        // Sort for consistent processing order
        found.sort();
        expanded.extend(found);
    }

    Ok(expanded)
}

/// Random lowercase hex tag used to keep output filenames unique
pub fn generate_unique_hash(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// Build `{dir}/{stem}_{hash8}.{ext}` for an input file
pub fn hashed_output_path(dir: &Path, input_path: &Path, extension: &str) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    dir.join(format!("{}_{}.{}", stem, generate_unique_hash(8), extension))
}

/// Parse a `#RRGGBB` or `RRGGBB` color string
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let pattern = Regex::new(r"^#?([0-9a-fA-F]{2})([0-9a-fA-F]{2})([0-9a-fA-F]{2})$").ok()?;
    let caps = pattern.captures(color.trim())?;

    let channel = |i: usize| u8::from_str_radix(&caps[i], 16).ok();
    Some((channel(1)?, channel(2)?, channel(3)?))
}

/// Decode an image by its content; the extension is ignored
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read image: {}", path.display()))?;

    reader
        .decode()
        .with_context(|| format!("Failed to decode image: {}", path.display()))
}

/// Write `path` through a temporary file in the same directory.
///
/// The file only appears once `write` succeeded, and an existing file at
/// `path` is never replaced.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("Output path has no parent: {}", path.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }

    tmp.persist_noclobber(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Make sure a directory exists, creating it (and its parents) when needed
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))
}
