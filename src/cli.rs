use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "picforge",
    version,
    about = "Config-driven image processor: convert, compress, cut out, upscale and relocate images",
    long_about = "
picforge - Image Processor

Reads a single configuration (YAML file, JSON string or Base64-encoded JSON)
naming one command and its parameters, then runs that command.

Commands:
• format     convert images to png, jpg, webp, bmp, tiff, gif or ico
• compress   re-encode images as jpg, png or webp at a given quality
• remove_bg  cut the subject out of its background (optional fill color)
• final2x    super-resolution upscaling of a batch of images, with alpha support
• save_file  move files into a directory without overwriting anything

Example Usage:
  # Run a YAML configuration
  picforge -y ./upscale.yaml

  # Inline JSON configuration
  picforge -j '{\"command\":\"compress\",\"compressConfig\":{\"input_path\":[\"a.jpg\"],\"output_path\":\"out\",\"target_format\":\"jpg\",\"quality\":80}}'

  # Base64-encoded JSON with machine-readable progress on stdout
  picforge -b eyJjb21tYW5kIjoi... --json-progress

  # Print a results table at the end
  picforge -y ./upscale.yaml --report --verbose"
)]
#[command(group(
    ArgGroup::new("config_source")
        .required(true)
        .args(["yaml", "json", "base64"]),
))]
pub struct Args {
    /// Path to a YAML configuration file
    #[arg(short = 'y', long = "yaml", value_name = "FILE")]
    pub yaml: Option<PathBuf>,

    /// Configuration as a JSON string
    #[arg(short = 'j', long = "json", value_name = "JSON")]
    pub json: Option<String>,

    /// Configuration as a Base64-encoded JSON string
    #[arg(short = 'b', long = "base64", value_name = "BASE64")]
    pub base64: Option<String>,

    /// Emit progress and results as JSON lines on stdout (suppresses other output)
    #[arg(long = "json-progress")]
    pub json_progress: bool,

    /// Display a formatted table of per-file results at the end
    #[arg(long = "report")]
    pub report: bool,

    /// Enable verbose output with detailed progress information
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Where the configuration comes from, resolved from the mutually exclusive flags
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Yaml(PathBuf),
    Json(String),
    Base64(String),
}

impl Args {
    pub fn config_source(&self) -> Option<ConfigSource> {
        if let Some(path) = &self.yaml {
            Some(ConfigSource::Yaml(path.clone()))
        } else if let Some(json) = &self.json {
            Some(ConfigSource::Json(json.clone()))
        } else {
            self.base64.clone().map(ConfigSource::Base64)
        }
    }
}
