use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum_macros::{Display, EnumString};

use crate::cli::ConfigSource;
use crate::image_processing::backend::{BackendKind, ModelSpec};
use crate::image_processing::compress::CompressFormat;
use crate::image_processing::format::TargetFormat;

/// The operation a configuration asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Command {
    #[serde(rename = "format")]
    #[strum(serialize = "format")]
    Format,
    #[serde(rename = "compress")]
    #[strum(serialize = "compress")]
    Compress,
    #[serde(rename = "remove_bg")]
    #[strum(serialize = "remove_bg")]
    RemoveBg,
    #[serde(rename = "final2x")]
    #[strum(serialize = "final2x")]
    Final2x,
    #[serde(rename = "save_file")]
    #[strum(serialize = "save_file")]
    SaveFile,
}

/// Fields shared by every command section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BaseConfig {
    pub input_path: Vec<PathBuf>,
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormatConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    #[serde(default)]
    pub target_format: Option<String>,
}

impl FormatConfig {
    pub fn target(&self) -> Result<TargetFormat> {
        match &self.target_format {
            Some(name) => TargetFormat::from_str(name.trim())
                .map_err(|_| anyhow!("Unsupported target format '{}'", name)),
            None => Ok(TargetFormat::Png),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    pub target_format: String,
    pub quality: u8,
}

impl CompressConfig {
    pub fn target(&self) -> Result<CompressFormat> {
        CompressFormat::from_str(self.target_format.trim()).map_err(|_| {
            anyhow!(
                "Unsupported compression format '{}'. Valid formats: jpg, png, webp",
                self.target_format
            )
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoveBgConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Final2xConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    pub pretrained_model_name: String,
    #[serde(default, alias = "device")]
    pub backend: BackendKind,
    /// Unset or non-positive means "use the model's native scale"
    #[serde(default)]
    pub target_scale: Option<f64>,
    #[serde(default, alias = "cc_model_scale")]
    pub model_scale: Option<u32>,
}

impl Final2xConfig {
    pub fn model(&self) -> Result<ModelSpec> {
        ModelSpec::parse(&self.pretrained_model_name, self.model_scale)
    }

    /// Resolve the effective target scale against the model's native scale
    pub fn effective_target_scale(&self, model_scale: u32) -> f64 {
        match self.target_scale {
            Some(scale) if scale > 0.0 => scale,
            _ => model_scale as f64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaveFileConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
}

/// Top-level configuration: a command plus the section it reads
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_config: Option<FormatConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress_config: Option<CompressConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_bg_config: Option<RemoveBgConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final2x_config: Option<Final2xConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_file_config: Option<SaveFileConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse JSON config")
    }

    /// Decode a Base64 string holding a JSON configuration
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Failed to decode Base64 config")?;
        let json = String::from_utf8(bytes).context("Base64 config is not valid UTF-8")?;

        Self::from_json_str(&json)
    }

    pub fn from_source(source: &ConfigSource) -> Result<Self> {
        match source {
            ConfigSource::Yaml(path) => Self::from_yaml(path),
            ConfigSource::Json(json) => Self::from_json_str(json),
            ConfigSource::Base64(encoded) => Self::from_base64(encoded),
        }
    }

    /// The shared section of whichever command is selected
    pub fn base(&self) -> Result<&BaseConfig> {
        let base = match self.command {
            Command::Format => self.format_config.as_ref().map(|c| &c.base),
            Command::Compress => self.compress_config.as_ref().map(|c| &c.base),
            Command::RemoveBg => self.remove_bg_config.as_ref().map(|c| &c.base),
            Command::Final2x => self.final2x_config.as_ref().map(|c| &c.base),
            Command::SaveFile => self.save_file_config.as_ref().map(|c| &c.base),
        };

        base.ok_or_else(|| {
            anyhow!(
                "Command '{}' requires a '{}' section",
                self.command,
                section_name(self.command)
            )
        })
    }

    /// Validate the selected command's section before anything touches the disk
    pub fn validate(&self) -> Result<()> {
        let base = self.base()?;

        if base.input_path.is_empty() {
            bail!("No input paths specified for '{}'", self.command);
        }

        // final2x and save_file skip missing inputs file by file
        let inputs_must_exist = !matches!(self.command, Command::Final2x | Command::SaveFile);
        if inputs_must_exist {
            for input in &base.input_path {
                if !input.exists() {
                    bail!("Input path does not exist: {}", input.display());
                }
                if !input.is_dir() && !input.is_file() {
                    bail!(
                        "Input path is neither a file nor a directory: {}",
                        input.display()
                    );
                }
            }
        }

        if base.output_path.exists() && !base.output_path.is_dir() {
            bail!(
                "Output path exists and is not a directory: {}",
                base.output_path.display()
            );
        }

        match self.command {
            Command::Format => {
                if let Some(config) = &self.format_config {
                    config.target()?;
                }
            }
            Command::Compress => {
                if let Some(config) = &self.compress_config {
                    config.target()?;
                    if !(1..=100).contains(&config.quality) {
                        bail!("Quality must be between 1 and 100, got: {}", config.quality);
                    }
                }
            }
            Command::Final2x => {
                if let Some(config) = &self.final2x_config {
                    config.model()?;
                    if let Some(scale) = config.target_scale {
                        if !scale.is_finite() {
                            bail!("Target scale must be a finite number, got: {}", scale);
                        }
                    }
                }
            }
            Command::RemoveBg | Command::SaveFile => {}
        }

        Ok(())
    }
}

fn section_name(command: Command) -> &'static str {
    match command {
        Command::Format => "formatConfig",
        Command::Compress => "compressConfig",
        Command::RemoveBg => "removeBgConfig",
        Command::Final2x => "final2xConfig",
        Command::SaveFile => "saveFileConfig",
    }
}
