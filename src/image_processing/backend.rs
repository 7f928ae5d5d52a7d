//! Upscale backends.
//!
//! A backend is picked once at setup from the configured [`BackendKind`] and
//! the parsed [`ModelSpec`]; the batch loop only ever sees `dyn UpscaleBackend`.

use anyhow::{anyhow, bail, Result};
use fast_image_resize::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

use super::resize::resize_rgb;

/// Compute backend requested by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// First backend that supports the model
    #[default]
    #[strum(serialize = "auto")]
    Auto,
    /// CPU interpolation, always available
    #[serde(alias = "cpu")]
    #[strum(serialize = "interpolation")]
    Interpolation,
    /// ONNX Runtime (requires the `ai` feature)
    #[strum(serialize = "onnx")]
    Onnx,
}

/// Built-in interpolation filters usable as a "model"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Interpolation {
    #[strum(serialize = "lanczos3")]
    Lanczos3,
    #[strum(serialize = "catmull-rom")]
    CatmullRom,
    #[strum(serialize = "mitchell")]
    Mitchell,
    #[strum(serialize = "bilinear")]
    Bilinear,
}

impl Interpolation {
    pub fn filter(self) -> FilterType {
        match self {
            Interpolation::Lanczos3 => FilterType::Lanczos3,
            Interpolation::CatmullRom => FilterType::CatmullRom,
            Interpolation::Mitchell => FilterType::Mitchell,
            Interpolation::Bilinear => FilterType::Bilinear,
        }
    }
}

/// Default native scale for built-in models when none is configured
pub const DEFAULT_BUILTIN_SCALE: u32 = 2;

/// Which model to load and its native upscale factor
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSpec {
    Builtin { filter: Interpolation, scale: u32 },
    OnnxFile { path: PathBuf, scale: u32 },
}

impl ModelSpec {
    /// Parse a model name: a built-in filter name or a path to an `.onnx` file
    pub fn parse(name: &str, model_scale: Option<u32>) -> Result<Self> {
        let name = name.trim();
        if model_scale == Some(0) {
            bail!("Model scale must be greater than 0");
        }

        if name.to_lowercase().ends_with(".onnx") {
            let scale = model_scale.ok_or_else(|| {
                anyhow!("model_scale is required for ONNX model '{}'", name)
            })?;
            return Ok(ModelSpec::OnnxFile {
                path: PathBuf::from(name),
                scale,
            });
        }

        let filter = Interpolation::from_str(name).map_err(|_| {
            anyhow!(
                "Unknown model '{}'. Built-in models: lanczos3, catmull-rom, mitchell, bilinear; \
                 or give a path to an .onnx file",
                name
            )
        })?;

        Ok(ModelSpec::Builtin {
            filter,
            scale: model_scale.unwrap_or(DEFAULT_BUILTIN_SCALE),
        })
    }

    pub fn scale(&self) -> u32 {
        match self {
            ModelSpec::Builtin { scale, .. } | ModelSpec::OnnxFile { scale, .. } => *scale,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ModelSpec::Builtin { filter, scale } => format!("{} (x{})", filter, scale),
            ModelSpec::OnnxFile { path, scale } => format!("{} (x{})", path.display(), scale),
        }
    }
}

/// A loaded super-resolution model
pub trait UpscaleBackend {
    fn name(&self) -> &'static str;

    /// Native upscale factor of the loaded model
    fn native_scale(&self) -> u32;

    /// Upscale an RGB image by the native scale; blocking
    fn run(&mut self, img: &RgbImage) -> Result<RgbImage>;
}

impl BackendKind {
    /// Concrete backends in `auto` preference order
    const CONCRETE: [BackendKind; 2] = [BackendKind::Onnx, BackendKind::Interpolation];

    pub fn supports(self, model: &ModelSpec) -> bool {
        match self {
            BackendKind::Auto => Self::CONCRETE.iter().any(|kind| kind.supports(model)),
            BackendKind::Interpolation => matches!(model, ModelSpec::Builtin { .. }),
            BackendKind::Onnx => {
                cfg!(feature = "ai") && matches!(model, ModelSpec::OnnxFile { .. })
            }
        }
    }

    fn load(self, model: &ModelSpec) -> Result<Box<dyn UpscaleBackend>> {
        match (self, model) {
            (BackendKind::Interpolation, ModelSpec::Builtin { filter, scale }) => {
                Ok(Box::new(InterpolationUpscaler::new(*filter, *scale)))
            }
            #[cfg(feature = "ai")]
            (BackendKind::Onnx, ModelSpec::OnnxFile { path, scale }) => {
                Ok(Box::new(super::onnx::OnnxUpscaler::new(path, *scale)?))
            }
            _ => bail!("Backend '{}' cannot load model {}", self, model.describe()),
        }
    }
}

/// Pick and load a backend for the model; fatal for the batch when none fits
pub fn select_backend(kind: BackendKind, model: &ModelSpec) -> Result<Box<dyn UpscaleBackend>> {
    let chosen = match kind {
        BackendKind::Auto => BackendKind::CONCRETE
            .into_iter()
            .find(|candidate| candidate.supports(model)),
        explicit => Some(explicit).filter(|k| k.supports(model)),
    };

    match chosen {
        Some(backend) => backend.load(model),
        None if matches!(model, ModelSpec::OnnxFile { .. }) && !cfg!(feature = "ai") => bail!(
            "ONNX models are not available. Rebuild with --features ai to enable ONNX Runtime"
        ),
        None => bail!(
            "Backend '{}' does not support model {}",
            kind,
            model.describe()
        ),
    }
}

/// Dimensions multiplied by an integer scale, or an error when they overflow
pub fn scaled_dimensions(dimensions: (u32, u32), scale: u32) -> Result<(u32, u32)> {
    let (width, height) = dimensions;
    match (width.checked_mul(scale), height.checked_mul(scale)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => bail!("{}x{} scaled by {} is too large", width, height, scale),
    }
}

/// CPU backend: convolution resampling by an integer factor
pub struct InterpolationUpscaler {
    filter: Interpolation,
    scale: u32,
}

impl InterpolationUpscaler {
    pub fn new(filter: Interpolation, scale: u32) -> Self {
        Self { filter, scale }
    }
}

impl UpscaleBackend for InterpolationUpscaler {
    fn name(&self) -> &'static str {
        "interpolation"
    }

    fn native_scale(&self) -> u32 {
        self.scale
    }

    fn run(&mut self, img: &RgbImage) -> Result<RgbImage> {
        let (width, height) = scaled_dimensions(img.dimensions(), self.scale)?;
        resize_rgb(img, width, height, self.filter.filter())
    }
}
