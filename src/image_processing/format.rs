use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::time::Instant;
use strum_macros::{Display, EnumString};

use super::remove_bg::flatten_onto_white;
use super::{ProcessingResult, ResultStatus};
use crate::config_file::FormatConfig;
use crate::utils::{
    ensure_dir, expand_inputs, hashed_output_path, open_image, write_atomic, Console,
};

pub const OUTPUT_SUBDIR: &str = "format";

/// Largest edge an ICO entry may have
const ICO_MAX_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TargetFormat {
    #[strum(serialize = "png")]
    Png,
    #[strum(to_string = "jpg", serialize = "jpeg")]
    Jpg,
    #[strum(serialize = "webp")]
    Webp,
    #[strum(serialize = "bmp")]
    Bmp,
    #[strum(to_string = "tiff", serialize = "tif")]
    Tiff,
    #[strum(serialize = "gif")]
    Gif,
    #[strum(serialize = "ico")]
    Ico,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpg => "jpg",
            TargetFormat::Webp => "webp",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
            TargetFormat::Gif => "gif",
            TargetFormat::Ico => "ico",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            TargetFormat::Png => ImageFormat::Png,
            TargetFormat::Jpg => ImageFormat::Jpeg,
            TargetFormat::Webp => ImageFormat::WebP,
            TargetFormat::Bmp => ImageFormat::Bmp,
            TargetFormat::Tiff => ImageFormat::Tiff,
            TargetFormat::Gif => ImageFormat::Gif,
            TargetFormat::Ico => ImageFormat::Ico,
        }
    }
}

/// 8-bit RGB or RGBA, the layouts every encoder here accepts
fn to_8bit(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

/// Encode a decoded image as `target` into `output_path`
pub fn write_as(img: DynamicImage, target: TargetFormat, output_path: &Path) -> Result<()> {
    write_atomic(output_path, |writer| {
        match target {
            TargetFormat::Jpg => {
                let rgb = flatten_onto_white(&img.to_rgba8());
                JpegEncoder::new_with_quality(writer, 95).encode_image(&rgb)?;
            }
            TargetFormat::Ico => {
                let img = if img.width().max(img.height()) > ICO_MAX_SIZE {
                    img.resize(ICO_MAX_SIZE, ICO_MAX_SIZE, FilterType::Lanczos3)
                } else {
                    img
                };
                DynamicImage::ImageRgba8(img.to_rgba8()).write_to(writer, ImageFormat::Ico)?;
            }
            TargetFormat::Gif => {
                DynamicImage::ImageRgba8(img.to_rgba8()).write_to(writer, ImageFormat::Gif)?;
            }
            other => {
                to_8bit(img).write_to(writer, other.image_format())?;
            }
        }
        Ok(())
    })
}

/// Convert one file into `output_dir`, returning the written path
pub fn convert_image(input_path: &Path, output_dir: &Path, target: TargetFormat) -> Result<PathBuf> {
    let img = open_image(input_path)?;

    let output_path = hashed_output_path(output_dir, input_path, target.extension());
    write_as(img, target, &output_path)
        .with_context(|| format!("Failed to write {}: {}", target, output_path.display()))?;

    Ok(output_path)
}

/// Run the `format` command over every configured input
pub fn run(config: &FormatConfig, console: &Console) -> Result<Vec<ProcessingResult>> {
    let target = config.target()?;
    let output_dir = config.base.output_path.join(OUTPUT_SUBDIR);
    ensure_dir(&output_dir)?;

    let mut results = Vec::new();
    for input_path in expand_inputs(&config.base.input_path)? {
        let start = Instant::now();
        let result = match convert_image(&input_path, &output_dir, target) {
            Ok(output_path) => {
                console.success(&format!("Image saved to: {}", output_path.display()));
                ProcessingResult::completed(&input_path, output_path, target.to_string(), start)
            }
            Err(e) => {
                console.error(&format!(
                    "Failed to convert {}: {:#}",
                    input_path.display(),
                    e
                ));
                ProcessingResult::new(&input_path, None, ResultStatus::Failed, format!("{:#}", e), start)
            }
        };
        results.push(result);
    }

    Ok(results)
}
