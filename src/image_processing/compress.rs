use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ImageEncoder};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use strum_macros::{Display, EnumString};

use super::{ProcessingResult, ResultStatus};
use crate::config_file::CompressConfig;
use crate::utils::{
    ensure_dir, expand_inputs, format_kb, hashed_output_path, open_image, write_atomic, Console,
};

pub const OUTPUT_SUBDIR: &str = "compress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum CompressFormat {
    #[strum(to_string = "jpg", serialize = "jpeg")]
    Jpg,
    #[strum(serialize = "png")]
    Png,
    #[strum(serialize = "webp")]
    Webp,
}

impl CompressFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CompressFormat::Jpg => "jpg",
            CompressFormat::Png => "png",
            CompressFormat::Webp => "webp",
        }
    }
}

/// Sizes before and after re-encoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    pub original_size: u64,
    pub compressed_size: u64,
}

impl CompressionStats {
    /// Percentage saved; negative when the output grew
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_size as f64 / self.original_size as f64) * 100.0
    }
}

fn png_compression(quality: u8) -> CompressionType {
    if quality >= 50 {
        CompressionType::Best
    } else {
        CompressionType::Fast
    }
}

/// Lossy WebP at `quality`, keeping alpha when present
fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let memory = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
            .encode_simple(false, quality as f32)
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
            .encode_simple(false, quality as f32)
    }
    .map_err(|e| anyhow!("WebP encoding failed: {:?}", e))?;

    Ok(memory.to_vec())
}

/// Re-encode `img` into `output_path` at the given quality
pub fn encode(
    img: &DynamicImage,
    format: CompressFormat,
    quality: u8,
    output_path: &Path,
) -> Result<()> {
    write_atomic(output_path, |writer| {
        match format {
            CompressFormat::Jpg => {
                let rgb = img.to_rgb8();
                JpegEncoder::new_with_quality(writer, quality).encode_image(&rgb)?;
            }
            CompressFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    writer,
                    png_compression(quality),
                    PngFilter::Adaptive,
                );
                if img.color().has_alpha() {
                    let rgba = img.to_rgba8();
                    encoder.write_image(
                        rgba.as_raw(),
                        rgba.width(),
                        rgba.height(),
                        image::ExtendedColorType::Rgba8,
                    )?;
                } else {
                    let rgb = img.to_rgb8();
                    encoder.write_image(
                        rgb.as_raw(),
                        rgb.width(),
                        rgb.height(),
                        image::ExtendedColorType::Rgb8,
                    )?;
                }
            }
            CompressFormat::Webp => {
                writer.write_all(&encode_webp(img, quality)?)?;
            }
        }
        Ok(())
    })
    .with_context(|| format!("Failed to compress into {}", output_path.display()))
}

/// Compress one file into `output_dir`
pub fn compress_image(
    input_path: &Path,
    output_dir: &Path,
    format: CompressFormat,
    quality: u8,
) -> Result<(PathBuf, CompressionStats)> {
    let original_size = fs::metadata(input_path)
        .with_context(|| format!("Failed to stat {}", input_path.display()))?
        .len();
    let img = open_image(input_path)?;

    let output_path = hashed_output_path(output_dir, input_path, format.extension());
    encode(&img, format, quality, &output_path)?;

    let compressed_size = fs::metadata(&output_path)?.len();
    Ok((
        output_path,
        CompressionStats {
            original_size,
            compressed_size,
        },
    ))
}

/// Run the `compress` command over every configured input
pub fn run(config: &CompressConfig, console: &Console) -> Result<Vec<ProcessingResult>> {
    let format = config.target()?;
    let output_dir = config.base.output_path.join(OUTPUT_SUBDIR);
    ensure_dir(&output_dir)?;

    let mut results = Vec::new();
    for input_path in expand_inputs(&config.base.input_path)? {
        let start = Instant::now();
        match compress_image(&input_path, &output_dir, format, config.quality) {
            Ok((output_path, stats)) => {
                console.info(&format!(
                    "Original size: {}, compressed size: {}, ratio: {:.1}%",
                    format_kb(stats.original_size),
                    format_kb(stats.compressed_size),
                    stats.ratio()
                ));
                console.success(&format!("Image saved to: {}", output_path.display()));
                let detail = format!("{:.1}%", stats.ratio());
                results.push(ProcessingResult::completed(&input_path, output_path, detail, start));
            }
            Err(e) => {
                console.error(&format!(
                    "Failed to compress {}: {:#}",
                    input_path.display(),
                    e
                ));
                results.push(ProcessingResult::new(
                    &input_path,
                    None,
                    ResultStatus::Failed,
                    format!("{:#}", e),
                    start,
                ));
            }
        }
    }

    Ok(results)
}
