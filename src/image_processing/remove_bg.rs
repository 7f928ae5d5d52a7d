//! Background removal: a segmenter produces a foreground matte, which becomes
//! the alpha channel (or the blend weight against a fill color).

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{ProcessingResult, ResultStatus};
use crate::config_file::RemoveBgConfig;
use crate::utils::{
    ensure_dir, expand_inputs, get_file_extension, hashed_output_path, open_image,
    parse_hex_color, write_atomic, Console,
};

pub const OUTPUT_SUBDIR: &str = "cutout";

/// Model name selecting the built-in border keyer
pub const BUILTIN_MODEL: &str = "builtin";

/// Produces a per-pixel foreground opacity for an image
pub trait Segmenter {
    fn name(&self) -> &'static str;

    fn matte(&mut self, img: &RgbImage) -> Result<GrayImage>;
}

/// Estimates the background from the image border and keys it out by color
/// distance. Works for product shots and scans on a roughly uniform backdrop.
pub struct BorderKeySegmenter {
    /// Distance at or below which a pixel is fully background
    pub low: f32,
    /// Distance at or above which a pixel is fully foreground
    pub high: f32,
}

impl Default for BorderKeySegmenter {
    fn default() -> Self {
        Self {
            low: 24.0,
            high: 72.0,
        }
    }
}

impl BorderKeySegmenter {
    /// Per-channel median of the outermost pixel ring
    pub fn estimate_background(img: &RgbImage) -> Rgb<u8> {
        let (width, height) = img.dimensions();
        let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];

        for (x, y, pixel) in img.enumerate_pixels() {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                for c in 0..3 {
                    channels[c].push(pixel[c]);
                }
            }
        }

        let median = |values: &mut Vec<u8>| -> u8 {
            if values.is_empty() {
                return 0;
            }
            values.sort_unstable();
            values[values.len() / 2]
        };

        let [r, g, b] = &mut channels;
        Rgb([median(r), median(g), median(b)])
    }
}

impl Segmenter for BorderKeySegmenter {
    fn name(&self) -> &'static str {
        "border-key"
    }

    fn matte(&mut self, img: &RgbImage) -> Result<GrayImage> {
        let background = Self::estimate_background(img);
        let span = (self.high - self.low).max(1.0);

        Ok(GrayImage::from_fn(img.width(), img.height(), |x, y| {
            let p = img.get_pixel(x, y);
            let distance = (0..3)
                .map(|c| {
                    let d = p[c] as f32 - background[c] as f32;
                    d * d
                })
                .sum::<f32>()
                .sqrt();
            let alpha = ((distance - self.low) / span).clamp(0.0, 1.0);
            Luma([(alpha * 255.0).round() as u8])
        }))
    }
}

/// Build the segmenter named by configuration
pub fn create_segmenter(model: Option<&str>) -> Result<Box<dyn Segmenter>> {
    let model = model.map(str::trim).unwrap_or(BUILTIN_MODEL);

    if model.eq_ignore_ascii_case(BUILTIN_MODEL) {
        return Ok(Box::new(BorderKeySegmenter::default()));
    }

    if model.to_lowercase().ends_with(".onnx") {
        #[cfg(feature = "ai")]
        {
            return Ok(Box::new(super::onnx::OnnxSegmenter::new(Path::new(model))?));
        }
        #[cfg(not(feature = "ai"))]
        {
            bail!(
                "ONNX segmentation is not available. \
                 Rebuild with --features ai to enable native ONNX background removal"
            );
        }
    }

    bail!(
        "Unknown background removal model '{}'. Use '{}' or a path to an .onnx file",
        model,
        BUILTIN_MODEL
    )
}

/// Apply a matte as alpha, or blend over an opaque fill color
pub fn apply_matte(img: &RgbImage, matte: &GrayImage, fill: Option<Rgb<u8>>) -> RgbaImage {
    RgbaImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let a = matte.get_pixel(x, y)[0];

        match fill {
            Some(bg) => {
                let t = a as f32 / 255.0;
                let blend = |c: usize| (p[c] as f32 * t + bg[c] as f32 * (1.0 - t)).round() as u8;
                Rgba([blend(0), blend(1), blend(2), 255])
            }
            None => Rgba([p[0], p[1], p[2], a]),
        }
    })
}

/// Composite an RGBA image over white
pub fn flatten_onto_white(img: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let t = p[3] as f32 / 255.0;
        let blend = |c: usize| (p[c] as f32 * t + 255.0 * (1.0 - t)).round() as u8;
        Rgb([blend(0), blend(1), blend(2)])
    })
}

/// Output keeps the input's extension when we can encode it with alpha
fn output_extension(input_path: &Path) -> String {
    match get_file_extension(input_path).as_deref() {
        Some(ext @ ("png" | "jpg" | "jpeg" | "webp" | "bmp" | "tif" | "tiff" | "gif")) => {
            ext.to_string()
        }
        _ => "png".to_string(),
    }
}

/// Cut out a single image into `output_dir`, returning the written path
pub fn remove_background(
    input_path: &Path,
    output_dir: &Path,
    segmenter: &mut dyn Segmenter,
    fill: Option<Rgb<u8>>,
) -> Result<PathBuf> {
    let img = open_image(input_path)?;
    let rgb = img.to_rgb8();

    let matte = segmenter.matte(&rgb)?;
    let cutout = apply_matte(&rgb, &matte, fill);

    let extension = output_extension(input_path);
    let output_path = hashed_output_path(output_dir, input_path, &extension);

    write_atomic(&output_path, |writer| {
        if matches!(extension.as_str(), "jpg" | "jpeg") {
            JpegEncoder::new_with_quality(writer, 95).encode_image(&flatten_onto_white(&cutout))?;
        } else {
            let format = ImageFormat::from_extension(&extension).unwrap_or(ImageFormat::Png);
            DynamicImage::ImageRgba8(cutout).write_to(writer, format)?;
        }
        Ok(())
    })
    .with_context(|| format!("Failed to save image: {}", output_path.display()))?;

    Ok(output_path)
}

/// Run the `remove_bg` command over every configured input
pub fn run(config: &RemoveBgConfig, console: &Console) -> Result<Vec<ProcessingResult>> {
    let output_dir = config.base.output_path.join(OUTPUT_SUBDIR);
    ensure_dir(&output_dir)?;

    let mut segmenter = create_segmenter(config.model.as_deref())?;
    console.verbose(&format!("Segmenter: {}", segmenter.name()));

    let fill = match config.bg_color.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(color) => match parse_hex_color(color) {
            Some((r, g, b)) => {
                console.info(&format!("Using background color: RGB({}, {}, {})", r, g, b));
                Some(Rgb([r, g, b]))
            }
            None => {
                console.warn(&format!(
                    "Invalid background color '{}', using a transparent background",
                    color
                ));
                None
            }
        },
    };

    let mut results = Vec::new();
    for input_path in expand_inputs(&config.base.input_path)? {
        let start = Instant::now();
        let result = match remove_background(&input_path, &output_dir, segmenter.as_mut(), fill) {
            Ok(output_path) => {
                console.success(&format!("File saved to: {}", output_path.display()));
                ProcessingResult::completed(&input_path, output_path, String::new(), start)
            }
            Err(e) => {
                console.error(&format!(
                    "Background removal failed for {}: {:#}",
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// White canvas with a red square in the middle
    fn product_shot() -> RgbImage {
        RgbImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Rgb([200, 20, 20])
            } else {
                Rgb([250, 250, 250])
            }
        })
    }

    #[test]
    fn test_estimate_background() {
        let bg = BorderKeySegmenter::estimate_background(&product_shot());
        assert_eq!(bg, Rgb([250, 250, 250]));
    }

    #[test]
    fn test_border_key_matte() {
        let mut segmenter = BorderKeySegmenter::default();
        let matte = segmenter.matte(&product_shot()).unwrap();

        assert_eq!(matte.get_pixel(0, 0)[0], 0);
        assert_eq!(matte.get_pixel(10, 10)[0], 255);
    }

    #[test]
    fn test_apply_matte_transparent_and_fill() {
        let img = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        let matte = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 255 }]));

        let cut = apply_matte(&img, &matte, None);
        assert_eq!(cut.get_pixel(0, 0)[3], 0);
        assert_eq!(cut.get_pixel(1, 0)[3], 255);

        let filled = apply_matte(&img, &matte, Some(Rgb([0, 0, 255])));
        assert_eq!(filled.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(filled.get_pixel(1, 0), &Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_flatten_onto_white() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert_eq!(flatten_onto_white(&img).get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_create_segmenter() {
        assert_eq!(create_segmenter(None).unwrap().name(), "border-key");
        assert_eq!(create_segmenter(Some("BUILTIN")).unwrap().name(), "border-key");
        assert!(create_segmenter(Some("u2net")).is_err());
    }

    #[test]
    fn test_remove_background_png_keeps_alpha() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("shot.png");
        product_shot().save(&input).unwrap();

        let mut segmenter = BorderKeySegmenter::default();
        let output = remove_background(&input, dir.path(), &mut segmenter, None).unwrap();

        assert_eq!(get_file_extension(&output).as_deref(), Some("png"));
        let decoded = image::open(&output).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(10, 10)[3], 255);
    }

    #[test]
    fn test_remove_background_jpeg_is_flattened() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("shot.jpg");
        product_shot().save(&input).unwrap();

        let mut segmenter = BorderKeySegmenter::default();
        let output = remove_background(&input, dir.path(), &mut segmenter, None).unwrap();

        assert_eq!(get_file_extension(&output).as_deref(), Some("jpg"));
        let decoded = image::open(&output).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn test_mislabeled_extension_is_decoded_by_content() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("shot.jpg");
        product_shot()
            .save_with_format(&input, ImageFormat::Png)
            .unwrap();

        let mut segmenter = BorderKeySegmenter::default();
        let output = remove_background(&input, dir.path(), &mut segmenter, None).unwrap();

        assert_eq!(get_file_extension(&output).as_deref(), Some("jpg"));
        assert_eq!(image::open(&output).unwrap().to_rgb8().dimensions(), (20, 20));
    }

    #[test]
    fn test_run_with_invalid_color_falls_back() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("shot.png");
        product_shot().save(&input).unwrap();

        let config: RemoveBgConfig = serde_json::from_value(serde_json::json!({
            "input_path": [input],
            "output_path": dir.path(),
            "bg_color": "#nothex",
        }))
        .unwrap();

        let results = run(&config, &Console::new(false, true)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Completed);
        let output = results[0].output_path.as_ref().unwrap();
        assert!(output.starts_with(dir.path().join(OUTPUT_SUBDIR)));
    }
}
