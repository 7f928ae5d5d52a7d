/// ONNX Runtime backends for super-resolution and background segmentation.
/// Only compiled with the `ai` feature.
use anyhow::{anyhow, Context, Result};
use fast_image_resize::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;

use super::backend::UpscaleBackend;
use super::remove_bg::Segmenter;
use super::resize::{resize_gray, resize_rgb};

/// u2net-family models take a fixed 320x320 input
const SEGMENTATION_SIZE: u32 = 320;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

fn load_session(path: &Path) -> Result<Session> {
    // Initialize ONNX Runtime if not already done
    let _ = ort::init().commit();

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load ONNX model: {}", path.display()))?;

    Ok(session)
}

fn io_names(session: &Session) -> Result<(String, String)> {
    let input = session
        .inputs
        .first()
        .map(|i| i.name.clone())
        .ok_or_else(|| anyhow!("ONNX model has no inputs"))?;
    let output = session
        .outputs
        .first()
        .map(|o| o.name.clone())
        .ok_or_else(|| anyhow!("ONNX model has no outputs"))?;
    Ok((input, output))
}

/// Fill tensor data in NCHW format, each channel mapped through `normalize`
fn prepare_tensor(img: &RgbImage, normalize: impl Fn(usize, u8) -> f32) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut tensor_data = Vec::with_capacity(3 * (width * height) as usize);

    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                tensor_data.push(normalize(c, img.get_pixel(x, y)[c]));
            }
        }
    }

    tensor_data
}

/// Super-resolution model taking and returning NCHW float RGB in 0..1
pub struct OnnxUpscaler {
    session: Session,
    input_name: String,
    output_name: String,
    scale: u32,
}

impl OnnxUpscaler {
    pub fn new(path: &Path, scale: u32) -> Result<Self> {
        let session = load_session(path)?;
        let (input_name, output_name) = io_names(&session)?;

        Ok(Self {
            session,
            input_name,
            output_name,
            scale,
        })
    }
}

impl UpscaleBackend for OnnxUpscaler {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn native_scale(&self) -> u32 {
        self.scale
    }

    fn run(&mut self, img: &RgbImage) -> Result<RgbImage> {
        let (width, height) = img.dimensions();
        let tensor_data = prepare_tensor(img, |_, v| v as f32 / 255.0);
        let input_shape = vec![1usize, 3, height as usize, width as usize];
        let input_value = Value::from_array((input_shape, tensor_data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])?;
        let (output_shape, output_data) =
            outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let shape: Vec<usize> = output_shape.iter().map(|&x| x as usize).collect();

        if shape.len() != 4 || shape[1] != 3 {
            return Err(anyhow!("Unexpected super-resolution output shape {:?}", shape));
        }
        let (out_height, out_width) = (shape[2], shape[3]);
        let plane = out_width * out_height;

        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let upscaled = RgbImage::from_fn(out_width as u32, out_height as u32, |x, y| {
            let idx = y as usize * out_width + x as usize;
            Rgb([
                to_u8(output_data[idx]),
                to_u8(output_data[plane + idx]),
                to_u8(output_data[2 * plane + idx]),
            ])
        });

        Ok(upscaled)
    }
}

/// Salient-object segmentation (u2net family) producing a foreground matte
pub struct OnnxSegmenter {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSegmenter {
    pub fn new(path: &Path) -> Result<Self> {
        let session = load_session(path)?;
        let (input_name, output_name) = io_names(&session)?;

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl Segmenter for OnnxSegmenter {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn matte(&mut self, img: &RgbImage) -> Result<GrayImage> {
        let (width, height) = img.dimensions();
        let resized = resize_rgb(img, SEGMENTATION_SIZE, SEGMENTATION_SIZE, FilterType::Lanczos3)?;

        let tensor_data = prepare_tensor(&resized, |c, v| {
            (v as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
        });
        let side = SEGMENTATION_SIZE as usize;
        let input_value = Value::from_array((vec![1usize, 3, side, side], tensor_data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])?;
        let (_, output_data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        let prediction = &output_data[..side * side];
        let (min, max) = prediction
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = (max - min).max(f32::EPSILON);

        let small = GrayImage::from_fn(SEGMENTATION_SIZE, SEGMENTATION_SIZE, |x, y| {
            let v = (prediction[y as usize * side + x as usize] - min) / range;
            Luma([(v * 255.0).round() as u8])
        });

        resize_gray(&small, width, height, FilterType::Bilinear)
    }
}
