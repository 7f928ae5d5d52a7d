use anyhow::{anyhow, Result};
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{GrayImage, RgbImage};

/// Scales closer than this are treated as equal
pub const SCALE_TOLERANCE: f64 = 1e-3;

/// Output dimensions for a scale factor, rounded up
pub fn target_dimensions(dimensions: (u32, u32), scale: f64) -> (u32, u32) {
    let (width, height) = dimensions;
    (
        (width as f64 * scale).ceil() as u32,
        (height as f64 * scale).ceil() as u32,
    )
}

/// A model's native output is only resized when the requested scale differs
pub fn needs_rescale(target_scale: f64, model_scale: f64) -> bool {
    (target_scale - model_scale).abs() > SCALE_TOLERANCE
}

/// Resize an RGB image to exact dimensions with the given convolution filter
pub fn resize_rgb(img: &RgbImage, width: u32, height: u32, filter: FilterType) -> Result<RgbImage> {
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }

    let (src_width, src_height) = img.dimensions();
    let pixels = resize_raw(
        img.as_raw().clone(),
        (src_width, src_height),
        (width, height),
        PixelType::U8x3,
        filter,
    )?;

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("Resized buffer does not match {}x{}", width, height))
}

/// Single-channel counterpart of [`resize_rgb`]
pub fn resize_gray(img: &GrayImage, width: u32, height: u32, filter: FilterType) -> Result<GrayImage> {
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }

    let (src_width, src_height) = img.dimensions();
    let pixels = resize_raw(
        img.as_raw().clone(),
        (src_width, src_height),
        (width, height),
        PixelType::U8,
        filter,
    )?;

    GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("Resized buffer does not match {}x{}", width, height))
}

fn resize_raw(
    pixels: Vec<u8>,
    src: (u32, u32),
    dst: (u32, u32),
    pixel_type: PixelType,
    filter: FilterType,
) -> Result<Vec<u8>> {
    if src.0 == 0 || src.1 == 0 {
        return Err(anyhow!("Source image has zero size: {}x{}", src.0, src.1));
    }
    if dst.0 == 0 || dst.1 == 0 {
        return Err(anyhow!("Target size is zero: {}x{}", dst.0, dst.1));
    }

    let src_image = Image::from_vec_u8(src.0, src.1, pixels, pixel_type)?;
    let mut dst_image = Image::new(dst.0, dst.1, pixel_type);

    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(filter));
    let mut resizer = Resizer::new();
    resizer.resize(&src_image, &mut dst_image, Some(&options))?;

    Ok(dst_image.into_vec())
}
