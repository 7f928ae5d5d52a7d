use anyhow::Result;
use fast_image_resize::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage};

use super::resize::resize_gray;

/// A decoded image normalized to RGB, with its alpha plane detached
#[derive(Debug, Clone)]
pub struct SplitImage {
    pub rgb: RgbImage,
    pub alpha: Option<GrayImage>,
    /// Channel count of the decoded source (1 = gray, 2 = gray+alpha, 3, 4)
    pub source_channels: u8,
}

impl SplitImage {
    pub fn is_grayscale(&self) -> bool {
        self.source_channels == 1
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }
}

/// Normalize any decoded image to an RGB working buffer.
///
/// Grayscale becomes RGB by replication. Anything carrying alpha (RGBA or
/// gray+alpha) is expanded to RGBA first and then split.
pub fn split_channels(img: DynamicImage) -> SplitImage {
    let color = img.color();
    let source_channels = color.channel_count();

    if color.has_alpha() {
        let (rgb, alpha) = split_rgba(&img.to_rgba8());
        SplitImage {
            rgb,
            alpha: Some(alpha),
            source_channels,
        }
    } else {
        SplitImage {
            rgb: img.to_rgb8(),
            alpha: None,
            source_channels,
        }
    }
}

pub fn split_rgba(rgba: &RgbaImage) -> (RgbImage, GrayImage) {
    let (width, height) = rgba.dimensions();
    let mut rgb = RgbImage::new(width, height);
    let mut alpha = GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        rgb.put_pixel(x, y, Rgb([pixel[0], pixel[1], pixel[2]]));
        alpha.put_pixel(x, y, Luma([pixel[3]]));
    }

    (rgb, alpha)
}

/// Stack an alpha plane into three identical channels so it can go through
/// an RGB-only model
pub fn replicate(alpha: &GrayImage) -> RgbImage {
    let (width, height) = alpha.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let a = alpha.get_pixel(x, y)[0];
        Rgb([a, a, a])
    })
}

/// Reattach an upscaled alpha (first channel of `alpha_rgb`) to the color buffer
pub fn merge(rgb: &RgbImage, alpha_rgb: &RgbImage) -> Result<RgbaImage> {
    let (width, height) = rgb.dimensions();

    let mut alpha = GrayImage::from_fn(alpha_rgb.width(), alpha_rgb.height(), |x, y| {
        Luma([alpha_rgb.get_pixel(x, y)[0]])
    });
    if alpha.dimensions() != (width, height) {
        alpha = resize_gray(&alpha, width, height, FilterType::Bilinear)?;
    }

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let c = rgb.get_pixel(x, y);
        image::Rgba([c[0], c[1], c[2], alpha.get_pixel(x, y)[0]])
    }))
}
