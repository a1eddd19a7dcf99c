//! Image preprocessing filters for OCR optimization
//!
//! Feed bags are glossy, curved and often photographed in a dim barn, so the
//! label is upscaled, flattened to grayscale and contrast-equalized before
//! text recognition.

use crate::config::OcrPreprocessing;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use tracing::debug;

/// Result of preprocessing that includes potentially resized dimensions
pub struct PreprocessResult {
    /// Processed image, always 8-bit RGB
    pub image: RgbImage,
    /// Upscale factor applied (1 = unchanged)
    pub scale: u32,
}

impl PreprocessResult {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Apply preprocessing filters to a label photo based on settings
pub fn apply_preprocessing(image: &DynamicImage, settings: &OcrPreprocessing) -> PreprocessResult {
    if !settings.enabled {
        debug!("OCR preprocessing disabled");
        return PreprocessResult {
            image: image.to_rgb8(),
            scale: 1,
        };
    }

    let scale = upscale_factor(image.width(), image.height(), settings);
    debug!(
        "OCR preprocessing: grayscale={}, equalize={}, sharpen={}, scale={}",
        settings.grayscale, settings.equalize, settings.sharpen, scale
    );

    // Upscale first so the filters work at the final resolution
    let scaled = if scale > 1 {
        image.resize_exact(
            image.width() * scale,
            image.height() * scale,
            FilterType::CatmullRom,
        )
    } else {
        image.clone()
    };

    // Equalization and sharpening operate on luma
    if !(settings.grayscale || settings.equalize || settings.sharpen) {
        return PreprocessResult {
            image: scaled.to_rgb8(),
            scale,
        };
    }

    let mut gray = scaled.to_luma8();
    if settings.equalize {
        gray = imageproc::contrast::equalize_histogram(&gray);
    }
    if settings.sharpen {
        gray = imageproc::filter::sharpen3x3(&gray);
    }

    PreprocessResult {
        image: gray_to_rgb(gray),
        scale,
    }
}

/// Integer upscale needed for the shorter side to reach `min_dimension`
fn upscale_factor(width: u32, height: u32, settings: &OcrPreprocessing) -> u32 {
    let shorter = width.min(height).max(1);
    if shorter >= settings.min_dimension {
        return 1;
    }
    let needed = settings.min_dimension.div_ceil(shorter);
    needed.clamp(1, settings.max_scale.max(1))
}

fn gray_to_rgb(gray: GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(gray).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn settings() -> OcrPreprocessing {
        OcrPreprocessing::default()
    }

    #[test]
    fn test_preprocessing_disabled() {
        let img = RgbImage::from_pixel(2, 2, Rgb([100, 150, 200]));
        let mut s = settings();
        s.enabled = false;
        let result = apply_preprocessing(&DynamicImage::ImageRgb8(img.clone()), &s);
        assert_eq!(result.scale, 1);
        assert_eq!(result.image, img);
    }

    #[test]
    fn test_upscale_factor() {
        let s = settings();
        assert_eq!(upscale_factor(1600, 1200, &s), 1);
        assert_eq!(upscale_factor(600, 400, &s), 2);
        // Capped at max_scale
        assert_eq!(upscale_factor(100, 100, &s), 3);
    }

    #[test]
    fn test_small_label_is_upscaled() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(500, 400));
        let result = apply_preprocessing(&img, &settings());
        assert_eq!(result.scale, 2);
        assert_eq!(result.dimensions(), (1000, 800));
    }

    #[test]
    fn test_grayscale_output_has_equal_channels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(900, 900, Rgb([255, 0, 0])));
        let mut s = settings();
        s.equalize = false;
        let result = apply_preprocessing(&img, &s);
        let px = result.image.get_pixel(10, 10);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn test_equalize_stretches_contrast() {
        let mut gray = GrayImage::new(900, 900);
        for (x, _, p) in gray.enumerate_pixels_mut() {
            *p = Luma([if x < 450 { 100 } else { 110 }]);
        }
        let result = apply_preprocessing(&DynamicImage::ImageLuma8(gray), &settings());
        let dark = result.image.get_pixel(0, 0)[0];
        let light = result.image.get_pixel(899, 0)[0];
        assert!(light - dark > 10);
    }
}
