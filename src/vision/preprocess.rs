//! Image preprocessing for the vision models
//!
//! Handles resizing, normalization, and tensor conversion for the detector
//! and segmentation ONNX models.

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array3, Array4};

/// ImageNet channel means, used by the segmentation backbone
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Gray padding value used by YOLO-style letterboxing
const LETTERBOX_FILL: u8 = 114;

/// Geometry of a letterboxed model input, used to map model coordinates
/// back onto the original frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Frame pixels → model pixels
    pub scale: f32,
    /// Horizontal padding (model pixels)
    pub pad_x: f32,
    /// Vertical padding (model pixels)
    pub pad_y: f32,
}

impl Letterbox {
    /// Compute the letterbox for a frame fitted into a square input
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height).max(1) as f32;
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model input space to frame space
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Convert an RGB image to an HWC f32 array scaled to 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &mut Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) {
    for ((_, _, c), value) in image.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Aspect-preserving resize onto a gray square canvas, scaled to 0-1.
/// Returns the NCHW tensor and the geometry needed to undo the transform.
pub fn letterbox(image: &DynamicImage, target: u32) -> (Array4<f32>, Letterbox) {
    let geometry = Letterbox::fit(image.width(), image.height(), target);
    let new_w = ((image.width() as f32 * geometry.scale).round() as u32).clamp(1, target);
    let new_h = ((image.height() as f32 * geometry.scale).round() as u32).clamp(1, target);

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let mut canvas = RgbImage::from_pixel(target, target, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::overlay(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );

    (hwc_to_nchw(&rgb_to_f32(&canvas)), geometry)
}

/// Non-aspect-preserving resize to a square input with ImageNet normalization
pub fn stretch_normalized(image: &DynamicImage, target: u32) -> Array4<f32> {
    let resized = image.resize_exact(target, target, FilterType::Triangle).to_rgb8();
    let mut rgb = rgb_to_f32(&resized);
    normalize(&mut rgb, &IMAGENET_MEAN, &IMAGENET_STD);
    hwc_to_nchw(&rgb)
}
