//! Frame data structures for captured photos

use std::path::Path;
use std::time::Instant;

use image::{DynamicImage, RgbaImage};

use crate::error::{EquiError, Result};

/// A single still frame from the camera or an uploaded file
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame from RGBA bytes
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Wrap an already decoded image
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(rgba.into_raw(), width, height)
    }

    /// Decode an uploaded image file (JPEG, PNG, ...)
    pub fn from_file(path: &Path) -> Result<Self> {
        let image = image::open(path)?;
        Ok(Self::from_image(&image))
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decoded pixel buffer for the vision adapters
    pub fn to_image(&self) -> Result<DynamicImage> {
        let expected = self.width as usize * self.height as usize * 4;
        if self.data.len() != expected || expected == 0 {
            return Err(EquiError::InvalidInput(format!(
                "frame buffer holds {} bytes, expected {} for {}x{} RGBA",
                self.data.len(),
                expected,
                self.width,
                self.height
            )));
        }
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| EquiError::InvalidInput("frame buffer has invalid dimensions".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip_through_image() {
        let frame = CapturedFrame::new(vec![10; 2 * 3 * 4], 2, 3);
        let image = frame.to_image().unwrap();
        assert_eq!((image.width(), image.height()), (2, 3));
        assert_eq!(frame.dimensions(), (2, 3));
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let frame = CapturedFrame::new(vec![0; 7], 2, 2);
        assert!(matches!(frame.to_image(), Err(EquiError::InvalidInput(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let result = CapturedFrame::from_file(Path::new("/nonexistent/horse.jpg"));
        assert!(result.is_err());
    }
}
