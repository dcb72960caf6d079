//! Image preprocessing
//!
//! Decoded bytes → RGB → square resize (bilinear) → per-channel normalization,
//! flattened in CHW order.

use image::{imageops::FilterType, DynamicImage};

use crate::checkpoint::ModelInfo;
use crate::utils::error::{Error, Result};

/// Resize and normalization parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Preprocessor {
    pub fn from_info(info: &ModelInfo) -> Self {
        Self {
            image_size: info.input_size as u32,
            mean: info.mean,
            std: info.std,
        }
    }

    /// Decode uploaded bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(Error::Image("empty image payload".into()));
        }
        Ok(image::load_from_memory(bytes)?)
    }

    /// Decode, resize and normalize uploaded bytes
    pub fn process_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let image = self.decode(bytes)?;
        Ok(self.process(&image))
    }

    /// Resize and normalize a decoded image into a CHW vector
    pub fn process(&self, image: &DynamicImage) -> Vec<f32> {
        let resized = image.resize_exact(self.image_size, self.image_size, FilterType::Triangle);
        self.normalize(&resized)
    }

    fn normalize(&self, image: &DynamicImage) -> Vec<f32> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let num_pixels = (width * height) as usize;

        let mut normalized = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                // CHW layout: all R values, then all G values, then all B values
                normalized[c * num_pixels + i] =
                    (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
            }
        }

        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn preprocessor(size: u32) -> Preprocessor {
        Preprocessor {
            image_size: size,
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.25, 0.5],
        }
    }

    #[test]
    fn test_output_is_chw_sized() {
        let values = preprocessor(16).process_bytes(&png(40, 20, [0, 0, 0])).unwrap();
        assert_eq!(values.len(), 3 * 16 * 16);
    }

    #[test]
    fn test_channels_are_normalized_separately() {
        let values = preprocessor(4).process_bytes(&png(8, 8, [255, 0, 255])).unwrap();
        let plane = 16;
        assert!(values[..plane].iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(values[plane..2 * plane].iter().all(|v| (v + 2.0).abs() < 1e-5));
        assert!(values[2 * plane..].iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_grayscale_is_converted_to_rgb() {
        let gray = image::GrayImage::from_pixel(5, 5, image::Luma([128]));
        let values = preprocessor(5).process(&DynamicImage::ImageLuma8(gray));
        assert_eq!(values.len(), 75);
    }

    #[test]
    fn test_invalid_bytes_are_rejected() {
        assert!(matches!(
            preprocessor(8).process_bytes(b"not an image"),
            Err(Error::Image(_))
        ));
        assert!(matches!(preprocessor(8).process_bytes(&[]), Err(Error::Image(_))));
    }
}
