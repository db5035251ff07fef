use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Trait representing either an image or some image data
///
pub trait Image {
    /// Extract an image from the enclosed object
    ///
    fn to_image(&self) -> Result<DynamicImage>;
}

impl Image for Path {
    fn to_image(&self) -> Result<DynamicImage> {
        image::open(self).map_err(From::from)
    }
}

impl Image for PathBuf {
    fn to_image(&self) -> Result<DynamicImage> {
        self.as_path().to_image()
    }
}

impl Image for &str {
    fn to_image(&self) -> Result<DynamicImage> {
        Path::new(self).to_image()
    }
}

impl Image for DynamicImage {
    fn to_image(&self) -> Result<DynamicImage> {
        Ok(self.clone())
    }
}

/// Packed 8-bit RGB pixels in row-major order, three bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbPixels {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbPixels {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::shape(
                "pixels",
                format!(
                    "{}x{} RGB image needs {} bytes, got {}",
                    width,
                    height,
                    expected,
                    data.len()
                ),
            ));
        }
        Ok(RgbPixels {
            width,
            height,
            data,
        })
    }

    /// Convert any decoded image to 8-bit RGB. Alpha is dropped.
    pub fn from_image(img: &DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        RgbPixels {
            width,
            height,
            data: img.to_rgb8().into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Channel values of the pixel at column `x`, row `y`.
    pub fn rgb(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn pixels_are_row_major_rgb() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 0, Rgb([10, 20, 30]));
        img.put_pixel(0, 1, Rgb([40, 50, 60]));

        let pixels = RgbPixels::from_image(&DynamicImage::ImageRgb8(img));
        assert_eq!(pixels.width(), 3);
        assert_eq!(pixels.height(), 2);
        assert_eq!(pixels.data().len(), 18);
        assert_eq!(&pixels.data()[6..9], &[10, 20, 30]);
        assert_eq!(pixels.rgb(0, 1), Some([40, 50, 60]));
        assert_eq!(pixels.rgb(3, 0), None);
    }

    #[test]
    fn alpha_is_dropped() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 0]));
        let pixels = RgbPixels::from_image(&DynamicImage::ImageRgba8(img));
        assert_eq!(pixels.data(), &[1, 2, 3]);
    }

    #[test]
    fn new_checks_length() {
        let err = RgbPixels::new(2, 2, vec![0; 11]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(RgbPixels::new(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn missing_file_is_an_image_error() {
        let err = "/definitely/not/here.png".to_image().unwrap_err();
        assert!(matches!(err, Error::Image(_)));
    }
}
