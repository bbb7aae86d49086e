//! Decoding of encoded camera/drone images (JPEG, PNG, TIFF) into rasters.

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageBuffer, Pixel};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{Raster, VegError, VegResult};

/// Longest side allowed before a loaded image is downsampled
pub const MAX_RASTER_DIMENSION: u32 = 2048;

/// Resampling filter used when downsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResampleFilter> for FilterType {
    fn from(filter: ResampleFilter) -> Self {
        match filter {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Triangle => FilterType::Triangle,
            ResampleFilter::CatmullRom => FilterType::CatmullRom,
            ResampleFilter::Gaussian => FilterType::Gaussian,
            ResampleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Raster loading parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterLoadParams {
    pub max_dimension: u32,
    pub filter: ResampleFilter,
}

impl Default for RasterLoadParams {
    fn default() -> Self {
        Self {
            max_dimension: MAX_RASTER_DIMENSION,
            filter: ResampleFilter::Lanczos3,
        }
    }
}

/// Target size fitting `(width, height)` inside `max_dimension`, aspect preserved.
/// A zero limit is treated as one pixel.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let max_dimension = max_dimension.max(1);
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return (width, height);
    }
    let scale = max_dimension as f64 / longest as f64;
    let fit = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_dimension);
    (fit(width), fit(height))
}

/// Reader for encoded raster images
pub struct RasterReader {
    params: RasterLoadParams,
}

impl RasterReader {
    pub fn new(params: RasterLoadParams) -> Self {
        Self { params }
    }

    /// Reader with the default 2048 px limit and Lanczos filter
    pub fn standard() -> Self {
        Self::new(RasterLoadParams::default())
    }

    pub fn params(&self) -> &RasterLoadParams {
        &self.params
    }

    /// Decode an in-memory buffer
    pub fn read_bytes(&self, bytes: &[u8]) -> VegResult<Raster> {
        if self.params.max_dimension == 0 {
            return Err(VegError::InvalidConfig(
                "max_dimension must be at least 1 pixel".to_string(),
            ));
        }
        let decoded =
            image::load_from_memory(bytes).map_err(|e| VegError::ImageLoad(e.to_string()))?;
        log::debug!(
            "Decoded {}x{} image ({:?})",
            decoded.width(),
            decoded.height(),
            decoded.color()
        );
        self.to_raster(decoded)
    }

    /// Read and decode an image file
    pub fn read_path<P: AsRef<Path>>(&self, path: P) -> VegResult<Raster> {
        log::info!("Reading raster from: {}", path.as_ref().display());
        let bytes = std::fs::read(path.as_ref())?;
        self.read_bytes(&bytes)
    }

    fn to_raster(&self, image: DynamicImage) -> VegResult<Raster> {
        let (width, height) = (image.width(), image.height());
        let (target_w, target_h) = fit_within(width, height, self.params.max_dimension);
        let image = if (target_w, target_h) != (width, height) {
            log::info!(
                "Downsampling {}x{} to {}x{} ({:?})",
                width,
                height,
                target_w,
                target_h,
                self.params.filter
            );
            image.resize_exact(target_w, target_h, self.params.filter.into())
        } else {
            image
        };

        // Alpha is dropped; grayscale keeps a single channel
        match image.color() {
            ColorType::L8 | ColorType::La8 => {
                Ok(Raster::from_integer_pixels(&to_array(image.to_luma8())?))
            }
            ColorType::L16 | ColorType::La16 => {
                Ok(Raster::from_integer_pixels(&to_array(image.to_luma16())?))
            }
            ColorType::Rgb16 | ColorType::Rgba16 => {
                Ok(Raster::from_integer_pixels(&to_array(image.to_rgb16())?))
            }
            ColorType::Rgb32F | ColorType::Rgba32F => {
                let pixels = to_array(image.to_rgb32f())?;
                Ok(Raster::from_float(pixels.mapv(f64::from)))
            }
            _ => Ok(Raster::from_integer_pixels(&to_array(image.to_rgb8())?)),
        }
    }
}

fn to_array<P>(buffer: ImageBuffer<P, Vec<P::Subpixel>>) -> VegResult<Array3<P::Subpixel>>
where
    P: Pixel,
{
    let (width, height) = buffer.dimensions();
    let shape = (height as usize, width as usize, P::CHANNEL_COUNT as usize);
    Array3::from_shape_vec(shape, buffer.into_raw())
        .map_err(|e| VegError::ImageLoad(format!("pixel buffer does not match {:?}: {}", shape, e)))
}

/// Decode a buffer with the default parameters
pub fn load_raster(bytes: &[u8]) -> VegResult<Raster> {
    RasterReader::standard().read_bytes(bytes)
}

pub fn load_raster_from_path<P: AsRef<Path>>(path: P, params: RasterLoadParams) -> VegResult<Raster> {
    RasterReader::new(params).read_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelDomain;
    use image::{ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(4000, 3000, 2048), (2048, 1536));
        assert_eq!(fit_within(3000, 4000, 2048), (1536, 2048));
        assert_eq!(fit_within(800, 600, 2048), (800, 600));
        assert_eq!(fit_within(10000, 1, 2048), (2048, 1));
        assert_eq!(fit_within(4000, 3000, 0), (1, 1));
    }

    #[test]
    fn test_zero_max_dimension_is_config_error() {
        let image = RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();

        let params: RasterLoadParams = serde_json::from_str(r#"{"max_dimension": 0}"#).unwrap();
        let err = RasterReader::new(params).read_bytes(&bytes).unwrap_err();
        assert!(matches!(err, VegError::InvalidConfig(_)));
    }

    #[test]
    fn test_rgba_png_drops_alpha() {
        let image = RgbaImage::from_pixel(4, 3, Rgba([255, 128, 0, 10]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();

        let raster = load_raster(&bytes).unwrap();
        assert_eq!((raster.height(), raster.width(), raster.channels()), (3, 4, 3));
        assert_eq!(raster.domain(), PixelDomain::Integer { bit_depth: 8 });
        assert_eq!(raster.data()[[0, 0, 0]], 255.0);
    }

    #[test]
    fn test_garbage_is_image_load_error() {
        let err = load_raster(b"definitely not an image").unwrap_err();
        assert!(matches!(err, VegError::ImageLoad(msg) if !msg.is_empty()));
    }
}
