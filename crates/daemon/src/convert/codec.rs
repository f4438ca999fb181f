//! Image codec interfaces used by the conversion pipeline.

use half::f16;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by decoders and encoders.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The source could not be read or decoded.
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Encoding the output failed.
    #[error("Failed to encode output: {0}")]
    Encode(String),

    /// No encoder is available for this kind of image.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The pixel buffer does not match its declared dimensions.
    #[error("Invalid pixel buffer: {0}")]
    InvalidBuffer(String),
}

/// Linear-light RGBA image with half-float channels.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearImage {
    pub width: u32,
    pub height: u32,
    /// Row length in channel values (at least `width * 4`).
    pub stride: usize,
    pub pixels: Vec<f16>,
}

impl LinearImage {
    /// Build from tightly packed RGBA `f32` samples.
    pub fn from_rgba_f32(width: u32, height: u32, samples: &[f32]) -> Result<Self, CodecError> {
        let stride = width as usize * 4;
        let expected = stride * height as usize;
        if samples.len() != expected {
            return Err(CodecError::InvalidBuffer(format!(
                "expected {} samples for {}x{}, got {}",
                expected,
                width,
                height,
                samples.len()
            )));
        }

        Ok(Self {
            width,
            height,
            stride,
            pixels: samples.iter().map(|v| f16::from_f32(*v)).collect(),
        })
    }

    /// Check that the buffer covers `height` rows of `stride` values.
    pub fn validate(&self) -> Result<(), CodecError> {
        let min_stride = self.width as usize * 4;
        if self.stride < min_stride {
            return Err(CodecError::InvalidBuffer(format!(
                "stride {} shorter than row of {} values",
                self.stride, min_stride
            )));
        }
        if self.pixels.len() < self.stride * self.height as usize {
            return Err(CodecError::InvalidBuffer(format!(
                "{} values cannot hold {} rows of stride {}",
                self.pixels.len(),
                self.height,
                self.stride
            )));
        }
        Ok(())
    }
}

/// A decoded source image.
#[derive(Debug, Clone)]
pub enum DecodedImage {
    /// Standard dynamic range; goes through a plain JPEG transcode.
    Sdr(DynamicImage),
    /// High dynamic range, linear light; goes through gain-map encoding.
    Hdr(LinearImage),
}

/// Decodes sources and encodes SDR JPEG output.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedImage, CodecError>;

    /// Encode an SDR image as JPEG at `quality` (0-100).
    fn encode_sdr(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPrimaries {
    Bt709,
    DisplayP3,
    Bt2100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFunction {
    Linear,
    Pq,
    Hlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePreset {
    BestQuality,
    Realtime,
}

/// Settings handed to a [`GainMapEncoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct GainMapParams {
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
    pub full_range: bool,
    /// Quality of the SDR base image.
    pub base_quality: u8,
    pub gain_map_quality: u8,
    pub target_peak_nits: f32,
    /// One gain map per color channel instead of a single luminance map.
    pub multichannel_gain_map: bool,
    pub preset: EncodePreset,
}

impl GainMapParams {
    /// Parameters for a linear BT.709 source.
    pub fn linear_bt709(base_quality: u8, gain_map_quality: u8, target_peak_nits: f32) -> Self {
        Self {
            primaries: ColorPrimaries::Bt709,
            transfer: TransferFunction::Linear,
            full_range: true,
            base_quality,
            gain_map_quality,
            target_peak_nits,
            multichannel_gain_map: true,
            preset: EncodePreset::BestQuality,
        }
    }
}

/// Encodes a linear HDR image into a single gain-map JPEG.
pub trait GainMapEncoder: Send + Sync {
    fn encode(&self, image: &LinearImage, params: &GainMapParams) -> Result<Vec<u8>, CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_image_from_rgba_f32() {
        let samples = [0.0, 0.5, 1.0, 1.0, 2.0, 4.0, 8.0, 1.0];
        let image = LinearImage::from_rgba_f32(2, 1, &samples).unwrap();

        assert_eq!(image.stride, 8);
        assert_eq!(image.pixels.len(), 8);
        assert_eq!(image.pixels[2].to_f32(), 1.0);
        assert_eq!(image.pixels[6].to_f32(), 8.0);
        assert!(image.validate().is_ok());
    }

    #[test]
    fn test_linear_image_rejects_short_buffer() {
        let result = LinearImage::from_rgba_f32(2, 2, &[0.0; 8]);
        assert!(matches!(result, Err(CodecError::InvalidBuffer(_))));
    }

    #[test]
    fn test_validate_rejects_bad_stride() {
        let image = LinearImage {
            width: 4,
            height: 1,
            stride: 8,
            pixels: vec![f16::ZERO; 16],
        };
        assert!(matches!(image.validate(), Err(CodecError::InvalidBuffer(_))));
    }

    #[test]
    fn test_linear_bt709_params() {
        let params = GainMapParams::linear_bt709(95, 95, 4000.0);
        assert_eq!(params.primaries, ColorPrimaries::Bt709);
        assert_eq!(params.transfer, TransferFunction::Linear);
        assert!(params.full_range);
        assert!(params.multichannel_gain_map);
        assert_eq!(params.preset, EncodePreset::BestQuality);
        assert_eq!(params.base_quality, 95);
        assert_eq!(params.gain_map_quality, 95);
    }
}
