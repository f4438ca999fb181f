//! JPEG XR decoding.
//!
//! Pixel unpacking and HDR classification live here; reading the bitstream
//! is delegated to jxrlib through the `jpegxr` crate when the `jpegxr`
//! feature is enabled.

use super::codec::{CodecError, DecodedImage, ImageCodec, LinearImage};
use super::image_codec::ImageCrateCodec;
use half::f16;
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// Pixel layouts a JPEG XR capture can decode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JxrPixelLayout {
    Rgb24,
    Bgr24,
    Bgr32,
    Bgra32,
    Rgba32,
    Rgb48Half,
    Rgb64Half,
    Rgba64Half,
    Rgb128Float,
    Rgba128Float,
}

impl JxrPixelLayout {
    /// Match a jxrlib pixel format name such as `GUID_PKPixelFormat64bppRGBAHalf`.
    pub fn from_format_name(name: &str) -> Option<Self> {
        const NAMES: [(&str, JxrPixelLayout); 10] = [
            ("24bppRGB", JxrPixelLayout::Rgb24),
            ("24bppBGR", JxrPixelLayout::Bgr24),
            ("32bppBGR", JxrPixelLayout::Bgr32),
            ("32bppBGRA", JxrPixelLayout::Bgra32),
            ("32bppRGBA", JxrPixelLayout::Rgba32),
            ("48bppRGBHalf", JxrPixelLayout::Rgb48Half),
            ("64bppRGBHalf", JxrPixelLayout::Rgb64Half),
            ("64bppRGBAHalf", JxrPixelLayout::Rgba64Half),
            ("128bppRGBFloat", JxrPixelLayout::Rgb128Float),
            ("128bppRGBAFloat", JxrPixelLayout::Rgba128Float),
        ];
        NAMES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, layout)| *layout)
    }

    /// Half and float layouts carry scene-referred light.
    pub fn is_hdr(self) -> bool {
        matches!(
            self,
            Self::Rgb48Half
                | Self::Rgb64Half
                | Self::Rgba64Half
                | Self::Rgb128Float
                | Self::Rgba128Float
        )
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Bgr32 | Self::Bgra32 | Self::Rgba32 => 4,
            Self::Rgb48Half => 6,
            Self::Rgb64Half | Self::Rgba64Half => 8,
            Self::Rgb128Float | Self::Rgba128Float => 16,
        }
    }

    fn has_alpha(self) -> bool {
        matches!(
            self,
            Self::Bgra32 | Self::Rgba32 | Self::Rgba64Half | Self::Rgba128Float
        )
    }

    /// Unpack rows of `stride` bytes into a decoded image.
    pub fn unpack(
        self,
        width: u32,
        height: u32,
        stride: usize,
        bytes: &[u8],
    ) -> Result<DecodedImage, CodecError> {
        let row = width as usize * self.bytes_per_pixel();
        let needed = match height as usize {
            0 => 0,
            rows => stride * (rows - 1) + row,
        };
        if stride < row || bytes.len() < needed {
            return Err(CodecError::InvalidBuffer(format!(
                "{} bytes with stride {} cannot hold {}x{} {:?}",
                bytes.len(),
                stride,
                width,
                height,
                self
            )));
        }
        let rows = bytes.chunks(stride).take(height as usize);

        if !self.is_hdr() {
            let bgr = matches!(self, Self::Bgr24 | Self::Bgr32 | Self::Bgra32);
            let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
            for line in rows {
                for px in line[..row].chunks_exact(self.bytes_per_pixel()) {
                    if bgr {
                        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                    } else {
                        rgb.extend_from_slice(&px[..3]);
                    }
                }
            }
            return RgbImage::from_raw(width, height, rgb)
                .map(|image| DecodedImage::Sdr(DynamicImage::ImageRgb8(image)))
                .ok_or_else(|| CodecError::InvalidBuffer("short RGB buffer".to_string()));
        }

        let half = matches!(self, Self::Rgb48Half | Self::Rgb64Half | Self::Rgba64Half);
        let sample_size = if half { 2 } else { 4 };
        let read = |bytes: &[u8]| -> f16 {
            if half {
                f16::from_le_bytes([bytes[0], bytes[1]])
            } else {
                f16::from_f32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        };

        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for line in rows {
            for px in line[..row].chunks_exact(self.bytes_per_pixel()) {
                for c in 0..3 {
                    pixels.push(read(&px[c * sample_size..]));
                }
                pixels.push(if self.has_alpha() {
                    read(&px[3 * sample_size..])
                } else {
                    f16::ONE
                });
            }
        }
        Ok(DecodedImage::Hdr(LinearImage {
            width,
            height,
            stride: width as usize * 4,
            pixels,
        }))
    }
}

/// Decodes JPEG XR through jxrlib, anything else through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JxrCodec {
    fallback: ImageCrateCodec,
}

impl ImageCodec for JxrCodec {
    fn decode(&self, path: &Path) -> Result<DecodedImage, CodecError> {
        if is_jpeg_xr(path)? {
            return decode_jpeg_xr(path);
        }
        self.fallback.decode(path)
    }

    fn encode_sdr(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        self.fallback.encode_sdr(image, quality)
    }
}

/// JPEG XR files start with the little-endian TIFF-style `II BC` signature.
fn is_jpeg_xr(path: &Path) -> Result<bool, CodecError> {
    use std::io::Read;

    let mut magic = [0u8; 3];
    let read = std::fs::File::open(path)
        .and_then(|mut file| file.read(&mut magic))
        .map_err(|e| CodecError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    Ok(read == 3 && magic == [0x49, 0x49, 0xBC])
}

#[cfg(feature = "jpegxr")]
fn decode_jpeg_xr(path: &Path) -> Result<DecodedImage, CodecError> {
    use jpegxr::{ImageDecode, Rect};

    let decode_error = |message: String| CodecError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let file = std::fs::File::open(path).map_err(|e| decode_error(e.to_string()))?;
    let mut decoder = ImageDecode::with_reader(file).map_err(|e| decode_error(format!("{:?}", e)))?;
    let (width, height) = decoder
        .get_size()
        .map_err(|e| decode_error(format!("{:?}", e)))?;
    let format = decoder
        .get_pixel_format()
        .map_err(|e| decode_error(format!("{:?}", e)))?;

    let name = format!("{:?}", format);
    let layout = JxrPixelLayout::from_format_name(&name)
        .ok_or_else(|| CodecError::Unsupported(format!("JPEG XR pixel format {}", name)))?;
    let (w, h) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(decode_error(format!("invalid size {}x{}", width, height))),
    };

    let stride = w as usize * layout.bytes_per_pixel();
    let mut buffer = vec![0u8; stride * h as usize];
    decoder
        .copy(&Rect::new(0, 0, width, height), &mut buffer, stride)
        .map_err(|e| decode_error(format!("{:?}", e)))?;
    layout.unpack(w, h, stride, &buffer)
}

#[cfg(not(feature = "jpegxr"))]
fn decode_jpeg_xr(path: &Path) -> Result<DecodedImage, CodecError> {
    Err(CodecError::Unsupported(format!(
        "{} is JPEG XR; rebuild with the `jpegxr` feature to decode it",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_names() {
        assert_eq!(
            JxrPixelLayout::from_format_name("GUID_PKPixelFormat64bppRGBAHalf"),
            Some(JxrPixelLayout::Rgba64Half)
        );
        assert_eq!(
            JxrPixelLayout::from_format_name("PixelFormat32bppBGRA"),
            Some(JxrPixelLayout::Bgra32)
        );
        assert_eq!(
            JxrPixelLayout::from_format_name("PixelFormat32bppBGR"),
            Some(JxrPixelLayout::Bgr32)
        );
        assert_eq!(JxrPixelLayout::from_format_name("PixelFormat16bppGray"), None);
    }

    #[test]
    fn test_half_and_float_layouts_are_hdr() {
        let hdr = [
            JxrPixelLayout::Rgb48Half,
            JxrPixelLayout::Rgb64Half,
            JxrPixelLayout::Rgba64Half,
            JxrPixelLayout::Rgb128Float,
            JxrPixelLayout::Rgba128Float,
        ];
        for layout in hdr {
            assert!(layout.is_hdr(), "{:?}", layout);
        }
        for layout in [
            JxrPixelLayout::Rgb24,
            JxrPixelLayout::Bgr24,
            JxrPixelLayout::Bgr32,
            JxrPixelLayout::Bgra32,
            JxrPixelLayout::Rgba32,
        ] {
            assert!(!layout.is_hdr(), "{:?}", layout);
        }
    }

    #[test]
    fn test_bgra_unpacks_to_rgb() {
        // Two pixels per row, one byte of row padding.
        let bytes = [10, 20, 30, 255, 40, 50, 60, 255, 0, 1, 2, 3, 255, 4, 5, 6, 255, 0];
        let decoded = JxrPixelLayout::Bgra32.unpack(2, 2, 9, &bytes).unwrap();
        let DecodedImage::Sdr(image) = decoded else {
            panic!("BGRA is SDR");
        };
        let rgb = image.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(1, 1).0, [6, 5, 4]);
    }

    #[test]
    fn test_half_rgba_unpacks_to_linear() {
        let mut bytes = Vec::new();
        for v in [2.5f32, 0.5, 0.0, 1.0] {
            bytes.extend_from_slice(&f16::from_f32(v).to_le_bytes());
        }
        let decoded = JxrPixelLayout::Rgba64Half.unpack(1, 1, 8, &bytes).unwrap();
        let DecodedImage::Hdr(image) = decoded else {
            panic!("half float is HDR");
        };
        assert_eq!(image.pixels[0].to_f32(), 2.5);
        assert_eq!(image.pixels[1].to_f32(), 0.5);
        assert_eq!(image.pixels[3].to_f32(), 1.0);
    }

    #[test]
    fn test_float_rgb_gets_opaque_alpha() {
        let mut bytes = Vec::new();
        for v in [4.0f32, 1.0, 0.25, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let decoded = JxrPixelLayout::Rgb128Float.unpack(1, 1, 16, &bytes).unwrap();
        let DecodedImage::Hdr(image) = decoded else {
            panic!("float is HDR");
        };
        assert_eq!(image.pixels[0].to_f32(), 4.0);
        assert_eq!(image.pixels[3], f16::ONE);
        assert!(image.validate().is_ok());
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let result = JxrPixelLayout::Rgb24.unpack(4, 4, 12, &[0; 20]);
        assert!(matches!(result, Err(CodecError::InvalidBuffer(_))));
    }

    #[test]
    fn test_non_jxr_content_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.jxr");
        image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        let decoded = JxrCodec::default().decode(&path).unwrap();
        assert!(matches!(decoded, DecodedImage::Sdr(_)));
    }

    #[cfg(not(feature = "jpegxr"))]
    #[test]
    fn test_jxr_content_without_decoder_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.jxr");
        std::fs::write(&path, [0x49, 0x49, 0xBC, 0x01, 0, 0, 0, 0]).unwrap();

        let result = JxrCodec::default().decode(&path);
        assert!(matches!(result, Err(CodecError::Unsupported(_))));
    }
}
