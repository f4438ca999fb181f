//! Codec backed by the `image` crate.

use super::codec::{CodecError, DecodedImage, ImageCodec, LinearImage};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::path::Path;

/// Decodes anything the `image` crate understands and writes baseline JPEG.
///
/// The format is detected from file content, so a PNG or EXR payload saved
/// under the source extension still decodes.
///
/// 32-bit float layouts (OpenEXR, Radiance HDR) are classified as HDR; every
/// other layout is SDR.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, path: &Path) -> Result<DecodedImage, CodecError> {
        let decode_error = |message: String| CodecError::Decode {
            path: path.to_path_buf(),
            message,
        };
        // Sniff the format from content; sources carry an extension the
        // decoder registry may not know.
        let image = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| decode_error(e.to_string()))?
            .decode()
            .map_err(|e| decode_error(e.to_string()))?;

        if !matches!(
            image,
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
        ) {
            return Ok(DecodedImage::Sdr(image));
        }

        let rgba = image.to_rgba32f();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage::Hdr(LinearImage::from_rgba_f32(
            width,
            height,
            rgba.as_raw(),
        )?))
    }

    fn encode_sdr(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        // JPEG has no alpha channel.
        let rgb = image.to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }
}
