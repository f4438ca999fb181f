//! Ultra HDR JPEG writer.
//!
//! The output is an SDR base JPEG followed by a gain-map JPEG. The base image
//! carries XMP naming the gain map and an MPF index locating it; the gain map
//! carries the `hdrgm` metadata a viewer needs to rebuild the HDR rendition:
//!
//! ```text
//! hdr = (sdr + offset_sdr) * 2^(min + (max - min) * gain) - offset_hdr
//! ```

use super::codec::{
    CodecError, ColorPrimaries, GainMapEncoder, GainMapParams, LinearImage, TransferFunction,
};
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Luma, Rgb, RgbImage};
use tracing::debug;

/// SDR diffuse white in nits; linear 1.0 in the rescaled source.
const REFERENCE_WHITE_NITS: f32 = 203.0;
/// Added to both renditions before taking their ratio so black stays finite.
const GAIN_OFFSET: f32 = 1.0 / 64.0;
/// Smallest encoded log2 boost range.
const MIN_LOG2_RANGE: f32 = 1.0 / 256.0;
/// Luminance up to which the tone curve is the identity.
const TONE_KNEE: f32 = 0.8;

const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP2: u8 = 0xE2;
const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const MPF_SIGNATURE: &[u8] = b"MPF\0";
/// TIFF header (8) + entry count (2) + three IFD entries (36) + next-IFD offset (4).
const MP_ENTRIES_OFFSET: usize = 50;
/// Two 16-byte MP entries follow the IFD.
const MPF_BODY_LEN: usize = MP_ENTRIES_OFFSET + 32;
/// MP entry attribute for a baseline primary image.
const MP_PRIMARY_IMAGE: u32 = 0x0003_0000;

/// Gain-map range written to the `hdrgm` XMP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapMetadata {
    /// log2 of the smallest boost.
    pub min_log2: f32,
    /// log2 of the largest boost.
    pub max_log2: f32,
}

impl GainMapMetadata {
    fn xmp(&self) -> String {
        format!(
            concat!(
                r#"<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="jxr-cleaner">"#,
                r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">"#,
                r#"<rdf:Description rdf:about="" xmlns:hdrgm="http://ns.adobe.com/hdr-gain-map/1.0/" "#,
                r#"hdrgm:Version="1.0" hdrgm:GainMapMin="{min:.6}" hdrgm:GainMapMax="{max:.6}" "#,
                r#"hdrgm:Gamma="1.0" hdrgm:OffsetSDR="{offset:.6}" hdrgm:OffsetHDR="{offset:.6}" "#,
                r#"hdrgm:HDRCapacityMin="{min:.6}" hdrgm:HDRCapacityMax="{max:.6}" "#,
                r#"hdrgm:BaseRenditionIsHDR="False"/>"#,
                r#"</rdf:RDF></x:xmpmeta>"#
            ),
            min = self.min_log2,
            max = self.max_log2,
            offset = GAIN_OFFSET,
        )
    }
}

fn primary_xmp(gain_map_len: usize) -> String {
    format!(
        concat!(
            r#"<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="jxr-cleaner">"#,
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">"#,
            r#"<rdf:Description rdf:about="" "#,
            r#"xmlns:Container="http://ns.google.com/photos/1.0/container/" "#,
            r#"xmlns:Item="http://ns.google.com/photos/1.0/container/item/" "#,
            r#"xmlns:hdrgm="http://ns.adobe.com/hdr-gain-map/1.0/" hdrgm:Version="1.0">"#,
            r#"<Container:Directory><rdf:Seq>"#,
            r#"<rdf:li rdf:parseType="Resource">"#,
            r#"<Container:Item Item:Semantic="Primary" Item:Mime="image/jpeg"/></rdf:li>"#,
            r#"<rdf:li rdf:parseType="Resource">"#,
            r#"<Container:Item Item:Semantic="GainMap" Item:Mime="image/jpeg" Item:Length="{len}"/>"#,
            r#"</rdf:li></rdf:Seq></Container:Directory></rdf:Description></rdf:RDF></x:xmpmeta>"#
        ),
        len = gain_map_len,
    )
}

/// Gain-map encoder producing Ultra HDR JPEG.
///
/// Expects linear BT.709 input scaled so that 1.0 is SDR reference white.
#[derive(Debug, Default, Clone, Copy)]
pub struct UltraHdrEncoder;

impl GainMapEncoder for UltraHdrEncoder {
    fn encode(&self, image: &LinearImage, params: &GainMapParams) -> Result<Vec<u8>, CodecError> {
        if params.primaries != ColorPrimaries::Bt709 || params.transfer != TransferFunction::Linear
        {
            return Err(CodecError::Unsupported(format!(
                "gain-map input must be linear BT.709, got {:?} / {:?}",
                params.primaries, params.transfer
            )));
        }
        image.validate()?;

        let renditions = split_renditions(image, params);
        debug!(
            width = image.width,
            height = image.height,
            max_log2 = renditions.metadata.max_log2,
            "computed gain map"
        );

        let gain_map = match &renditions.gain_map {
            GainMapImage::Luma(map) => encode_jpeg(map, params.gain_map_quality)?,
            GainMapImage::Rgb(map) => encode_jpeg(map, params.gain_map_quality)?,
        };
        let gain_map = insert_segments(
            &gain_map,
            &app_segment(APP1, &[XMP_SIGNATURE, renditions.metadata.xmp().as_bytes()].concat())?,
        )?;

        let base = encode_jpeg(&renditions.sdr, params.base_quality)?;
        assemble(&base, &gain_map)
    }
}

enum GainMapImage {
    Luma(GrayImage),
    Rgb(RgbImage),
}

struct Renditions {
    sdr: RgbImage,
    gain_map: GainMapImage,
    metadata: GainMapMetadata,
}

fn luminance([r, g, b]: [f32; 3]) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

fn pixel(image: &LinearImage, x: u32, y: u32) -> [f32; 3] {
    let start = y as usize * image.stride + x as usize * 4;
    let sanitize = |v: f32| if v.is_finite() { v.max(0.0) } else { 0.0 };
    [
        sanitize(image.pixels[start].to_f32()),
        sanitize(image.pixels[start + 1].to_f32()),
        sanitize(image.pixels[start + 2].to_f32()),
    ]
}

/// Map HDR luminance to `0..=1`.
///
/// Identity up to the knee, then an extended Reinhard curve that lands
/// `white` exactly on 1.0.
pub fn tone_map_luminance(y: f32, white: f32) -> f32 {
    if y <= TONE_KNEE {
        return y;
    }
    if white <= 1.0 {
        return y.min(1.0);
    }
    let excess = (y - TONE_KNEE) / (1.0 - TONE_KNEE);
    let excess_white = (white - TONE_KNEE) / (1.0 - TONE_KNEE);
    let compressed = excess * (1.0 + excess / (excess_white * excess_white)) / (1.0 + excess);
    (TONE_KNEE + (1.0 - TONE_KNEE) * compressed).min(1.0)
}

fn srgb_encode(linear: f32) -> u8 {
    let v = linear.clamp(0.0, 1.0);
    let encoded = if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

fn srgb_decode(value: u8) -> f32 {
    let v = f32::from(value) / 255.0;
    if v <= 0.040_45 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn log2_gain(hdr: f32, sdr: f32) -> f32 {
    ((hdr + GAIN_OFFSET) / (sdr + GAIN_OFFSET)).log2()
}

fn split_renditions(image: &LinearImage, params: &GainMapParams) -> Renditions {
    let (width, height) = (image.width, image.height);
    let capacity = (params.target_peak_nits / REFERENCE_WHITE_NITS).max(1.0);

    let mut peak: f32 = 1.0;
    for y in 0..height {
        for x in 0..width {
            peak = peak.max(luminance(pixel(image, x, y)));
        }
    }
    let white = peak.min(capacity);

    let channels = if params.multichannel_gain_map { 3 } else { 1 };
    let mut sdr = RgbImage::new(width, height);
    let mut gains = Vec::with_capacity(width as usize * height as usize * channels);
    let mut max_log2: f32 = 0.0;

    for y in 0..height {
        for x in 0..width {
            let hdr = pixel(image, x, y);
            let hdr_luma = luminance(hdr);
            let scale = if hdr_luma > 0.0 {
                tone_map_luminance(hdr_luma, white) / hdr_luma
            } else {
                0.0
            };

            let encoded = hdr.map(|c| srgb_encode(c * scale));
            sdr.put_pixel(x, y, Rgb(encoded));
            // Gains are taken against the quantized base the viewer will see.
            let base = encoded.map(srgb_decode);

            if channels == 3 {
                for c in 0..3 {
                    let gain = log2_gain(hdr[c], base[c]);
                    max_log2 = max_log2.max(gain);
                    gains.push(gain);
                }
            } else {
                let gain = log2_gain(hdr_luma, luminance(base));
                max_log2 = max_log2.max(gain);
                gains.push(gain);
            }
        }
    }

    let metadata = GainMapMetadata {
        min_log2: 0.0,
        max_log2: max_log2.min(capacity.log2()).max(MIN_LOG2_RANGE),
    };
    let range = metadata.max_log2 - metadata.min_log2;
    let quantize =
        |gain: f32| (((gain - metadata.min_log2) / range).clamp(0.0, 1.0) * 255.0).round() as u8;

    let gain_map = if channels == 3 {
        let mut map = RgbImage::new(width, height);
        for (value, out) in gains.chunks_exact(3).zip(map.pixels_mut()) {
            *out = Rgb([quantize(value[0]), quantize(value[1]), quantize(value[2])]);
        }
        GainMapImage::Rgb(map)
    } else {
        let mut map = GrayImage::new(width, height);
        for (value, out) in gains.iter().zip(map.pixels_mut()) {
            *out = Luma([quantize(*value)]);
        }
        GainMapImage::Luma(map)
    };

    Renditions {
        sdr,
        gain_map,
        metadata,
    }
}

fn encode_jpeg<I>(image: &I, quality: u8) -> Result<Vec<u8>, CodecError>
where
    I: image::GenericImageView,
    I::Pixel: image::PixelWithColorType,
{
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

/// Build a JPEG marker segment.
fn app_segment(marker: u8, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let length = u16::try_from(payload.len() + 2)
        .map_err(|_| CodecError::Encode(format!("segment of {} bytes is too large", payload.len())))?;
    let mut segment = Vec::with_capacity(payload.len() + 4);
    segment.extend_from_slice(&[0xFF, marker]);
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(payload);
    Ok(segment)
}

/// Offset just past SOI and a leading JFIF APP0, where new segments go.
fn header_end(jpeg: &[u8]) -> Result<usize, CodecError> {
    if !jpeg.starts_with(&[0xFF, 0xD8]) {
        return Err(CodecError::Encode("encoder output is not a JPEG".to_string()));
    }
    if jpeg.len() >= 6 && jpeg[2] == 0xFF && jpeg[3] == APP0 {
        let length = usize::from(u16::from_be_bytes([jpeg[4], jpeg[5]]));
        return Ok(4 + length);
    }
    Ok(2)
}

fn insert_segments(jpeg: &[u8], segments: &[u8]) -> Result<Vec<u8>, CodecError> {
    let at = header_end(jpeg)?;
    let mut out = Vec::with_capacity(jpeg.len() + segments.len());
    out.extend_from_slice(&jpeg[..at]);
    out.extend_from_slice(segments);
    out.extend_from_slice(&jpeg[at..]);
    Ok(out)
}

fn to_u32(value: usize) -> Result<u32, CodecError> {
    u32::try_from(value).map_err(|_| CodecError::Encode(format!("output of {} bytes is too large", value)))
}

fn ifd_entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: [u8; 4]) {
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&value);
}

/// Big-endian MPF index for a primary image plus one gain map.
///
/// `gain_map_offset` is relative to the start of this structure.
fn mpf_body(primary_len: u32, gain_map_len: u32, gain_map_offset: u32) -> Vec<u8> {
    const UNDEFINED: u16 = 7;
    const LONG: u16 = 4;

    let mut out = Vec::with_capacity(MPF_BODY_LEN);
    out.extend_from_slice(b"MM\0\x2A");
    out.extend_from_slice(&8u32.to_be_bytes());
    out.extend_from_slice(&3u16.to_be_bytes());
    ifd_entry(&mut out, 0xB000, UNDEFINED, 4, *b"0100");
    ifd_entry(&mut out, 0xB001, LONG, 1, 2u32.to_be_bytes());
    ifd_entry(&mut out, 0xB002, UNDEFINED, 32, (MP_ENTRIES_OFFSET as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());

    for (attribute, size, offset) in [
        (MP_PRIMARY_IMAGE, primary_len, 0),
        (0, gain_map_len, gain_map_offset),
    ] {
        out.extend_from_slice(&attribute.to_be_bytes());
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&[0; 4]);
    }
    out
}

/// Stitch the base JPEG and the finished gain-map JPEG into one file.
fn assemble(base: &[u8], gain_map: &[u8]) -> Result<Vec<u8>, CodecError> {
    let at = header_end(base)?;
    let xmp = app_segment(APP1, &[XMP_SIGNATURE, primary_xmp(gain_map.len()).as_bytes()].concat())?;
    let mpf_segment_len = 4 + MPF_SIGNATURE.len() + MPF_BODY_LEN;

    let primary_len = base.len() + xmp.len() + mpf_segment_len;
    let mpf_start = at + xmp.len() + 4 + MPF_SIGNATURE.len();
    let body = mpf_body(
        to_u32(primary_len)?,
        to_u32(gain_map.len())?,
        to_u32(primary_len - mpf_start)?,
    );
    let mpf = app_segment(APP2, &[MPF_SIGNATURE, &body].concat())?;

    let mut out = Vec::with_capacity(primary_len + gain_map.len());
    out.extend_from_slice(&base[..at]);
    out.extend_from_slice(&xmp);
    out.extend_from_slice(&mpf);
    out.extend_from_slice(&base[at..]);
    out.extend_from_slice(gain_map);
    Ok(out)
}
