//! Conversion modules for JXR Cleaner

pub mod codec;
pub mod image_codec;
pub mod jxr_codec;
pub mod pipeline;
pub mod rescale;
pub mod ultrahdr;

pub use codec::{
    CodecError, ColorPrimaries, DecodedImage, EncodePreset, GainMapEncoder, GainMapParams,
    ImageCodec, LinearImage, TransferFunction,
};
pub use image_codec::ImageCrateCodec;
pub use jxr_codec::{JxrCodec, JxrPixelLayout};
pub use pipeline::{ConvertError, ConvertReport, Converter, ImageKind, JxrConverter};
pub use rescale::{rescale_linear, rescale_ratio};
pub use ultrahdr::{tone_map_luminance, GainMapMetadata, UltraHdrEncoder};
