//! Conversion pipeline: decode, branch on dynamic range, encode, replace.

use super::codec::{CodecError, DecodedImage, GainMapEncoder, GainMapParams, ImageCodec};
use super::rescale::{rescale_linear, rescale_ratio};
use crate::replace::{replace_with_output, ReplaceError, ReplaceOutcome, ReplacePaths};
use crate::scan::ExtensionRule;
use jxr_cleaner_config::HdrConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for a single conversion.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source disappeared before conversion started.
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Replace(#[from] ReplaceError),
}

/// Dynamic range of a converted source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Sdr,
    Hdr,
}

/// Result of a successful conversion.
#[derive(Debug, PartialEq, Eq)]
pub struct ConvertReport {
    pub kind: ImageKind,
    pub replace: ReplaceOutcome,
}

/// Converts one source file into its output, replacing the source.
pub trait Converter: Send + Sync {
    fn convert(&self, source: &Path, quality: u8) -> Result<ConvertReport, ConvertError>;
}

/// Gain-map settings derived from `[hdr]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HdrSettings {
    pub gain_map_quality: u8,
    pub target_peak_nits: f32,
    pub rescale_ratio: f32,
}

impl From<&HdrConfig> for HdrSettings {
    fn from(config: &HdrConfig) -> Self {
        Self {
            gain_map_quality: config.gain_map_quality,
            target_peak_nits: config.target_peak_nits,
            rescale_ratio: rescale_ratio(config.source_white_nits, config.reference_white_nits),
        }
    }
}

impl Default for HdrSettings {
    fn default() -> Self {
        Self::from(&HdrConfig::default())
    }
}

/// The daemon's converter.
///
/// SDR sources are transcoded to JPEG by the [`ImageCodec`]. HDR sources are
/// rescaled to the encoder's reference white and handed to the
/// [`GainMapEncoder`]; without one the conversion fails as unsupported.
pub struct JxrConverter {
    codec: Arc<dyn ImageCodec>,
    gain_map: Option<Arc<dyn GainMapEncoder>>,
    rule: ExtensionRule,
    hdr: HdrSettings,
}

impl JxrConverter {
    pub fn new(codec: Arc<dyn ImageCodec>, rule: ExtensionRule, hdr: HdrSettings) -> Self {
        Self {
            codec,
            gain_map: None,
            rule,
            hdr,
        }
    }

    pub fn with_gain_map_encoder(mut self, encoder: Arc<dyn GainMapEncoder>) -> Self {
        self.gain_map = Some(encoder);
        self
    }

    fn encode(&self, decoded: DecodedImage, quality: u8) -> Result<(ImageKind, Vec<u8>), CodecError> {
        match decoded {
            DecodedImage::Sdr(image) => Ok((ImageKind::Sdr, self.codec.encode_sdr(&image, quality)?)),
            DecodedImage::Hdr(mut linear) => {
                let encoder = self.gain_map.as_ref().ok_or_else(|| {
                    CodecError::Unsupported("HDR source but no gain-map encoder is configured".to_string())
                })?;
                linear.validate()?;
                rescale_linear(&mut linear.pixels, self.hdr.rescale_ratio);

                let params = GainMapParams::linear_bt709(
                    quality,
                    self.hdr.gain_map_quality,
                    self.hdr.target_peak_nits,
                );
                Ok((ImageKind::Hdr, encoder.encode(&linear, &params)?))
            }
        }
    }
}

impl Converter for JxrConverter {
    fn convert(&self, source: &Path, quality: u8) -> Result<ConvertReport, ConvertError> {
        if !source.exists() {
            return Err(ConvertError::SourceMissing(source.to_path_buf()));
        }

        let decoded = self.codec.decode(source)?;
        let (kind, bytes) = self.encode(decoded, quality)?;
        debug!(path = %source.display(), ?kind, bytes = bytes.len(), "encoded output");

        let paths = ReplacePaths {
            source: source.to_path_buf(),
            temp: self.rule.temp_output(source),
            output: self.rule.converted_counterpart(source),
        };
        let replace = replace_with_output(&paths, &bytes)?;

        info!(
            source = %source.display(),
            output = %replace.output().display(),
            ?kind,
            "converted"
        );
        Ok(ConvertReport { kind, replace })
    }
}
