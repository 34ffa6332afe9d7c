//! Two-tone occupancy raster decoding.
//!
//! Parses the portable graymap family in its two single-channel variants:
//!
//! - `P2`: plain ASCII decimal samples
//! - `P5`: raw binary samples, one unsigned byte each
//!
//! The header is a sequence of whitespace-delimited ASCII tokens (format
//! tag, width, height, max sample). `#` starts a comment that runs to the
//! next line feed. Exactly one whitespace byte after the max-sample token
//! separates the header from the body.
//!
//! Only a malformed header is fatal. A short body decodes whatever samples
//! are present and reports [`Warning::PartialData`]; callers must treat
//! [`Raster::samples`] length, not `width * height`, as authoritative.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Dimensions, GrayImage, Warning};

/// Value conventionally stored for cells of unknown occupancy.
///
/// Used to pad missing samples when a truncated raster is rendered.
pub const UNKNOWN_SAMPLE: u8 = 205;

/// Largest declared grid, in pixels, that may be rendered to an image.
///
/// Headers are untrusted: a two-byte body can declare billions of
/// pixels. Decoding is bounded by the bytes present, but anything that
/// materializes the declared grid checks this limit first.
pub const MAX_RENDER_PIXELS: usize = 1 << 26;

/// Fatal raster header errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The magic token is not one of the supported sub-formats.
    #[error("unsupported raster format tag {tag:?} (expected P2 or P5)")]
    UnsupportedFormat {
        /// The token found where the format tag was expected.
        tag: String,
    },

    /// A numeric header field did not parse as a base-10 integer.
    #[error("invalid raster header field `{field}`: {token:?}")]
    InvalidHeaderField {
        /// Which header field failed.
        field: &'static str,
        /// The offending token (empty when input ended early).
        token: String,
    },
}

/// The declared grid is too large to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("raster of {width}x{height} exceeds the {MAX_RENDER_PIXELS}-pixel render limit")]
pub struct RasterTooLarge {
    /// Declared width.
    pub width: u32,
    /// Declared height.
    pub height: u32,
}

/// Sample encoding of the raster body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleEncoding {
    /// `P2`: whitespace-delimited decimal integers.
    Ascii,
    /// `P5`: one raw byte per sample.
    Binary,
}

impl SampleEncoding {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "P2" => Some(Self::Ascii),
            "P5" => Some(Self::Binary),
            _ => None,
        }
    }

    /// Header tag naming this encoding.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Ascii => "P2",
            Self::Binary => "P5",
        }
    }
}

/// A decoded intensity grid, row-major with a top-left origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raster {
    /// Width declared by the header.
    pub width: u32,
    /// Height declared by the header.
    pub height: u32,
    /// Max sample declared by the header.
    pub max_sample: u32,
    /// Decoded samples. May be shorter than `width * height`.
    pub samples: Vec<u8>,
}

impl Raster {
    /// Build a raster from an in-memory grayscale image.
    #[must_use]
    pub fn from_gray_image(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            max_sample: u32::from(u8::MAX),
            samples: image.as_raw().clone(),
        }
    }

    /// Declared dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// `width * height` as declared by the header.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Returns `true` if fewer samples were decoded than declared.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.samples.len() < self.expected_len()
    }

    /// Number of rows fully covered by decoded samples.
    #[must_use]
    pub fn complete_rows(&self) -> u32 {
        if self.width == 0 {
            return 0;
        }
        let rows = self.samples.len() / self.width as usize;
        u32::try_from(rows).map_or(self.height, |r| r.min(self.height))
    }

    /// Sample at `(x, y)`, or `None` outside the decoded data.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize) * (self.width as usize) + (x as usize);
        self.samples.get(index).copied()
    }

    /// Check that the declared grid fits under [`MAX_RENDER_PIXELS`].
    ///
    /// # Errors
    ///
    /// Returns [`RasterTooLarge`] when `width * height` exceeds the limit.
    pub const fn check_renderable(&self) -> Result<(), RasterTooLarge> {
        let pixels = (self.width as usize).saturating_mul(self.height as usize);
        if pixels > MAX_RENDER_PIXELS {
            return Err(RasterTooLarge {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Render the declared grid as a grayscale image.
    ///
    /// Samples missing from a truncated body are filled with
    /// [`UNKNOWN_SAMPLE`]; surplus samples are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RasterTooLarge`] if the declared grid exceeds
    /// [`MAX_RENDER_PIXELS`].
    pub fn to_gray_image(&self) -> Result<GrayImage, RasterTooLarge> {
        self.check_renderable()?;
        Ok(GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([self.get(x, y).unwrap_or(UNKNOWN_SAMPLE)])
        }))
    }
}

/// Result of decoding a raster blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The decoded raster.
    pub raster: Raster,
    /// Sample encoding named by the header.
    pub encoding: SampleEncoding,
    /// Non-fatal irregularities found in the body.
    pub warnings: Vec<Warning>,
}

/// Decode a raster blob.
///
/// # Errors
///
/// Returns [`FormatError::UnsupportedFormat`] if the first token is not
/// `P2` or `P5`, and [`FormatError::InvalidHeaderField`] if width, height,
/// or max sample does not parse as a base-10 integer.
pub fn decode(bytes: &[u8]) -> Result<Decoded, FormatError> {
    let mut scanner = Scanner::new(bytes);

    let tag = String::from_utf8_lossy(scanner.next_token().unwrap_or_default());
    let encoding =
        SampleEncoding::from_tag(&tag).ok_or_else(|| FormatError::UnsupportedFormat {
            tag: tag.clone().into_owned(),
        })?;

    let width = scanner.header_field("width")?;
    let height = scanner.header_field("height")?;
    let max_sample = scanner.header_field("max_sample")?;

    scanner.skip_single_whitespace();

    let expected = (width as usize).saturating_mul(height as usize);
    let samples = match encoding {
        SampleEncoding::Binary => {
            let body = scanner.remaining();
            body[..expected.min(body.len())].to_vec()
        }
        SampleEncoding::Ascii => scanner.ascii_samples(expected),
    };

    let mut warnings = Vec::new();
    if samples.len() < expected {
        warn!(
            expected,
            actual = samples.len(),
            "raster body shorter than header declares"
        );
        warnings.push(Warning::PartialData {
            expected,
            actual: samples.len(),
        });
    }

    debug!(width, height, max_sample, ?encoding, "decoded raster");

    Ok(Decoded {
        raster: Raster {
            width,
            height,
            max_sample,
            samples,
        },
        encoding,
        warnings,
    })
}

/// Whitespace and comment aware token scanner over a byte slice.
struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    const fn is_space(byte: u8) -> bool {
        matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
    }

    /// Skip runs of whitespace and `#` comments.
    fn skip_separators(&mut self) {
        while let Some(&byte) = self.bytes.get(self.pos) {
            if Self::is_space(byte) {
                self.pos += 1;
            } else if byte == b'#' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Option<&'a [u8]> {
        self.skip_separators();
        let start = self.pos;
        while let Some(&byte) = self.bytes.get(self.pos) {
            if Self::is_space(byte) || byte == b'#' {
                break;
            }
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.bytes[start..self.pos])
    }

    fn header_field(&mut self, field: &'static str) -> Result<u32, FormatError> {
        let token = self.next_token().unwrap_or_default();
        let text = String::from_utf8_lossy(token);
        text.trim()
            .parse::<u32>()
            .map_err(|_| FormatError::InvalidHeaderField {
                field,
                token: text.into_owned(),
            })
    }

    fn skip_single_whitespace(&mut self) {
        if self
            .bytes
            .get(self.pos)
            .is_some_and(|&byte| Self::is_space(byte))
        {
            self.pos += 1;
        }
    }

    fn remaining(&self) -> &'a [u8] {
        self.bytes.get(self.pos..).unwrap_or_default()
    }

    /// Collect up to `limit` decimal samples, skipping non-numeric tokens.
    ///
    /// Values above 255 saturate.
    fn ascii_samples(&mut self, limit: usize) -> Vec<u8> {
        let mut samples = Vec::with_capacity(limit.min(self.remaining().len() / 2 + 1));
        while samples.len() < limit {
            let Some(token) = self.next_token() else {
                break;
            };
            let Ok(value) = std::str::from_utf8(token)
                .unwrap_or_default()
                .parse::<u32>()
            else {
                continue;
            };
            samples.push(u8::try_from(value).unwrap_or(u8::MAX));
        }
        samples
    }
}
