//! Pixel <-> world coordinate transform.
//!
//! A single linear model: `origin` is the world position of the image's
//! bottom-left corner and `resolution` is world units per pixel. Image
//! rows grow downward while world `y` grows upward, so the row axis is
//! flipped against `height` (the origin maps to pixel `(0, height)`).
//!
//! `theta` is carried for completeness but never applied; there is no
//! rotation or skew support.
//!
//! # Rounding
//!
//! [`world_to_pixel`] rounds each axis independently with
//! [`f64::round`] (half away from zero). Going world -> pixel -> world is
//! therefore lossy by up to `resolution / 2` per axis. Going
//! pixel -> world -> pixel with integral pixels is exact.

use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, Point};

/// World-space pose of the map's bottom-left pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Origin {
    /// World x of pixel column 0.
    pub x: f64,
    /// World y of the bottom image row.
    pub y: f64,
    /// Heading in radians. Accepted, not used.
    pub theta: f64,
}

/// Linear georeferencing of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Georeference {
    /// World position of the bottom-left pixel.
    pub origin: Origin,
    /// World units per pixel. Never zero.
    pub resolution: f64,
}

impl Georeference {
    /// Create a georeference, checking the transform is usable.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGeoreference`] if `resolution` is
    /// zero or not finite, or if the origin is not finite.
    pub fn new(origin: Origin, resolution: f64) -> Result<Self, PipelineError> {
        if !resolution.is_finite() || resolution == 0.0 {
            return Err(PipelineError::InvalidGeoreference(format!(
                "resolution must be finite and non-zero, got {resolution}"
            )));
        }
        if !origin.x.is_finite() || !origin.y.is_finite() {
            return Err(PipelineError::InvalidGeoreference(format!(
                "origin must be finite, got ({}, {})",
                origin.x, origin.y
            )));
        }
        Ok(Self { origin, resolution })
    }

    /// Parse a georeferencing descriptor.
    ///
    /// Accepts either a JSON object or the line-oriented `key: value`
    /// map metadata format:
    ///
    /// ```text
    /// image: office.pgm
    /// resolution: 0.050000
    /// origin: [-12.2, -9.8, 0.0]
    /// negate: 0
    /// ```
    ///
    /// Only `resolution` and `origin` are read. `origin` may hold two or
    /// three numbers; a missing `theta` is `0`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGeoreference`] if either key is
    /// missing or malformed, or the values fail [`Georeference::new`].
    pub fn from_descriptor(text: &str) -> Result<Self, PipelineError> {
        let fields = if text.trim_start().starts_with('{') {
            serde_json::from_str::<DescriptorFields>(text)
                .map_err(|e| PipelineError::InvalidGeoreference(e.to_string()))?
        } else {
            DescriptorFields::from_key_values(text)?
        };

        let resolution = fields
            .resolution
            .ok_or_else(|| PipelineError::InvalidGeoreference("missing `resolution`".into()))?;
        let origin = fields
            .origin
            .ok_or_else(|| PipelineError::InvalidGeoreference("missing `origin`".into()))?;
        let origin = match origin.as_slice() {
            [x, y] => Origin {
                x: *x,
                y: *y,
                theta: 0.0,
            },
            [x, y, theta] => Origin {
                x: *x,
                y: *y,
                theta: *theta,
            },
            other => {
                return Err(PipelineError::InvalidGeoreference(format!(
                    "`origin` needs 2 or 3 values, got {}",
                    other.len()
                )));
            }
        };

        Self::new(origin, resolution)
    }

    /// Map a world position to pixel space. See [`world_to_pixel`].
    #[must_use]
    pub fn to_pixel(&self, world: Point, height: u32) -> Point {
        world_to_pixel(world.x, world.y, self.origin, self.resolution, height)
    }

    /// Map a pixel position to world space. See [`pixel_to_world`].
    #[must_use]
    pub fn to_world(&self, pixel: Point, height: u32) -> Point {
        pixel_to_world(pixel.x, pixel.y, self.origin, self.resolution, height)
    }
}

/// The subset of descriptor keys the transform needs.
#[derive(Debug, Default, Deserialize)]
struct DescriptorFields {
    resolution: Option<f64>,
    origin: Option<Vec<f64>>,
}

impl DescriptorFields {
    fn from_key_values(text: &str) -> Result<Self, PipelineError> {
        let mut fields = Self::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "resolution" => {
                    fields.resolution = Some(parse_number("resolution", value)?);
                }
                "origin" => {
                    let inner = value
                        .strip_prefix('[')
                        .and_then(|v| v.strip_suffix(']'))
                        .ok_or_else(|| {
                            PipelineError::InvalidGeoreference(format!(
                                "`origin` must be a bracketed list, got {value:?}"
                            ))
                        })?;
                    let values = inner
                        .split(',')
                        .map(|part| parse_number("origin", part.trim()))
                        .collect::<Result<Vec<_>, _>>()?;
                    fields.origin = Some(values);
                }
                _ => {}
            }
        }
        Ok(fields)
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64, PipelineError> {
    value.parse::<f64>().map_err(|_| {
        PipelineError::InvalidGeoreference(format!("`{key}`: {value:?} is not a number"))
    })
}

/// Map world coordinates to pixel coordinates.
///
/// `px = round((x - origin.x) / resolution)`,
/// `py = height - round((y - origin.y) / resolution)`.
///
/// Total over finite input. `resolution` must be non-zero; a zero
/// resolution yields infinite or NaN coordinates.
#[must_use]
pub fn world_to_pixel(
    world_x: f64,
    world_y: f64,
    origin: Origin,
    resolution: f64,
    height: u32,
) -> Point {
    let px = ((world_x - origin.x) / resolution).round();
    let py = f64::from(height) - ((world_y - origin.y) / resolution).round();
    Point::new(px, py)
}

/// Map pixel coordinates to world coordinates.
///
/// `x = px * resolution + origin.x`,
/// `y = (height - py) * resolution + origin.y`.
#[must_use]
pub fn pixel_to_world(px: f64, py: f64, origin: Origin, resolution: f64, height: u32) -> Point {
    let x = px.mul_add(resolution, origin.x);
    let y = (f64::from(height) - py).mul_add(resolution, origin.y);
    Point::new(x, y)
}
