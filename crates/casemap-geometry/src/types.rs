//! Shared types for the casemap geometry pipeline.

use serde::{Deserialize, Serialize};

use crate::cleanup::CleanupConfig;
use crate::contour::ContourTracerKind;
use crate::lines::LineDetectionConfig;
use crate::raster::FormatError;

/// Re-export `GrayImage` so downstream crates can reference raster
/// data without depending on `image` directly.
pub use image::GrayImage;

/// A 2D point.
///
/// Used for both pixel-space and world-space values. Which space a point
/// lives in is decided by the structure holding it, never mixed within one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Point with both coordinates set to NaN.
    ///
    /// Marks a position that could not be derived; display layers hide it.
    #[must_use]
    pub const fn nan() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }

    /// Returns `true` if both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A sequence of connected points in pixel space.
///
/// There is no explicit closed flag: a contour is closed when its first
/// and last points coincide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

/// Contours are polylines in pixel space.
pub type Contour = Polyline;

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the polyline and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Returns `true` if the polyline has at least three points and its
    /// endpoints coincide.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match (self.0.first(), self.0.last()) {
            (Some(first), Some(last)) if self.0.len() >= 3 => first == last,
            _ => false,
        }
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The renderable artifact of a map load: contours in pixel space plus
/// the declared raster size they live in.
///
/// Recomputed on every read; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapGeometry {
    /// Raster width as declared by the header.
    pub width: u32,
    /// Raster height as declared by the header.
    pub height: u32,
    /// Simplified contour polylines.
    pub contours: Vec<Contour>,
}

impl MapGeometry {
    /// Dimensions of the raster the contours were traced on.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

/// Configuration for a map load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Iso-level separating foreground from background samples.
    pub threshold: u8,

    /// Ramer-Douglas-Peucker simplification tolerance in pixels.
    pub simplify_tolerance: f64,

    /// Which contour tracing algorithm to use.
    pub contour_tracer: ContourTracerKind,

    /// Noise removal and gap filling applied before tracing.
    /// `None` traces the raster as decoded.
    pub cleanup: Option<CleanupConfig>,

    /// Straight wall detection on the (cleaned) grid. `None` skips it.
    pub line_detection: Option<LineDetectionConfig>,
}

impl MapConfig {
    /// Default iso-level threshold.
    pub const DEFAULT_THRESHOLD: u8 = 127;

    /// Default simplification tolerance in pixels.
    pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 1.0;

    /// Check the configuration for values the pipeline cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the simplification
    /// tolerance is negative or not finite, or if the cleanup or line
    /// detection settings are invalid.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.simplify_tolerance.is_finite() || self.simplify_tolerance < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "simplify_tolerance must be finite and >= 0, got {}",
                self.simplify_tolerance
            )));
        }
        if let Some(cleanup) = &self.cleanup {
            cleanup.validate()?;
        }
        if let Some(line_detection) = &self.line_detection {
            line_detection.validate()?;
        }
        Ok(())
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            simplify_tolerance: Self::DEFAULT_SIMPLIFY_TOLERANCE,
            contour_tracer: ContourTracerKind::default(),
            cleanup: None,
            line_detection: None,
        }
    }
}

/// Non-fatal irregularities found while loading a map.
///
/// These never abort a load; they are collected alongside the result
/// and logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The raster body held fewer samples than the header declared.
    PartialData {
        /// `width * height` from the header.
        expected: usize,
        /// Samples actually decoded.
        actual: usize,
    },
    /// Contour extraction failed and an empty contour set was substituted.
    GeometryExtraction {
        /// Why extraction failed.
        reason: String,
    },
    /// An optional stage could not run and was left out.
    StageSkipped {
        /// Stage name, e.g. `"cleanup"`.
        stage: String,
        /// Why the stage did not run.
        reason: String,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PartialData { expected, actual } => {
                write!(f, "raster truncated: {actual} of {expected} samples")
            }
            Self::GeometryExtraction { reason } => {
                write!(f, "contour extraction skipped: {reason}")
            }
            Self::StageSkipped { stage, reason } => write!(f, "{stage} skipped: {reason}"),
        }
    }
}

/// Errors that can occur in the geometry pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The raster header is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The georeferencing descriptor is unusable.
    #[error("invalid georeference: {0}")]
    InvalidGeoreference(String),

    /// Contour tracing could not run on the given grid.
    #[error("contour extraction failed: {0}")]
    GeometryExtraction(String),

    /// An evidence payload was not a list of records.
    #[error("invalid evidence payload: {0}")]
    InvalidEvidencePayload(String),

    /// Line detection could not run on the given image.
    #[error("line detection failed: {0}")]
    LineDetection(String),

    /// Pipeline configuration is invalid.
    #[error("invalid map configuration: {0}")]
    InvalidConfig(String),
}
