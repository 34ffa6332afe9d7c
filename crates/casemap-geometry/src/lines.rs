//! Straight wall detection: Canny edges plus Hough line segments.
//!
//! Complements contour tracing for maps whose walls are long straight
//! runs. The grid is blurred, edges are found with
//! [`imageproc::edges::canny`], infinite lines are voted with
//! [`imageproc::hough::detect_lines`], and each line is then walked
//! across the edge image and cut into segments that edge pixels actually
//! support.

use image::GrayImage;
use imageproc::hough::{LineDetectionOptions, PolarLine};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{PipelineError, Point};

/// Largest image side the Hough accumulator accepts.
///
/// `detect_lines` sums the squared sides in `u32`.
const MAX_HOUGH_SIDE: u32 = 46_340;

/// Parameters for [`detect_line_segments`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineDetectionConfig {
    /// Gaussian pre-blur sigma. `0` skips the blur.
    pub blur_sigma: f32,

    /// Canny hysteresis low threshold. Must be positive.
    pub canny_low: f32,

    /// Canny hysteresis high threshold. Must be at least `canny_low`.
    pub canny_high: f32,

    /// Minimum Hough accumulator votes for a line.
    pub vote_threshold: u32,

    /// Non-maximum suppression radius in the Hough accumulator.
    pub suppression_radius: u32,

    /// Shortest segment kept, in pixels.
    pub min_line_length: f64,

    /// Longest stretch without edge support bridged inside one segment,
    /// in pixels.
    pub max_line_gap: f64,
}

impl LineDetectionConfig {
    /// Sigma of a 5x5 Gaussian kernel with derived sigma.
    pub const DEFAULT_BLUR_SIGMA: f32 = 1.1;

    /// Default Canny low threshold.
    pub const DEFAULT_CANNY_LOW: f32 = 30.0;

    /// Default Canny high threshold.
    pub const DEFAULT_CANNY_HIGH: f32 = 100.0;

    /// Default Hough vote threshold.
    pub const DEFAULT_VOTE_THRESHOLD: u32 = 50;

    /// Default Hough suppression radius.
    pub const DEFAULT_SUPPRESSION_RADIUS: u32 = 8;

    /// Default minimum segment length in pixels.
    pub const DEFAULT_MIN_LINE_LENGTH: f64 = 30.0;

    /// Default maximum bridged gap in pixels.
    pub const DEFAULT_MAX_LINE_GAP: f64 = 20.0;

    /// Check the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the blur sigma is
    /// negative or not finite, `canny_low` is not positive,
    /// `canny_high < canny_low`, or a length is negative or not finite.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "line detection blur_sigma must be finite and >= 0, got {}",
                self.blur_sigma
            )));
        }
        // imageproc's hysteresis walks off the image edge when the low
        // threshold admits zero-gradient border pixels.
        if !self.canny_low.is_finite() || self.canny_low <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "line detection canny_low must be > 0, got {}",
                self.canny_low
            )));
        }
        if !self.canny_high.is_finite() || self.canny_high < self.canny_low {
            return Err(PipelineError::InvalidConfig(format!(
                "line detection canny_high must be >= canny_low ({}), got {}",
                self.canny_low, self.canny_high
            )));
        }
        if self.vote_threshold == 0 {
            return Err(PipelineError::InvalidConfig(
                "line detection vote_threshold must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("min_line_length", self.min_line_length),
            ("max_line_gap", self.max_line_gap),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "line detection {name} must be finite and >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for LineDetectionConfig {
    fn default() -> Self {
        Self {
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            vote_threshold: Self::DEFAULT_VOTE_THRESHOLD,
            suppression_radius: Self::DEFAULT_SUPPRESSION_RADIUS,
            min_line_length: Self::DEFAULT_MIN_LINE_LENGTH,
            max_line_gap: Self::DEFAULT_MAX_LINE_GAP,
        }
    }
}

/// A straight segment in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    /// One endpoint.
    pub start: Point,
    /// The other endpoint.
    pub end: Point,
}

impl LineSegment {
    /// Euclidean length in pixels.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }
}

/// Output of [`detect_line_segments`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineDetection {
    /// Binary Canny edge map: edges 255, background 0.
    pub edges: GrayImage,
    /// Segments supported by the edge map.
    pub segments: Vec<LineSegment>,
}

impl LineDetection {
    /// Number of edge pixels.
    #[must_use]
    pub fn edge_pixel_count(&self) -> u64 {
        self.edges.pixels().filter(|p| p.0[0] > 0).count() as u64
    }
}

/// Detect straight line segments in a grayscale map.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for invalid parameters, and
/// [`PipelineError::LineDetection`] if the image is smaller than 3x3 or
/// has a side longer than the Hough accumulator supports.
pub fn detect_line_segments(
    image: &GrayImage,
    config: &LineDetectionConfig,
) -> Result<LineDetection, PipelineError> {
    config.validate()?;

    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return Err(PipelineError::LineDetection(format!(
            "need at least a 3x3 image, got {width}x{height}"
        )));
    }
    if width > MAX_HOUGH_SIDE || height > MAX_HOUGH_SIDE {
        return Err(PipelineError::LineDetection(format!(
            "image sides must be at most {MAX_HOUGH_SIDE}, got {width}x{height}"
        )));
    }

    let blurred = if config.blur_sigma > 0.0 {
        imageproc::filter::gaussian_blur_f32(image, config.blur_sigma)
    } else {
        image.clone()
    };
    let edges = imageproc::edges::canny(&blurred, config.canny_low, config.canny_high);

    let lines = imageproc::hough::detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: config.vote_threshold,
            suppression_radius: config.suppression_radius,
        },
    );

    let segments: Vec<LineSegment> = lines
        .iter()
        .flat_map(|line| {
            segments_along(&edges, line, config.min_line_length, config.max_line_gap)
        })
        .collect();

    debug!(
        lines = lines.len(),
        segments = segments.len(),
        "detected line segments"
    );

    Ok(LineDetection { edges, segments })
}

/// Stretch of a line with edge support.
struct Run {
    start_t: f64,
    start: Point,
    end_t: f64,
    end: Point,
}

/// Cut an infinite Hough line into edge-supported segments.
///
/// imageproc's lines satisfy `r = x cos(angle) + y sin(angle)`. The line
/// is sampled at unit steps; a sample is supported when an edge pixel
/// lies within one pixel (Chebyshev) of it. Supported samples closer than
/// `max_gap` join one run, and runs shorter than `min_length` are dropped.
fn segments_along(
    edges: &GrayImage,
    line: &PolarLine,
    min_length: f64,
    max_gap: f64,
) -> Vec<LineSegment> {
    let (sin, cos) = f64::from(line.angle_in_degrees).to_radians().sin_cos();
    let r = f64::from(line.r);
    let foot = Point::new(r * cos, r * sin);
    let (dx, dy) = (-sin, cos);

    let (width, height) = edges.dimensions();
    // The foot lies inside the image's circumscribed disc, so stepping
    // twice the diagonal from it covers the whole image.
    #[allow(clippy::cast_possible_truncation)]
    let steps = (2.0 * f64::from(width).hypot(f64::from(height))).ceil() as i64;

    let mut segments = Vec::new();
    let mut current: Option<Run> = None;

    for i in -steps..=steps {
        #[allow(clippy::cast_precision_loss)]
        let t = i as f64;
        let p = Point::new(t.mul_add(dx, foot.x), t.mul_add(dy, foot.y));
        if !has_edge_near(edges, p) {
            continue;
        }
        match current.as_mut() {
            Some(run) if t - run.end_t <= max_gap => {
                run.end_t = t;
                run.end = p;
            }
            _ => {
                let fresh = Run {
                    start_t: t,
                    start: p,
                    end_t: t,
                    end: p,
                };
                if let Some(done) = current.replace(fresh) {
                    keep_run(&mut segments, &done, min_length);
                }
            }
        }
    }
    if let Some(done) = current {
        keep_run(&mut segments, &done, min_length);
    }

    segments
}

fn keep_run(segments: &mut Vec<LineSegment>, run: &Run, min_length: f64) {
    if run.end_t - run.start_t >= min_length {
        segments.push(LineSegment {
            start: run.start,
            end: run.end,
        });
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn has_edge_near(edges: &GrayImage, p: Point) -> bool {
    let (width, height) = (f64::from(edges.width()), f64::from(edges.height()));
    let (cx, cy) = (p.x.round(), p.y.round());
    for oy in -1..=1 {
        for ox in -1..=1 {
            let (x, y) = (cx + f64::from(ox), cy + f64::from(oy));
            if x < 0.0 || y < 0.0 || x >= width || y >= height {
                continue;
            }
            if edges.get_pixel(x as u32, y as u32).0[0] > 0 {
                return true;
            }
        }
    }
    false
}
