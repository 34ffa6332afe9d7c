//! Contour tracing: extract iso-level polylines from an intensity grid.
//!
//! This module defines the [`ContourTracer`] trait for pluggable contour
//! tracing algorithms and the [`ContourTracerKind`] enum for selecting
//! which algorithm to use at runtime.
//!
//! The default, [`ContourTracerKind::MarchingSquares`], classifies every
//! 2x2 block of samples against a threshold, emits interpolated boundary
//! segments per block, and stitches segments that share an endpoint into
//! maximal polylines. A closed boundary comes back with its first point
//! repeated at the end.

use std::collections::{HashMap, VecDeque};

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::raster::Raster;
use crate::simplify;
use crate::types::{MapConfig, PipelineError, Point, Polyline};

/// Selects which contour tracing algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Marching squares with linear edge interpolation and segment
    /// stitching. Sub-pixel accurate.
    #[default]
    MarchingSquares,

    /// Suzuki-Abe border following via `imageproc::contours::find_contours`
    /// on the thresholded grid. Integer pixel coordinates.
    BorderFollowing,
}

/// Trait for contour tracing strategies.
///
/// Input: an intensity grid and the iso-level separating foreground
/// (`sample > threshold`) from background.
/// Output: unsimplified polylines in pixel space.
pub trait ContourTracer {
    /// Trace contours in the given raster.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::GeometryExtraction`] if the decoded samples
    /// do not cover at least a 2x2 grid.
    fn trace(&self, raster: &Raster, threshold: u8) -> Result<Vec<Polyline>, PipelineError>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(&self, raster: &Raster, threshold: u8) -> Result<Vec<Polyline>, PipelineError> {
        let grid = Grid::new(raster)?;
        let contours = match *self {
            Self::MarchingSquares => trace_marching_squares(&grid, threshold),
            Self::BorderFollowing => trace_border_following(&grid, threshold),
        };
        debug!(
            tracer = ?self,
            contours = contours.len(),
            "traced contours"
        );
        Ok(contours)
    }
}

/// Trace with marching squares and simplify each contour with the default
/// one-pixel tolerance.
///
/// # Errors
///
/// Returns [`PipelineError::GeometryExtraction`] for grids smaller than
/// 2x2. Callers loading a map treat this as non-fatal and substitute an
/// empty contour set.
pub fn extract_contours(raster: &Raster, threshold: u8) -> Result<Vec<Polyline>, PipelineError> {
    let traced = ContourTracerKind::MarchingSquares.trace(raster, threshold)?;
    Ok(simplify::simplify_paths(
        &traced,
        MapConfig::DEFAULT_SIMPLIFY_TOLERANCE,
    ))
}

/// The rows of a raster fully covered by decoded samples.
struct Grid<'a> {
    width: usize,
    height: usize,
    samples: &'a [u8],
}

impl<'a> Grid<'a> {
    fn new(raster: &'a Raster) -> Result<Self, PipelineError> {
        let width = raster.width as usize;
        let height = raster.complete_rows() as usize;
        if width < 2 || height < 2 {
            return Err(PipelineError::GeometryExtraction(format!(
                "need at least a 2x2 grid, got {width}x{height} complete samples"
            )));
        }
        Ok(Self {
            width,
            height,
            samples: &raster.samples[..width * height],
        })
    }

    fn at(&self, x: usize, y: usize) -> u8 {
        self.samples[y * self.width + x]
    }
}

/// Quantized coordinate used to find segments sharing an endpoint.
///
/// Crossing points on a shared block edge are computed from the same two
/// samples in the same order, so joins are exact; the quantum only needs
/// to be finer than the smallest distinct interpolation step.
type EndpointKey = (i64, i64);

const KEY_SCALE: f64 = 1e7;

#[allow(clippy::cast_possible_truncation)]
fn endpoint_key(p: Point) -> EndpointKey {
    ((p.x * KEY_SCALE).round() as i64, (p.y * KEY_SCALE).round() as i64)
}

/// Edge of a 2x2 block.
#[derive(Clone, Copy)]
enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

/// Block edges joined by the boundary, indexed by case code.
///
/// Code bits, most significant first: top-left, top-right, bottom-right,
/// bottom-left; a set bit means the corner is above the threshold.
///
/// The saddles (`0101`, `1010`) always cut off each above-threshold corner
/// separately, leaving the two above corners disconnected across the
/// diagonal.
const CASES: [&[(Edge, Edge)]; 16] = {
    use Edge::{Bottom as B, Left as L, Right as R, Top as T};
    [
        &[],               // 0000
        &[(L, B)],         // 0001
        &[(B, R)],         // 0010
        &[(L, R)],         // 0011
        &[(T, R)],         // 0100
        &[(T, R), (L, B)], // 0101 saddle
        &[(T, B)],         // 0110
        &[(L, T)],         // 0111
        &[(L, T)],         // 1000
        &[(T, B)],         // 1001
        &[(T, L), (R, B)], // 1010 saddle
        &[(T, R)],         // 1011
        &[(L, R)],         // 1100
        &[(B, R)],         // 1101
        &[(L, B)],         // 1110
        &[],               // 1111
    ]
};

/// Fraction along an edge from `a` to `b` where the threshold is crossed.
fn crossing(a: u8, b: u8, threshold: f64) -> f64 {
    if a == b {
        return 0.5;
    }
    (threshold - f64::from(a)) / (f64::from(b) - f64::from(a))
}

fn trace_marching_squares(grid: &Grid<'_>, threshold: u8) -> Vec<Polyline> {
    let level = f64::from(threshold);
    let mut segments: Vec<[Point; 2]> = Vec::new();

    for y in 0..grid.height - 1 {
        for x in 0..grid.width - 1 {
            let tl = grid.at(x, y);
            let tr = grid.at(x + 1, y);
            let br = grid.at(x + 1, y + 1);
            let bl = grid.at(x, y + 1);

            let code = (usize::from(tl > threshold) << 3)
                | (usize::from(tr > threshold) << 2)
                | (usize::from(br > threshold) << 1)
                | usize::from(bl > threshold);
            let pairs = CASES[code];
            if pairs.is_empty() {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let (fx, fy) = (x as f64, y as f64);
            // Interpolation always runs left-to-right and top-to-bottom so a
            // shared edge yields the identical point from both blocks.
            let point = |edge: Edge| match edge {
                Edge::Top => Point::new(fx + crossing(tl, tr, level), fy),
                Edge::Right => Point::new(fx + 1.0, fy + crossing(tr, br, level)),
                Edge::Bottom => Point::new(fx + crossing(bl, br, level), fy + 1.0),
                Edge::Left => Point::new(fx, fy + crossing(tl, bl, level)),
            };

            for &(from, to) in pairs {
                let (a, b) = (point(from), point(to));
                if endpoint_key(a) != endpoint_key(b) {
                    segments.push([a, b]);
                }
            }
        }
    }

    stitch(&segments)
}

/// Join segments sharing endpoints into maximal polylines.
///
/// Each polyline starts from the lowest-indexed unused segment and is
/// extended greedily at its tail, then at its head. When several unused
/// segments meet at an endpoint the first one indexed wins.
fn stitch(segments: &[[Point; 2]]) -> Vec<Polyline> {
    let mut by_endpoint: HashMap<EndpointKey, Vec<usize>> = HashMap::new();
    for (i, segment) in segments.iter().enumerate() {
        for &p in segment {
            by_endpoint.entry(endpoint_key(p)).or_default().push(i);
        }
    }

    let mut used = vec![false; segments.len()];
    let mut polylines = Vec::new();

    for (start, &[a, b]) in segments.iter().enumerate() {
        if used[start] {
            continue;
        }
        used[start] = true;

        let mut points = VecDeque::from([a, b]);
        while let Some(&tail) = points.back()
            && let Some(next) = take_adjacent(tail, segments, &by_endpoint, &mut used)
        {
            points.push_back(next);
        }
        while let Some(&head) = points.front()
            && let Some(prev) = take_adjacent(head, segments, &by_endpoint, &mut used)
        {
            points.push_front(prev);
        }

        polylines.push(Polyline::new(points.into()));
    }

    polylines
}

/// Consume the first unused segment touching `end` and return its far
/// endpoint.
fn take_adjacent(
    end: Point,
    segments: &[[Point; 2]],
    by_endpoint: &HashMap<EndpointKey, Vec<usize>>,
    used: &mut [bool],
) -> Option<Point> {
    let key = endpoint_key(end);
    let &index = by_endpoint.get(&key)?.iter().find(|&&i| !used[i])?;
    used[index] = true;
    let [a, b] = segments[index];
    Some(if endpoint_key(a) == key { b } else { a })
}

/// Suzuki-Abe border following via `imageproc::contours::find_contours`.
///
/// The grid is binarised first (`sample > threshold` becomes 255) and the
/// integer border coordinates are converted to floating-point [`Point`]s.
fn trace_border_following(grid: &Grid<'_>, threshold: u8) -> Vec<Polyline> {
    #[allow(clippy::cast_possible_truncation)]
    let binary = GrayImage::from_fn(grid.width as u32, grid.height as u32, |x, y| {
        image::Luma([if grid.at(x as usize, y as usize) > threshold {
            255
        } else {
            0
        }])
    });

    let contours: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(&binary);

    contours
        .into_iter()
        .filter(|c| c.points.len() >= 2)
        .map(|c| {
            let points = c
                .points
                .into_iter()
                .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                .collect();
            Polyline::new(points)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raster_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Raster {
        let mut samples = Vec::new();
        for y in 0..height {
            for x in 0..width {
                samples.push(f(x, y));
            }
        }
        Raster {
            width,
            height,
            max_sample: 255,
            samples,
        }
    }

    fn block(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Raster {
        raster_from_fn(width, height, |x, y| {
            if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) {
                255
            } else {
                0
            }
        })
    }

    #[test]
    fn default_is_marching_squares() {
        assert_eq!(
            ContourTracerKind::default(),
            ContourTracerKind::MarchingSquares
        );
    }

    #[test]
    fn uniform_grids_produce_no_contours() {
        let zeros = raster_from_fn(8, 8, |_, _| 0);
        let full = raster_from_fn(8, 8, |_, _| 255);
        assert!(extract_contours(&zeros, 127).unwrap().is_empty());
        assert!(extract_contours(&full, 127).unwrap().is_empty());
    }

    #[test]
    fn single_row_grid_is_an_extraction_failure() {
        let raster = raster_from_fn(10, 1, |x, _| u8::try_from(x * 20).unwrap());
        assert!(matches!(
            extract_contours(&raster, 127),
            Err(PipelineError::GeometryExtraction(_))
        ));
    }

    #[test]
    fn empty_grid_is_an_extraction_failure() {
        let raster = Raster {
            width: 0,
            height: 0,
            max_sample: 255,
            samples: vec![],
        };
        assert!(extract_contours(&raster, 127).is_err());
    }

    #[test]
    fn rectangle_yields_one_closed_simplified_contour() {
        let raster = block(12, 12, 3, 3, 8, 7);
        let traced = ContourTracerKind::MarchingSquares
            .trace(&raster, 127)
            .unwrap();
        assert_eq!(traced.len(), 1);
        assert!(traced[0].is_closed());

        let simplified = extract_contours(&raster, 127).unwrap();
        assert_eq!(simplified.len(), 1);
        assert!(simplified[0].is_closed());
        assert!(
            simplified[0].len() < traced[0].len(),
            "simplified {} vs traced {}",
            simplified[0].len(),
            traced[0].len()
        );
        assert!(simplified[0].len() >= 4);
    }

    #[test]
    fn rectangle_contour_sits_between_samples() {
        let raster = block(10, 10, 3, 3, 6, 6);
        let traced = ContourTracerKind::MarchingSquares
            .trace(&raster, 127)
            .unwrap();
        let t = 127.0 / 255.0;
        for p in traced[0].points() {
            assert!(p.x >= 2.0 + t - 1e-9 && p.x <= 7.0 - t + 1e-9, "x = {}", p.x);
            assert!(p.y >= 2.0 + t - 1e-9 && p.y <= 7.0 - t + 1e-9, "y = {}", p.y);
        }
    }

    #[test]
    fn region_touching_border_is_open() {
        // Left half above threshold: the boundary runs top to bottom and
        // leaves the grid at both ends.
        let raster = raster_from_fn(6, 5, |x, _| if x < 3 { 255 } else { 0 });
        let contours = extract_contours(&raster, 127).unwrap();
        assert_eq!(contours.len(), 1);
        let contour = &contours[0];
        assert!(!contour.is_closed());
        assert_eq!(contour.len(), 2);
        let ys = [contour.points()[0].y, contour.points()[1].y];
        assert!(ys.contains(&0.0) && ys.contains(&4.0));
    }

    #[test]
    fn saddle_keeps_diagonal_corners_apart() {
        // Top-left and bottom-right above: code 1010.
        let raster = Raster {
            width: 2,
            height: 2,
            max_sample: 255,
            samples: vec![255, 0, 0, 255],
        };
        let contours = ContourTracerKind::MarchingSquares
            .trace(&raster, 127)
            .unwrap();
        assert_eq!(contours.len(), 2);
        let t = 128.0 / 255.0;
        // The segment cutting off the top-left corner stays near (0, 0).
        let near_top_left = contours
            .iter()
            .find(|c| c.points().iter().all(|p| p.x < 0.6 && p.y < 0.6))
            .unwrap();
        assert!(near_top_left
            .points()
            .iter()
            .any(|p| (p.x - t).abs() < 1e-9 && p.y == 0.0));
    }

    #[test]
    fn mirrored_saddle_also_disconnects() {
        let raster = Raster {
            width: 2,
            height: 2,
            max_sample: 255,
            samples: vec![0, 255, 255, 0],
        };
        let contours = ContourTracerKind::MarchingSquares
            .trace(&raster, 127)
            .unwrap();
        assert_eq!(contours.len(), 2);
        assert!(contours.iter().all(|c| c.len() == 2));
    }

    #[test]
    fn crossing_interpolates_and_clamps_flat_edges() {
        assert!((crossing(0, 254, 127.0) - 0.5).abs() < 1e-12);
        assert!((crossing(100, 100, 127.0) - 0.5).abs() < 1e-12);
        assert!((crossing(255, 0, 127.0) - 128.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn truncated_raster_traces_complete_rows_only() {
        let mut raster = block(8, 8, 2, 2, 5, 5);
        raster.samples.truncate(8 * 4 + 3);
        let contours = ContourTracerKind::MarchingSquares
            .trace(&raster, 127)
            .unwrap();
        for c in &contours {
            assert!(c.points().iter().all(|p| p.y <= 3.0));
        }
    }

    #[test]
    fn two_blocks_give_two_contours() {
        let raster = raster_from_fn(14, 8, |x, y| {
            let in_a = (2..=4).contains(&x) && (2..=5).contains(&y);
            let in_b = (8..=11).contains(&x) && (2..=5).contains(&y);
            if in_a || in_b { 255 } else { 0 }
        });
        let contours = extract_contours(&raster, 127).unwrap();
        assert_eq!(contours.len(), 2);
        assert!(contours.iter().all(Polyline::is_closed));
    }

    #[test]
    fn stitch_joins_out_of_order_segments() {
        let p = |x: f64, y: f64| Point::new(x, y);
        let segments = vec![
            [p(1.0, 0.0), p(2.0, 0.0)],
            [p(3.0, 0.0), p(2.0, 0.0)],
            [p(0.0, 0.0), p(1.0, 0.0)],
        ];
        let polylines = stitch(&segments);
        assert_eq!(polylines.len(), 1);
        assert_eq!(
            polylines[0].points(),
            &[p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0), p(3.0, 0.0)]
        );
    }

    #[test]
    fn border_following_finds_rectangle() {
        let raster = block(20, 20, 5, 5, 14, 14);
        let contours = ContourTracerKind::BorderFollowing
            .trace(&raster, 127)
            .unwrap();
        assert!(!contours.is_empty());
        for polyline in &contours {
            assert!(polyline.len() >= 4);
        }
    }

    #[test]
    fn border_following_empty_grid_has_no_contours() {
        let raster = raster_from_fn(10, 10, |_, _| 0);
        let contours = ContourTracerKind::BorderFollowing
            .trace(&raster, 127)
            .unwrap();
        assert!(contours.is_empty());
    }
}
