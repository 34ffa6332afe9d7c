//! Contour simplification using the Ramer-Douglas-Peucker algorithm.
//!
//! Removes points lying within a pixel tolerance of the chord between
//! their retained neighbours. The first and last points always survive,
//! so a closed contour (first point repeated at the end) stays closed.
//!
//! Traced contours on large maps can run to tens of thousands of points
//! along a straight wall, so the split is driven by an explicit work stack
//! rather than recursion.

use crate::types::{Point, Polyline};

/// Simplify a single polyline.
///
/// A tolerance of 0.0 removes only exactly collinear interior points.
/// Polylines with fewer than 3 points are returned unchanged.
#[must_use = "returns the simplified polyline"]
pub fn simplify(polyline: &Polyline, tolerance: f64) -> Polyline {
    let points = polyline.points();
    if points.len() < 3 {
        return polyline.clone();
    }

    let last = points.len() - 1;
    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[last] = true;

    let mut pending = vec![(0, last)];
    while let Some((start, end)) = pending.pop() {
        if end <= start + 1 {
            continue;
        }

        let (max_idx, max_dist) = ((start + 1)..end)
            .map(|i| (i, perpendicular_distance(points[i], points[start], points[end])))
            .fold((start, 0.0), |best, candidate| {
                if candidate.1 > best.1 { candidate } else { best }
            });

        if max_dist > tolerance {
            kept[max_idx] = true;
            pending.push((start, max_idx));
            pending.push((max_idx, end));
        }
    }

    let simplified: Vec<Point> = points
        .iter()
        .zip(&kept)
        .filter_map(|(&p, &k)| k.then_some(p))
        .collect();

    Polyline::new(simplified)
}

/// Simplify each polyline independently.
#[must_use = "returns the simplified polylines"]
pub fn simplify_paths(polylines: &[Polyline], tolerance: f64) -> Vec<Polyline> {
    polylines.iter().map(|pl| simplify(pl, tolerance)).collect()
}

/// Distance from `p` to the infinite line through `a` and `b`.
///
/// When `a` and `b` coincide (the chord of a closed contour), this is the
/// distance from `p` to `a`.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polyline(coords: &[(f64, f64)]) -> Polyline {
        Polyline::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn short_polylines_unchanged() {
        assert!(simplify(&polyline(&[]), 1.0).is_empty());
        assert_eq!(simplify(&polyline(&[(1.0, 2.0)]), 1.0).len(), 1);
        assert_eq!(simplify(&polyline(&[(0.0, 0.0), (10.0, 0.0)]), 1.0).len(), 2);
    }

    #[test]
    fn collinear_run_collapses_to_endpoints() {
        let pl = polyline(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0), (4.0, 4.0)]);
        let result = simplify(&pl, 0.1);
        assert_eq!(result.points(), &[Point::new(0.0, 0.0), Point::new(4.0, 4.0)]);
    }

    #[test]
    fn sub_pixel_jitter_removed_at_one_pixel() {
        let pl = polyline(&[(0.0, 0.0), (1.0, 0.4), (2.0, -0.3), (3.0, 0.2), (4.0, 0.0)]);
        assert_eq!(simplify(&pl, 1.0).len(), 2);
        assert_eq!(simplify(&pl, 0.1).len(), 5);
    }

    #[test]
    fn zigzag_peaks_survive_small_tolerance() {
        let pl = polyline(&[(0.0, 0.0), (2.0, 5.0), (4.0, 0.0), (6.0, 5.0), (8.0, 0.0)]);
        assert_eq!(simplify(&pl, 1.0).len(), 5);
        assert_eq!(simplify(&pl, 10.0).len(), 2);
    }

    #[test]
    fn closed_square_keeps_corners_and_closure() {
        // Closed square with midpoints on every side.
        let pl = polyline(&[
            (0.0, 0.0),
            (2.0, 0.0),
            (4.0, 0.0),
            (4.0, 2.0),
            (4.0, 4.0),
            (2.0, 4.0),
            (0.0, 4.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        let result = simplify(&pl, 1.0);
        assert!(result.is_closed());
        assert_eq!(
            result.points(),
            &[
                Point::new(0.0, 0.0),
                Point::new(4.0, 0.0),
                Point::new(4.0, 4.0),
                Point::new(0.0, 4.0),
                Point::new(0.0, 0.0),
            ]
        );
    }

    #[test]
    fn long_straight_run_does_not_overflow() {
        let coords: Vec<(f64, f64)> = (0..200_000).map(|i| (f64::from(i), 0.0)).collect();
        let result = simplify(&polyline(&coords), 1.0);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn simplify_paths_applies_to_each() {
        let polylines = vec![
            polyline(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]),
            polyline(&[(0.0, 0.0), (1.0, 5.0), (2.0, 0.0)]),
        ];
        let results = simplify_paths(&polylines, 0.5);
        assert_eq!(results[0].len(), 2);
        assert_eq!(results[1].len(), 3);
    }

    #[test]
    fn perpendicular_distance_cases() {
        let d = perpendicular_distance(
            Point::new(2.0, -1.0),
            Point::new(0.0, 0.0),
            Point::new(4.0, 2.0),
        );
        assert!((d - 8.0 / 20.0_f64.sqrt()).abs() < 1e-10);

        let coincident = perpendicular_distance(
            Point::new(3.0, 4.0),
            Point::new(0.0, 0.0),
            Point::new(0.0, 0.0),
        );
        assert!((coincident - 5.0).abs() < 1e-10);
    }
}
