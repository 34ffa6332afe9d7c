//! Map load diagnostics: timing and counts for each stage.
//!
//! Every call to [`load_map_with_diagnostics`](crate::load_map_with_diagnostics)
//! collects these alongside the load result.
//!
//! Timestamps are captured with the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//! Durations are serialized as fractional seconds (`f64`) since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Polyline, Warning};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single map load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Raster header and body decoding.
    pub decode: StageDiagnostics,
    /// Descriptor parsing.
    pub georeference: StageDiagnostics,
    /// Map cleanup, `None` when disabled or skipped.
    pub cleanup: Option<StageDiagnostics>,
    /// Line detection, `None` when disabled or skipped.
    #[serde(default)]
    pub line_detection: Option<StageDiagnostics>,
    /// Contour tracing. Zero counts when extraction failed.
    pub contour_tracing: StageDiagnostics,
    /// RDP simplification.
    pub simplification: StageDiagnostics,
    /// Wall-clock duration of the whole load (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Counts describing the final result.
    pub summary: PipelineSummary,
    /// Non-fatal irregularities, in the order they were found.
    pub warnings: Vec<Warning>,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// What the stage produced.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Raster decoding.
    Decode {
        /// Size of the raster blob.
        input_bytes: usize,
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Samples actually decoded; below `width * height` when truncated.
        sample_count: usize,
        /// `"P2"` or `"P5"`.
        encoding: String,
    },
    /// Descriptor parsing.
    Georeference {
        /// World units per pixel.
        resolution: f64,
        /// World x of the map origin.
        origin_x: f64,
        /// World y of the map origin.
        origin_y: f64,
    },
    /// Map cleanup.
    Cleanup {
        /// Samples classified as walls after cleanup.
        wall_pixel_count: u64,
        /// Samples in the cleaned grid.
        total_pixel_count: u64,
    },
    /// Edge and straight line detection.
    LineDetection {
        /// Pixels marked by the edge detector.
        edge_pixel_count: u64,
        /// Segments kept after gap bridging and length filtering.
        segment_count: usize,
    },
    /// Contour tracing, before simplification.
    ContourTracing {
        /// Number of traced contours.
        contour_count: usize,
        /// Points across all contours.
        total_point_count: usize,
        /// Contours whose endpoints coincide.
        closed_count: usize,
        /// Points in the shortest contour.
        min_contour_points: usize,
        /// Points in the longest contour.
        max_contour_points: usize,
        /// Average points per contour.
        mean_contour_points: f64,
    },
    /// Contour simplification.
    Simplification {
        /// RDP tolerance in pixels.
        tolerance: f64,
        /// Points before simplification.
        points_before: usize,
        /// Points after simplification.
        points_after: usize,
        /// Fraction of points removed (0.0-1.0).
        reduction_ratio: f64,
    },
}

/// Summary counts across all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Declared raster width.
    pub width: u32,
    /// Declared raster height.
    pub height: u32,
    /// Contours in the loaded geometry.
    pub contour_count: usize,
    /// Points across those contours after simplification.
    pub final_point_count: usize,
}

impl PipelineDiagnostics {
    /// Render a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Map Load Diagnostics\n{}", "=".repeat(60)));
        lines.push(format!(
            "Raster: {}x{}",
            self.summary.width, self.summary.height
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let mut stages = vec![
            ("Decode", &self.decode),
            ("Georeference", &self.georeference),
        ];
        if let Some(ref cleanup) = self.cleanup {
            stages.push(("Cleanup", cleanup));
        }
        if let Some(ref line_detection) = self.line_detection {
            stages.push(("Line Detection", line_detection));
        }
        stages.push(("Contour Tracing", &self.contour_tracing));
        stages.push(("Simplification", &self.simplification));

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Contours: {}  |  Final points: {}",
            self.summary.contour_count, self.summary.final_point_count,
        ));

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push("Warnings:".to_string());
            for warning in &self.warnings {
                lines.push(format!("  - {warning}"));
            }
        }

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            sample_count,
            encoding,
        } => format!("{encoding} {input_bytes} bytes -> {width}x{height}, {sample_count} samples"),
        StageMetrics::Georeference {
            resolution,
            origin_x,
            origin_y,
        } => format!("res={resolution} origin=({origin_x}, {origin_y})"),
        StageMetrics::Cleanup {
            wall_pixel_count,
            total_pixel_count,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let pct = if *total_pixel_count > 0 {
                *wall_pixel_count as f64 / *total_pixel_count as f64 * 100.0
            } else {
                0.0
            };
            format!("{wall_pixel_count} wall px ({pct:.1}%)")
        }
        StageMetrics::LineDetection {
            edge_pixel_count,
            segment_count,
        } => format!("{edge_pixel_count} edge px, {segment_count} segments"),
        StageMetrics::ContourTracing {
            contour_count,
            total_point_count,
            closed_count,
            min_contour_points,
            max_contour_points,
            mean_contour_points,
        } => format!(
            "{contour_count} contours ({closed_count} closed), {total_point_count} pts \
             (min={min_contour_points}, max={max_contour_points}, \
             mean={mean_contour_points:.1})"
        ),
        StageMetrics::Simplification {
            tolerance,
            points_before,
            points_after,
            reduction_ratio,
        } => format!(
            "tol={tolerance:.2}, {points_before} -> {points_after} pts ({:.1}% reduction)",
            reduction_ratio * 100.0
        ),
    }
}

/// Contour tracing metrics for a set of polylines.
pub(crate) fn contour_metrics(contours: &[Polyline]) -> StageMetrics {
    let total = total_points(contours);
    let min = contours.iter().map(Polyline::len).min().unwrap_or(0);
    let max = contours.iter().map(Polyline::len).max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let mean = if contours.is_empty() {
        0.0
    } else {
        total as f64 / contours.len() as f64
    };
    StageMetrics::ContourTracing {
        contour_count: contours.len(),
        total_point_count: total,
        closed_count: contours.iter().filter(|c| c.is_closed()).count(),
        min_contour_points: min,
        max_contour_points: max,
        mean_contour_points: mean,
    }
}

/// Simplification metrics from point totals before and after.
pub(crate) fn simplification_metrics(
    tolerance: f64,
    points_before: usize,
    points_after: usize,
) -> StageMetrics {
    #[allow(clippy::cast_precision_loss)]
    let reduction_ratio = if points_before > 0 {
        1.0 - (points_after as f64 / points_before as f64)
    } else {
        0.0
    };
    StageMetrics::Simplification {
        tolerance,
        points_before,
        points_after,
        reduction_ratio,
    }
}

/// Total number of points across all polylines.
pub(crate) fn total_points(polylines: &[Polyline]) -> usize {
    polylines.iter().map(Polyline::len).sum()
}
