//! Map loading and evidence saving entry points.
//!
//! The storage collaborator hands in raw bytes; these functions return
//! everything the display layer needs and the bytes to persist. Nothing
//! here touches a filesystem or the network.

use std::borrow::Cow;

use chrono::NaiveTime;
use tracing::{debug, warn};
use web_time::Instant;

use crate::case::EvidenceTimeSpan;
use crate::cleanup;
use crate::contour::ContourTracer;
use crate::diagnostics::{
    self, PipelineDiagnostics, PipelineSummary, StageDiagnostics, StageMetrics,
};
use crate::evidence::{self, EvidenceRecord};
use crate::georef::Georeference;
use crate::lines::{self, LineDetection};
use crate::raster::{self, Decoded, Raster, SampleEncoding};
use crate::simplify;
use crate::table;
use crate::types::{MapConfig, MapGeometry, PipelineError, Polyline, Warning};

/// Everything produced by loading a case map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapLoad {
    /// Contours ready for rendering.
    pub geometry: MapGeometry,
    /// The raster as decoded, before any cleanup. Feed this to the image
    /// encoder for the base bitmap.
    pub raster: Raster,
    /// Body encoding named by the raster header.
    pub encoding: SampleEncoding,
    /// World placement of the raster.
    pub georeference: Georeference,
    /// Straight wall segments, when line detection is configured and ran.
    pub lines: Option<LineDetection>,
    /// Non-fatal irregularities found while loading.
    pub warnings: Vec<Warning>,
}

/// Decode a raster and its descriptor, then extract contours.
///
/// # Pipeline steps
///
/// 1. Decode the raster (truncated bodies warn, never fail)
/// 2. Parse the georeferencing descriptor
/// 3. Optional map cleanup
/// 4. Optional line detection
/// 5. Contour tracing
/// 6. Contour simplification
///
/// A tracing failure is not fatal: it is logged, recorded as
/// [`Warning::GeometryExtraction`], and the map loads with no contours.
/// Optional stages that cannot run (for example on a grid too large to
/// materialize) are recorded as [`Warning::StageSkipped`] and left out.
///
/// # Errors
///
/// Returns [`PipelineError::Format`] for a malformed raster header,
/// [`PipelineError::InvalidGeoreference`] for an unusable descriptor, and
/// [`PipelineError::InvalidConfig`] if `config` fails validation.
pub fn load_map(
    raster_bytes: &[u8],
    descriptor: &str,
    config: &MapConfig,
) -> Result<MapLoad, PipelineError> {
    load_map_with_diagnostics(raster_bytes, descriptor, config).map(|(load, _)| load)
}

/// [`load_map`] that also reports per-stage timing and counts.
///
/// # Errors
///
/// Same as [`load_map`].
pub fn load_map_with_diagnostics(
    raster_bytes: &[u8],
    descriptor: &str,
    config: &MapConfig,
) -> Result<(MapLoad, PipelineDiagnostics), PipelineError> {
    config.validate()?;
    let pipeline_start = Instant::now();

    // 1. Decode.
    let start = Instant::now();
    let Decoded {
        raster,
        encoding,
        mut warnings,
    } = raster::decode(raster_bytes)?;
    let decode = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Decode {
            input_bytes: raster_bytes.len(),
            width: raster.width,
            height: raster.height,
            sample_count: raster.samples.len(),
            encoding: encoding.tag().to_string(),
        },
    };

    // 2. Georeference.
    let start = Instant::now();
    let georeference = Georeference::from_descriptor(descriptor)?;
    let georeference_diag = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Georeference {
            resolution: georeference.resolution,
            origin_x: georeference.origin.x,
            origin_y: georeference.origin.y,
        },
    };

    // 3. Optional cleanup.
    let mut cleanup_diag = None;
    let mut traced_raster = Cow::Borrowed(&raster);
    if let Some(cleanup_config) = &config.cleanup {
        let start = Instant::now();
        match cleanup::clean_raster(&raster, cleanup_config) {
            Ok(cleaned) => {
                let wall_pixel_count = cleaned.samples.iter().filter(|&&s| s == 0).count() as u64;
                cleanup_diag = Some(StageDiagnostics {
                    duration: start.elapsed(),
                    metrics: StageMetrics::Cleanup {
                        wall_pixel_count,
                        total_pixel_count: cleaned.samples.len() as u64,
                    },
                });
                traced_raster = Cow::Owned(cleaned);
            }
            Err(e) => skip_stage(&mut warnings, "cleanup", &e),
        }
    }

    // 4. Optional line detection, on the same grid contours are traced from.
    let mut detected_lines = None;
    let mut line_detection_diag = None;
    if let Some(line_config) = &config.line_detection {
        let start = Instant::now();
        let detected = traced_raster
            .to_gray_image()
            .map_err(|e| PipelineError::LineDetection(e.to_string()))
            .and_then(|image| lines::detect_line_segments(&image, line_config));
        match detected {
            Ok(detection) => {
                line_detection_diag = Some(StageDiagnostics {
                    duration: start.elapsed(),
                    metrics: StageMetrics::LineDetection {
                        edge_pixel_count: detection.edge_pixel_count(),
                        segment_count: detection.segments.len(),
                    },
                });
                detected_lines = Some(detection);
            }
            Err(e) => skip_stage(&mut warnings, "line detection", &e),
        }
    }

    // 5. Contour tracing.
    let start = Instant::now();
    let traced = match config
        .contour_tracer
        .trace(&traced_raster, config.threshold)
    {
        Ok(contours) => contours,
        Err(e) => {
            warn!(error = %e, "contour extraction failed, loading map without contours");
            warnings.push(Warning::GeometryExtraction {
                reason: e.to_string(),
            });
            Vec::new()
        }
    };
    let contour_tracing = StageDiagnostics {
        duration: start.elapsed(),
        metrics: diagnostics::contour_metrics(&traced),
    };

    // 6. Simplification.
    let start = Instant::now();
    let points_before = diagnostics::total_points(&traced);
    let contours: Vec<Polyline> = simplify::simplify_paths(&traced, config.simplify_tolerance);
    let points_after = diagnostics::total_points(&contours);
    let simplification = StageDiagnostics {
        duration: start.elapsed(),
        metrics: diagnostics::simplification_metrics(
            config.simplify_tolerance,
            points_before,
            points_after,
        ),
    };
    debug!(
        contours = contours.len(),
        points_before, points_after, "simplified contours"
    );

    let geometry = MapGeometry {
        width: raster.width,
        height: raster.height,
        contours,
    };

    let diagnostics = PipelineDiagnostics {
        decode,
        georeference: georeference_diag,
        cleanup: cleanup_diag,
        line_detection: line_detection_diag,
        contour_tracing,
        simplification,
        total_duration: pipeline_start.elapsed(),
        summary: PipelineSummary {
            width: geometry.width,
            height: geometry.height,
            contour_count: geometry.contours.len(),
            final_point_count: points_after,
        },
        warnings: warnings.clone(),
    };

    let load = MapLoad {
        geometry,
        raster,
        encoding,
        georeference,
        lines: detected_lines,
        warnings,
    };
    Ok((load, diagnostics))
}

fn skip_stage(warnings: &mut Vec<Warning>, stage: &str, error: &dyn std::fmt::Display) {
    warn!(stage, error = %error, "optional stage skipped");
    warnings.push(Warning::StageSkipped {
        stage: stage.to_string(),
        reason: error.to_string(),
    });
}

/// Read a stored evidence table and attach display pixels.
///
/// `height` is the raster height the pixels should flip against.
#[must_use]
pub fn load_evidence(
    table_text: &str,
    georeference: &Georeference,
    height: u32,
) -> Vec<EvidenceRecord> {
    evidence::project_to_pixels(&table::decode(table_text), georeference, height)
}

/// The result of normalizing an editor save.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceSave {
    /// Canonical rows with display pixels, for echoing back to the editor.
    pub rows: Vec<EvidenceRecord>,
    /// Encoded table for the storage collaborator. Empty when `rows` is.
    pub table: Vec<u8>,
    /// Time range of the saved rows, for merging into case metadata.
    pub time_span: Option<EvidenceTimeSpan>,
}

/// Normalize an editor save payload into a storable table.
///
/// `now` fills in missing or invalid times; read it once per save.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidEvidencePayload`] if the payload is not
/// a JSON list. Malformed elements become default records instead.
pub fn save_evidence(
    payload_json: &str,
    georeference: &Georeference,
    height: u32,
    now: NaiveTime,
) -> Result<EvidenceSave, PipelineError> {
    let inputs = evidence::parse_evidence_payload(payload_json)?;
    let rows = evidence::build_canonical_rows(&inputs, georeference, height, now);
    debug!(records = rows.len(), "normalized evidence");
    Ok(EvidenceSave {
        table: table::encode(&rows),
        time_span: EvidenceTimeSpan::from_records(&rows),
        rows,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupConfig;
    use crate::contour::ContourTracerKind;
    use crate::lines::LineDetectionConfig;
    use crate::raster::FormatError;
    use crate::types::Point;

    const DESCRIPTOR: &str = "image: room.pgm\nresolution: 0.05\norigin: [-1.0, -1.0, 0.0]\n";

    /// A free room (254) with a 3-pixel wall ring (0), as binary PGM.
    fn room_pgm(size: u32) -> Vec<u8> {
        let mut bytes = format!("P5\n# room\n{size} {size}\n255\n").into_bytes();
        for y in 0..size {
            for x in 0..size {
                let wall = x < 3 || y < 3 || x >= size - 3 || y >= size - 3;
                bytes.push(if wall { 0 } else { 254 });
            }
        }
        bytes
    }

    #[test]
    fn loads_room_with_closed_contour() {
        let load = load_map(&room_pgm(20), DESCRIPTOR, &MapConfig::default()).unwrap();
        assert_eq!(load.geometry.dimensions().width, 20);
        assert_eq!(load.encoding, SampleEncoding::Binary);
        assert!(load.warnings.is_empty());
        assert_eq!(load.geometry.contours.len(), 1);
        assert!(load.geometry.contours[0].is_closed());
        assert!((load.georeference.resolution - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let err = load_map(b"P6\n2 2\n255\n....", DESCRIPTOR, &MapConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Format(FormatError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn bad_descriptor_is_fatal() {
        let err = load_map(&room_pgm(8), "resolution: 0\norigin: [0, 0]", &MapConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGeoreference(_)));
    }

    #[test]
    fn invalid_config_is_rejected_before_decoding() {
        let config = MapConfig {
            simplify_tolerance: f64::NAN,
            ..MapConfig::default()
        };
        let err = load_map(b"garbage", DESCRIPTOR, &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn single_row_raster_loads_without_contours() {
        let load = load_map(b"P2\n5 1\n255\n0 255 0 255 0\n", DESCRIPTOR, &MapConfig::default())
            .unwrap();
        assert!(load.geometry.contours.is_empty());
        assert!(matches!(
            load.warnings.as_slice(),
            [Warning::GeometryExtraction { .. }]
        ));
    }

    #[test]
    fn truncated_raster_warns_and_keeps_header_size() {
        let mut bytes = room_pgm(20);
        let header_len = bytes.len() - 400;
        bytes.truncate(header_len + 200);
        let load = load_map(&bytes, DESCRIPTOR, &MapConfig::default()).unwrap();
        assert_eq!((load.geometry.width, load.geometry.height), (20, 20));
        assert_eq!(load.raster.samples.len(), 200);
        assert!(matches!(
            load.warnings.first(),
            Some(Warning::PartialData {
                expected: 400,
                actual: 200
            })
        ));
    }

    #[test]
    fn diagnostics_track_optional_cleanup() {
        let (_, plain) =
            load_map_with_diagnostics(&room_pgm(20), DESCRIPTOR, &MapConfig::default()).unwrap();
        assert!(plain.cleanup.is_none());
        assert_eq!(plain.summary.contour_count, 1);

        let config = MapConfig {
            cleanup: Some(CleanupConfig::default()),
            contour_tracer: ContourTracerKind::BorderFollowing,
            ..MapConfig::default()
        };
        let (load, diag) = load_map_with_diagnostics(&room_pgm(20), DESCRIPTOR, &config).unwrap();
        assert!(diag.cleanup.is_some());
        assert!(!load.geometry.contours.is_empty());
        // The returned raster is the decoded one, not the cleaned one.
        assert_eq!(load.raster.get(10, 10), Some(254));
    }

    #[test]
    fn huge_declared_size_skips_cleanup_instead_of_allocating() {
        let config = MapConfig {
            cleanup: Some(CleanupConfig::default()),
            line_detection: Some(LineDetectionConfig::default()),
            ..MapConfig::default()
        };
        let bytes = b"P5\n4000000000 4000000000\n255\n\x00\x01";
        let (load, diag) = load_map_with_diagnostics(bytes, DESCRIPTOR, &config).unwrap();
        assert_eq!(load.raster.samples, vec![0, 1]);
        assert!(load.geometry.contours.is_empty());
        assert!(load.lines.is_none());
        assert!(diag.cleanup.is_none());
        assert!(diag.line_detection.is_none());

        let skipped: Vec<&str> = load
            .warnings
            .iter()
            .filter_map(|w| match w {
                Warning::StageSkipped { stage, .. } => Some(stage.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, ["cleanup", "line detection"]);
        assert!(
            load.warnings
                .iter()
                .any(|w| matches!(w, Warning::GeometryExtraction { .. }))
        );
    }

    #[test]
    fn line_detection_finds_room_walls() {
        let config = MapConfig {
            line_detection: Some(LineDetectionConfig::default()),
            ..MapConfig::default()
        };
        let (load, diag) = load_map_with_diagnostics(&room_pgm(80), DESCRIPTOR, &config).unwrap();
        let detection = load.lines.unwrap();
        assert_eq!(detection.edges.dimensions(), (80, 80));
        assert!(!detection.segments.is_empty());
        assert!(diag.line_detection.is_some());
        assert!(load.warnings.is_empty());
    }

    #[test]
    fn line_detection_is_off_by_default() {
        let load = load_map(&room_pgm(20), DESCRIPTOR, &MapConfig::default()).unwrap();
        assert!(load.lines.is_none());
    }

    #[test]
    fn evidence_save_then_load_round_trips() {
        let georef = Georeference::from_descriptor(DESCRIPTOR).unwrap();
        let now = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let payload = r#"[
            {"id": "2", "pixel": {"x": 10, "y": 5}, "time": "9:15"},
            {"id": "2", "x": "0.5", "y": "0.25", "label": "Casing, 9mm"}
        ]"#;
        let saved = save_evidence(payload, &georef, 20, now).unwrap();
        assert_eq!(saved.rows[0].id, "2");
        assert_eq!(saved.rows[1].id, "3");
        assert_eq!(saved.rows[1].time, "08:00:00");

        let span = saved.time_span.unwrap();
        assert_eq!(span.earliest, now);
        assert_eq!(span.latest, NaiveTime::from_hms_opt(9, 15, 0).unwrap());

        let text = std::str::from_utf8(&saved.table).unwrap();
        let loaded = load_evidence(text, &georef, 20);
        assert_eq!(loaded, saved.rows);
        assert_eq!(loaded[0].pixel, Some(Point::new(10.0, 5.0)));
    }

    #[test]
    fn empty_save_stores_nothing() {
        let georef = Georeference::from_descriptor(DESCRIPTOR).unwrap();
        let now = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let saved = save_evidence("[]", &georef, 20, now).unwrap();
        assert!(saved.rows.is_empty());
        assert!(saved.table.is_empty());
        assert!(saved.time_span.is_none());
    }

    #[test]
    fn non_list_payload_is_rejected() {
        let georef = Georeference::from_descriptor(DESCRIPTOR).unwrap();
        let now = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(matches!(
            save_evidence(r#"{"rows": []}"#, &georef, 20, now),
            Err(PipelineError::InvalidEvidencePayload(_))
        ));
    }

    #[test]
    fn malformed_markers_do_not_reject_the_save() {
        let georef = Georeference::from_descriptor(DESCRIPTOR).unwrap();
        let now = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let payload = r#"[{"id": "1", "label": 42}, null, {"label": ""}]"#;
        let saved = save_evidence(payload, &georef, 20, now).unwrap();
        assert_eq!(saved.rows.len(), 3);
        assert_eq!(saved.rows[0].label.as_deref(), Some("42"));

        let stored = table::decode(std::str::from_utf8(&saved.table).unwrap());
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].label, None);
        assert_eq!(stored[2].label.as_deref(), Some(""));
    }
}
