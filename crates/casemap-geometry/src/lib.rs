//! casemap-geometry: occupancy-map geometry and evidence normalization
//! (sans-IO).
//!
//! Loading a case map runs:
//! raster decode -> georeference -> optional cleanup -> optional line
//! detection -> contour tracing -> simplification.
//!
//! Saving evidence runs:
//! payload parse -> canonical rows -> delimited table.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory bytes
//! and strings and returns structured data. Reading and writing blobs is
//! the caller's job.

pub mod case;
pub mod cleanup;
pub mod contour;
pub mod diagnostics;
pub mod evidence;
pub mod georef;
pub mod lines;
pub mod pipeline;
pub mod raster;
pub mod simplify;
pub mod table;
pub mod types;

pub use case::{CaseMetadata, CaseStatus, DisplayDefaults, EvidenceTimeSpan};
pub use cleanup::CleanupConfig;
pub use contour::{ContourTracer, ContourTracerKind, extract_contours};
pub use diagnostics::PipelineDiagnostics;
pub use evidence::{
    EvidenceInput, EvidenceRecord, build_canonical_rows, build_canonical_rows_now,
    parse_evidence_payload, project_to_pixels,
};
pub use georef::{Georeference, Origin, pixel_to_world, world_to_pixel};
pub use lines::{LineDetection, LineDetectionConfig, LineSegment, detect_line_segments};
pub use pipeline::{
    EvidenceSave, MapLoad, load_evidence, load_map, load_map_with_diagnostics, save_evidence,
};
pub use raster::{FormatError, Raster, RasterTooLarge, SampleEncoding};
pub use types::{
    Contour, Dimensions, MapConfig, MapGeometry, PipelineError, Point, Polyline, Warning,
};
