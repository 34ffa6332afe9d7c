//! casemap: command-line driver for case maps and evidence tables.
//!
//! Runs the geometry pipeline on files from disk, which stand in for the
//! object store:
//!
//! - `map`: load a raster and descriptor, print per-stage diagnostics,
//!   optionally export SVG, PNG and a line overlay PNG.
//! - `project`: attach display pixels to a stored evidence table.
//! - `normalize`: turn an editor save payload into a stored table, and
//!   optionally merge its time range into the case metadata.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin casemap -- map [OPTIONS] <RASTER> <DESCRIPTOR>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod logger;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use casemap_geometry::{
    CaseMetadata, CleanupConfig, ContourTracerKind, Georeference, LineDetectionConfig, MapConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

/// Case map geometry and evidence tables.
#[derive(Parser)]
#[command(name = "casemap", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a map and report per-stage diagnostics.
    Map(MapArgs),
    /// Attach display pixels to a stored evidence table.
    Project(ProjectArgs),
    /// Normalize an editor save payload into a stored evidence table.
    Normalize(NormalizeArgs),
}

/// Raster and descriptor shared by every subcommand.
#[derive(Args)]
struct MapInputs {
    /// Occupancy raster (P2 or P5).
    raster: PathBuf,

    /// Georeferencing descriptor (`key: value` lines or JSON).
    descriptor: PathBuf,
}

#[derive(Args)]
struct MapArgs {
    #[command(flatten)]
    inputs: MapInputs,

    /// Iso-level separating walls from free space.
    #[arg(long, default_value_t = MapConfig::DEFAULT_THRESHOLD)]
    threshold: u8,

    /// RDP simplification tolerance in pixels.
    #[arg(long, default_value_t = MapConfig::DEFAULT_SIMPLIFY_TOLERANCE)]
    simplify_tolerance: f64,

    /// Contour tracing algorithm.
    #[arg(long, value_enum, default_value_t = Tracer::MarchingSquares)]
    tracer: Tracer,

    /// Run map cleanup (median filter, closing, gap pruning) before tracing.
    #[arg(long)]
    cleanup: bool,

    /// Largest wall fragment removed by cleanup, in pixels per side.
    #[arg(long, default_value_t = CleanupConfig::DEFAULT_MAX_GAP_PX)]
    max_gap_px: u8,

    /// Run edge and line detection after cleanup.
    #[arg(long)]
    lines: bool,

    /// Stored evidence table to draw on the SVG.
    #[arg(long)]
    evidence: Option<PathBuf>,

    /// Write SVG output to file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Write the base bitmap as PNG to file.
    #[arg(long)]
    png: Option<PathBuf>,

    /// Write the edge map with detected lines as PNG to file.
    ///
    /// Implies `--lines`.
    #[arg(long)]
    lines_png: Option<PathBuf>,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full map config as a JSON string.
    ///
    /// When provided, all other map parameter flags are ignored.
    /// Missing keys take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

#[derive(Args)]
struct ProjectArgs {
    /// Stored evidence table.
    table: PathBuf,

    #[command(flatten)]
    inputs: MapInputs,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Editor save payload: a JSON list of evidence records.
    payload: PathBuf,

    #[command(flatten)]
    inputs: MapInputs,

    /// Write the table here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Case metadata JSON to merge the evidence time range into.
    /// Created if missing.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Case id used to fill display defaults in new metadata.
    #[arg(long, requires = "metadata")]
    case_id: Option<String>,
}

/// Contour tracing algorithm selection.
#[derive(Clone, Copy, ValueEnum)]
enum Tracer {
    /// Marching squares with sub-pixel interpolation.
    MarchingSquares,
    /// Border following on the thresholded grid.
    BorderFollowing,
}

fn main() -> ExitCode {
    logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Map(args) => run_map(&args),
        Command::Project(args) => run_project(&args),
        Command::Normalize(args) => run_normalize(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// Build a [`MapConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(args: &MapArgs) -> Result<MapConfig, String> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(MapConfig {
        threshold: args.threshold,
        simplify_tolerance: args.simplify_tolerance,
        contour_tracer: match args.tracer {
            Tracer::MarchingSquares => ContourTracerKind::MarchingSquares,
            Tracer::BorderFollowing => ContourTracerKind::BorderFollowing,
        },
        cleanup: args.cleanup.then(|| CleanupConfig {
            max_gap_px: args.max_gap_px,
            ..CleanupConfig::default()
        }),
        line_detection: (args.lines || args.lines_png.is_some())
            .then(LineDetectionConfig::default),
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn read_text(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), String> {
    std::fs::write(path, bytes).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    eprintln!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Read the raster header and descriptor: the georeference plus the height
/// pixel rows flip against.
fn read_georeference(inputs: &MapInputs) -> Result<(Georeference, u32), String> {
    let raster_bytes = read_bytes(&inputs.raster)?;
    let decoded = casemap_geometry::raster::decode(&raster_bytes)
        .map_err(|e| format!("Error decoding {}: {e}", inputs.raster.display()))?;
    let descriptor = read_text(&inputs.descriptor)?;
    let georeference = Georeference::from_descriptor(&descriptor)
        .map_err(|e| format!("Error in {}: {e}", inputs.descriptor.display()))?;
    Ok((georeference, decoded.raster.height))
}

fn run_map(args: &MapArgs) -> Result<(), String> {
    let config = config_from_cli(args)?;
    let raster_bytes = read_bytes(&args.inputs.raster)?;
    let descriptor = read_text(&args.inputs.descriptor)?;

    info!(
        raster = %args.inputs.raster.display(),
        bytes = raster_bytes.len(),
        "loading map"
    );

    let (load, diagnostics) =
        casemap_geometry::load_map_with_diagnostics(&raster_bytes, &descriptor, &config)
            .map_err(|e| format!("Pipeline error: {e}"))?;

    if args.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }

    if let Some(ref svg_path) = args.svg {
        let evidence = match args.evidence {
            Some(ref table_path) => casemap_geometry::load_evidence(
                &read_text(table_path)?,
                &load.georeference,
                load.geometry.height,
            ),
            None => Vec::new(),
        };
        let title = args
            .inputs
            .raster
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("map");
        let config_json = serde_json::to_string(&config)
            .map_err(|e| format!("Error serializing config: {e}"))?;
        let metadata = casemap_export::SvgMetadata {
            title: Some(title),
            description: None,
            config_json: Some(&config_json),
        };
        let svg = casemap_export::to_svg(&load.geometry, &evidence, &metadata);
        write_bytes(svg_path, svg.as_bytes())?;
    } else if args.evidence.is_some() {
        warn!("--evidence has no effect without --svg");
    }

    if let Some(ref png_path) = args.png {
        let png = casemap_export::encode_png(&load.raster)
            .map_err(|e| format!("Error encoding PNG: {e}"))?;
        write_bytes(png_path, &png)?;
    }

    if let Some(ref lines_path) = args.lines_png {
        match load.lines {
            Some(ref detection) => {
                let png = casemap_export::encode_line_overlay_png(detection)
                    .map_err(|e| format!("Error encoding line overlay: {e}"))?;
                write_bytes(lines_path, &png)?;
            }
            None => warn!("line detection was skipped; {} not written", lines_path.display()),
        }
    }

    Ok(())
}

fn run_project(args: &ProjectArgs) -> Result<(), String> {
    let (georeference, height) = read_georeference(&args.inputs)?;
    let table = read_text(&args.table)?;
    let records = casemap_geometry::load_evidence(&table, &georeference, height);
    info!(records = records.len(), "projected evidence");

    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| format!("Error serializing records: {e}"))?;
    println!("{json}");
    Ok(())
}

fn run_normalize(args: &NormalizeArgs) -> Result<(), String> {
    let (georeference, height) = read_georeference(&args.inputs)?;
    let payload = read_text(&args.payload)?;
    let now = chrono::Local::now().time();

    let saved = casemap_geometry::save_evidence(&payload, &georeference, height, now)
        .map_err(|e| format!("Error in {}: {e}", args.payload.display()))?;
    info!(records = saved.rows.len(), "normalized evidence");

    match args.output {
        Some(ref path) => write_bytes(path, &saved.table)?,
        None => print!("{}", String::from_utf8_lossy(&saved.table)),
    }

    if let Some(ref metadata_path) = args.metadata {
        let mut metadata = if metadata_path.exists() {
            serde_json::from_str(&read_text(metadata_path)?)
                .map_err(|e| format!("Error parsing {}: {e}", metadata_path.display()))?
        } else {
            args.case_id
                .as_deref()
                .map_or_else(CaseMetadata::default, CaseMetadata::for_case)
        };

        if let Some(span) = saved.time_span {
            metadata.merge_time_span(span);
        }
        metadata.touch(chrono::Utc::now());

        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| format!("Error serializing metadata: {e}"))?;
        write_bytes(metadata_path, json.as_bytes())?;
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_build_config() {
        let cli = Cli::try_parse_from([
            "casemap",
            "map",
            "room.pgm",
            "room.yaml",
            "--threshold",
            "200",
            "--tracer",
            "border-following",
            "--cleanup",
            "--max-gap-px",
            "6",
        ])
        .unwrap();
        let Command::Map(args) = cli.command else {
            unreachable!()
        };
        let config = config_from_cli(&args).unwrap();
        assert_eq!(config.threshold, 200);
        assert_eq!(config.contour_tracer, ContourTracerKind::BorderFollowing);
        assert_eq!(config.cleanup.unwrap().max_gap_px, 6);
        assert!(config.line_detection.is_none());
    }

    #[test]
    fn lines_png_enables_line_detection() {
        let cli = Cli::try_parse_from([
            "casemap",
            "map",
            "room.pgm",
            "room.yaml",
            "--lines-png",
            "lines.png",
        ])
        .unwrap();
        let Command::Map(args) = cli.command else {
            unreachable!()
        };
        let config = config_from_cli(&args).unwrap();
        assert_eq!(config.line_detection, Some(LineDetectionConfig::default()));
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::try_parse_from([
            "casemap",
            "map",
            "room.pgm",
            "room.yaml",
            "--threshold",
            "200",
            "--config-json",
            r#"{"simplify_tolerance": 2.0}"#,
        ])
        .unwrap();
        let Command::Map(args) = cli.command else {
            unreachable!()
        };
        let config = config_from_cli(&args).unwrap();
        assert_eq!(config.threshold, MapConfig::DEFAULT_THRESHOLD);
        assert!((config.simplify_tolerance - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_config_json_is_reported() {
        let cli = Cli::try_parse_from([
            "casemap",
            "map",
            "a.pgm",
            "a.yaml",
            "--config-json",
            "{not json",
        ])
        .unwrap();
        let Command::Map(args) = cli.command else {
            unreachable!()
        };
        assert!(config_from_cli(&args).unwrap_err().contains("--config-json"));
    }

    #[test]
    fn case_id_requires_metadata() {
        let result = Cli::try_parse_from([
            "casemap",
            "normalize",
            "save.json",
            "a.pgm",
            "a.yaml",
            "--case-id",
            "c1",
        ]);
        assert!(result.is_err());
    }
}
