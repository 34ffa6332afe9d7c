//! Integration test: run a synthetic occupancy map through the full
//! pipeline, save evidence against it, and export SVG and PNG images.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use casemap_geometry::{MapConfig, Warning};

const DESCRIPTOR: &str = "\
image: room.pgm
resolution: 0.050000
origin: [-2.000000, -1.500000, 0.000000]
negate: 0
occupied_thresh: 0.65
free_thresh: 0.196
";

/// 60x40 map: unknown border (205), a wall ring (0) and free interior
/// (254), with a pillar in the middle.
fn room_pgm() -> Vec<u8> {
    let (width, height) = (60_u32, 40_u32);
    let mut bytes = format!("P5\n# CREATOR: synthetic\n{width} {height}\n255\n").into_bytes();
    for y in 0..height {
        for x in 0..width {
            let inside_outer = (5..55).contains(&x) && (5..35).contains(&y);
            let inside_inner = (8..52).contains(&x) && (8..32).contains(&y);
            let pillar = (28..32).contains(&x) && (18..22).contains(&y);
            let sample = if !inside_outer {
                205
            } else if !inside_inner || pillar {
                0
            } else {
                254
            };
            bytes.push(sample);
        }
    }
    bytes
}

#[test]
fn room_map_pipeline_to_svg_and_png() {
    let config = MapConfig::default();
    let (load, diagnostics) =
        casemap_geometry::load_map_with_diagnostics(&room_pgm(), DESCRIPTOR, &config)
            .expect("map should load");
    eprintln!("{}", diagnostics.report());

    assert!(load.warnings.is_empty());
    assert_eq!((load.geometry.width, load.geometry.height), (60, 40));
    // Unknown border vs wall, wall vs free room, free room vs pillar.
    assert_eq!(load.geometry.contours.len(), 3);
    assert!(load.geometry.contours.iter().all(|c| c.is_closed()));

    let payload = r#"[
        {"id": "1", "pixel": {"x": 10, "y": 10}, "time": "14:05", "label": "Bag"},
        {"x": "0.0", "y": "0.0"}
    ]"#;
    let now = chrono::NaiveTime::from_hms_opt(15, 0, 0).unwrap();
    let height = load.geometry.height;
    let saved = casemap_geometry::save_evidence(payload, &load.georeference, height, now)
        .expect("payload should normalize");
    assert_eq!(saved.rows.len(), 2);
    assert_eq!(saved.rows[1].id, "2");
    assert_eq!(saved.rows[1].time, "15:00:00");

    let svg = casemap_export::to_svg(
        &load.geometry,
        &saved.rows,
        &casemap_export::SvgMetadata {
            title: Some("Room"),
            ..Default::default()
        },
    );
    assert!(svg.contains("<svg"));
    assert_eq!(svg.matches("<path").count(), 3);
    assert_eq!(svg.matches("<circle").count(), 2);
    assert!(svg.contains(">Bag</text>"));
    assert!(svg.contains("</svg>"));

    let png = casemap_export::encode_png(&load.raster).expect("png should encode");
    let decoded = image::load_from_memory(&png).unwrap().to_luma8();
    assert_eq!(decoded.dimensions(), (60, 40));
    assert_eq!(decoded.get_pixel(0, 0).0[0], 205);
    assert_eq!(decoded.get_pixel(20, 20).0[0], 254);
}

#[test]
fn truncated_map_still_exports() {
    let mut bytes = room_pgm();
    let keep = bytes.len() - 60 * 40 / 2;
    bytes.truncate(keep);

    let load = casemap_geometry::load_map(&bytes, DESCRIPTOR, &MapConfig::default()).unwrap();
    assert!(matches!(
        load.warnings.as_slice(),
        [Warning::PartialData {
            expected: 2400,
            actual: 1200
        }]
    ));

    let svg = casemap_export::to_svg(&load.geometry, &[], &casemap_export::SvgMetadata::default());
    assert!(svg.contains("viewBox=\"0 0 60 40\""));

    let png = casemap_export::encode_png(&load.raster).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_luma8();
    // The missing lower half renders as unknown space.
    assert_eq!(decoded.get_pixel(30, 39).0[0], 205);
}

#[test]
fn huge_declared_map_loads_but_refuses_png() {
    let config = MapConfig {
        cleanup: Some(casemap_geometry::CleanupConfig::default()),
        ..MapConfig::default()
    };
    let bytes = b"P5\n4000000000 4000000000\n255\n\x00\x01";
    let load = casemap_geometry::load_map(bytes, DESCRIPTOR, &config).unwrap();
    assert!(
        load.warnings
            .iter()
            .any(|w| matches!(w, Warning::StageSkipped { stage, .. } if stage == "cleanup"))
    );

    let err = casemap_export::encode_png(&load.raster).unwrap_err();
    assert!(matches!(err, casemap_export::ExportError::TooLarge(_)));
}

#[test]
fn room_lines_export_as_overlay() {
    let config = MapConfig {
        line_detection: Some(casemap_geometry::LineDetectionConfig {
            vote_threshold: 25,
            min_line_length: 20.0,
            ..Default::default()
        }),
        ..MapConfig::default()
    };
    let load = casemap_geometry::load_map(&room_pgm(), DESCRIPTOR, &config).unwrap();
    let detection = load.lines.expect("line detection should run");
    assert!(!detection.segments.is_empty());

    let png = casemap_export::encode_line_overlay_png(&detection).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (60, 40));
    assert!(decoded.pixels().any(|p| p.0 == [0, 255, 0]));
}
