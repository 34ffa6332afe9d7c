//! SVG export serializer.
//!
//! Renders a [`MapGeometry`] as an SVG document in pixel space using the
//! [`svg`] crate for document construction, XML escaping, and path data
//! formatting:
//!
//! - each contour becomes a `<path>` inside `<g id="contours">`, using
//!   `M` (move to) and `L` (line to) commands;
//! - each evidence record with a finite display pixel becomes a
//!   `<circle>` plus a `<text>` label inside `<g id="evidence">`.
//!
//! Optional [`SvgMetadata`] embeds `<title>`, `<desc>` and the map
//! configuration.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Description, Element, Group, Path, Title};
use svg::node::{Node, Text, Value};

use casemap_geometry::{EvidenceRecord, MapGeometry, Polyline};

/// Evidence marker radius in pixels.
const MARKER_RADIUS: f64 = 3.0;

/// Horizontal gap between a marker and its label, in pixels.
const LABEL_OFFSET: f64 = 5.0;

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped by the `svg`
/// crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`. Typically the case title.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized map configuration, emitted inside
    /// `<metadata><casemap:map>` so exported files record how the
    /// contours were produced.
    pub config_json: Option<&'a str>,
}

/// Build an SVG path `d` attribute string from a polyline.
///
/// Uses `M` for the first point and `L` for subsequent points.
/// Returns an empty string for polylines with fewer than 2 points.
///
/// Coordinates are formatted by the [`svg`] crate using `f32` precision
/// (sufficient for pixel-space contours).
///
/// # Examples
///
/// ```
/// use casemap_geometry::{Point, Polyline};
/// use casemap_export::build_path_data;
///
/// let polyline = Polyline::new(vec![
///     Point::new(10.0, 20.0),
///     Point::new(30.0, 40.0),
/// ]);
/// let d = build_path_data(&polyline);
/// assert_eq!(d, "M10,20 L30,40");
/// ```
#[must_use]
pub fn build_path_data(polyline: &Polyline) -> String {
    let points = polyline.points();
    if points.len() < 2 {
        return String::new();
    }

    let first = &points[0];
    let mut data = Data::new().move_to((first.x, first.y));
    for p in &points[1..] {
        data = data.line_to((p.x, p.y));
    }
    String::from(Value::from(data))
}

/// Serialize map contours and evidence markers as an SVG document.
///
/// The document's `width`, `height` and `viewBox` match the raster, so
/// SVG user units are pixels. Evidence records without a finite display
/// pixel are left out. Markers are labelled with the record's `label`,
/// or its id when there is none.
#[must_use]
pub fn to_svg(
    geometry: &MapGeometry,
    evidence: &[EvidenceRecord],
    metadata: &SvgMetadata<'_>,
) -> String {
    let (w, h) = (geometry.width, geometry.height);
    let mut doc = Document::new()
        .set("width", w)
        .set("height", h)
        .set("viewBox", (0, 0, w, h));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }

    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }

    if let Some(config_json) = metadata.config_json {
        let mut map_el = Element::new("casemap:map");
        map_el.assign("xmlns:casemap", "https://casemap.dev/ns/1");
        map_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(map_el);
        doc = doc.add(metadata_el);
    }

    let paths: Vec<Path> = geometry
        .contours
        .iter()
        .map(build_path_data)
        .filter(|d| !d.is_empty())
        .map(|d| Path::new().set("d", d))
        .collect();
    if !paths.is_empty() {
        let group = paths.into_iter().fold(
            Group::new()
                .set("id", "contours")
                .set("fill", "none")
                .set("stroke", "black")
                .set("stroke-width", 1),
            Group::add,
        );
        doc = doc.add(group);
    }

    let markers: Vec<(&EvidenceRecord, f64, f64)> = evidence
        .iter()
        .filter_map(|record| {
            let pixel = record.pixel?;
            pixel.is_finite().then_some((record, pixel.x, pixel.y))
        })
        .collect();
    if !markers.is_empty() {
        let mut group = Group::new()
            .set("id", "evidence")
            .set("font-family", "sans-serif")
            .set("font-size", 10);
        for (record, x, y) in markers {
            group = group.add(
                Circle::new()
                    .set("cx", x)
                    .set("cy", y)
                    .set("r", MARKER_RADIUS)
                    .set("fill", "red")
                    .set("data-id", record.id.as_str()),
            );

            let mut label = Element::new("text");
            label.assign("x", x + LABEL_OFFSET);
            label.assign("y", y);
            label.append(Text::new(record.label.as_deref().unwrap_or(&record.id)));
            group = group.add(label);
        }
        doc = doc.add(group);
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
