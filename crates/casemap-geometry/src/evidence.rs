//! Evidence table normalization.
//!
//! Evidence markers travel in two shapes:
//!
//! - [`EvidenceInput`]: what the editor sends on save. Any field may be
//!   missing or malformed; a dragged marker carries a raw `pixel`.
//! - [`EvidenceRecord`]: the canonical stored row. Ids are unique decimal
//!   integers, world coordinates carry exactly six decimals, and times
//!   are zero-padded `HH:MM:SS`.
//!
//! [`build_canonical_rows`] turns the first into the second;
//! [`project_to_pixels`] attaches display positions to stored rows.
//! Neither keeps state between calls. The only impure input is the
//! wall-clock time used for missing or invalid times, which the caller
//! reads once per batch and passes in.

use std::collections::HashSet;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::georef::Georeference;
use crate::types::{PipelineError, Point};

/// Canonical evidence row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Unique decimal integer.
    pub id: String,
    /// World x with six decimals, or empty when unknown.
    pub x: String,
    /// World y with six decimals, or empty when unknown.
    pub y: String,
    /// Time of day, `HH:MM:SS`.
    pub time: String,
    /// Display position in pixel space. NaN coordinates mean the world
    /// position could not be parsed; the display layer hides those.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel: Option<Point>,
    /// Short marker caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Evidence type, free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Investigator notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EvidenceRecord {
    /// World position parsed from the `x`/`y` fields; unparseable axes
    /// are NaN.
    #[must_use]
    pub fn world(&self) -> Point {
        Point::new(parse_coordinate(&self.x), parse_coordinate(&self.y))
    }
}

/// Evidence as submitted by the editor.
///
/// Every field is optional. Text fields accept any JSON scalar: strings
/// are taken as is, other values in their JSON rendering, and `null` as
/// missing. `pixel` accepts an object whose `x`/`y` are numbers or
/// numeric strings; anything else becomes NaN.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceInput {
    /// Submitted id; kept when it is a decimal integer not seen earlier.
    #[serde(deserialize_with = "loose_string")]
    pub id: Option<String>,
    /// World x as typed.
    #[serde(deserialize_with = "loose_string")]
    pub x: Option<String>,
    /// World y as typed.
    #[serde(deserialize_with = "loose_string")]
    pub y: Option<String>,
    /// Time of day as typed.
    #[serde(deserialize_with = "loose_string")]
    pub time: Option<String>,
    /// Pixel position of a marker moved in the editor.
    #[serde(deserialize_with = "loose_point")]
    pub pixel: Option<Point>,
    /// Short marker caption.
    #[serde(deserialize_with = "loose_string")]
    pub label: Option<String>,
    /// Evidence type, free text.
    #[serde(deserialize_with = "loose_string")]
    pub category: Option<String>,
    /// Investigator notes.
    #[serde(deserialize_with = "loose_string")]
    pub notes: Option<String>,
}

impl From<EvidenceRecord> for EvidenceInput {
    fn from(record: EvidenceRecord) -> Self {
        Self {
            id: Some(record.id),
            x: Some(record.x),
            y: Some(record.y),
            time: Some(record.time),
            pixel: None,
            label: record.label,
            category: record.category,
            notes: record.notes,
        }
    }
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn loose_point<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Point>, D::Error> {
    fn axis(value: Option<&Value>) -> f64 {
        match value {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            Some(Value::String(s)) => parse_coordinate(s),
            _ => f64::NAN,
        }
    }

    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => Some(Point::new(axis(map.get("x")), axis(map.get("y")))),
        _ => None,
    })
}

/// Parse an editor save payload.
///
/// One element per marker comes back, in order. An element that is not
/// an object, or that fails to read, becomes an all-default input and is
/// logged; it never rejects the rest of the batch.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidEvidencePayload`] if the text is not
/// JSON or not a JSON array.
pub fn parse_evidence_payload(json: &str) -> Result<Vec<EvidenceInput>, PipelineError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| PipelineError::InvalidEvidencePayload(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(PipelineError::InvalidEvidencePayload(format!(
            "expected a list of records, got {}",
            json_kind(&value)
        )));
    };

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            if !item.is_object() {
                warn!(record = i, kind = json_kind(&item), "evidence record is not an object");
                return EvidenceInput::default();
            }
            serde_json::from_value(item).unwrap_or_else(|e| {
                warn!(record = i, error = %e, "unreadable evidence record");
                EvidenceInput::default()
            })
        })
        .collect())
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Attach a display pixel to every stored row.
///
/// Never fails: rows whose `x`/`y` do not parse get NaN pixel coordinates.
#[must_use]
pub fn project_to_pixels(
    records: &[EvidenceRecord],
    georef: &Georeference,
    height: u32,
) -> Vec<EvidenceRecord> {
    records
        .iter()
        .map(|record| EvidenceRecord {
            pixel: Some(georef.to_pixel(record.world(), height)),
            ..record.clone()
        })
        .collect()
}

/// Normalize editor input into canonical rows.
///
/// - Ids: numeric ids are kept, digits as submitted, the first time their
///   value appears. Missing, non-numeric, and repeated ids get `max + 1`,
///   where `max` starts as the largest numeric id anywhere in the input
///   and advances with each assignment, in input order. Once `max` is
///   `u64::MAX`, the smallest value no input uses is taken instead.
/// - World position: derived from `pixel` when that gives two finite
///   numbers, else parsed from `x`/`y`, else `(0, 0)`.
/// - Time: valid `H:MM`, `H:MM:SS` or `HH:MM:SS` is re-rendered as
///   `HH:MM:SS`; anything else becomes `now`.
///
/// The returned rows carry display pixels recomputed from the stored
/// world values.
#[must_use]
pub fn build_canonical_rows(
    records: &[EvidenceInput],
    georef: &Georeference,
    height: u32,
    now: NaiveTime,
) -> Vec<EvidenceRecord> {
    let submitted: HashSet<u64> = records
        .iter()
        .filter_map(|r| parse_id(r.id.as_deref()))
        .map(|(value, _)| value)
        .collect();
    let mut max_id = submitted.iter().copied().max().unwrap_or(0);
    let mut assigned = HashSet::with_capacity(records.len());

    records
        .iter()
        .map(|input| {
            let id = match parse_id(input.id.as_deref()) {
                Some((value, digits)) if assigned.insert(value) => digits.to_string(),
                _ => {
                    let value = next_free_id(&mut max_id, &submitted, &assigned);
                    assigned.insert(value);
                    debug!(from = ?input.id, to = value, "assigned evidence id");
                    value.to_string()
                }
            };

            let world = resolve_world(input, georef, height);
            let x = format_coordinate(world.x);
            let y = format_coordinate(world.y);
            let pixel = georef.to_pixel(
                Point::new(parse_coordinate(&x), parse_coordinate(&y)),
                height,
            );

            EvidenceRecord {
                id,
                x,
                y,
                time: normalize_time(input.time.as_deref(), now),
                pixel: Some(pixel),
                label: input.label.clone(),
                category: input.category.clone(),
                notes: input.notes.clone(),
            }
        })
        .collect()
}

/// [`build_canonical_rows`] with the local wall-clock time, read once for
/// the whole batch.
#[must_use]
pub fn build_canonical_rows_now(
    records: &[EvidenceInput],
    georef: &Georeference,
    height: u32,
) -> Vec<EvidenceRecord> {
    let now = chrono::Local::now().time();
    build_canonical_rows(records, georef, height, now)
}

/// Numeric value and trimmed digits of an id made only of ASCII digits.
fn parse_id(raw: Option<&str>) -> Option<(u64, &str)> {
    let raw = raw?.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((raw.parse().ok()?, raw))
}

/// `max + 1`, advancing `max`; past `u64::MAX`, the smallest positive id
/// neither submitted nor assigned.
fn next_free_id(max_id: &mut u64, submitted: &HashSet<u64>, assigned: &HashSet<u64>) -> u64 {
    if let Some(next) = max_id.checked_add(1) {
        *max_id = next;
        return next;
    }
    // Both sets are finite, so the scan ends well before the range does.
    (1..=u64::MAX)
        .find(|id| !submitted.contains(id) && !assigned.contains(id))
        .unwrap_or(0)
}

fn resolve_world(input: &EvidenceInput, georef: &Georeference, height: u32) -> Point {
    if let Some(pixel) = input.pixel {
        let world = georef.to_world(pixel, height);
        if world.is_finite() {
            return world;
        }
    }

    let parsed = Point::new(
        input.x.as_deref().map_or(f64::NAN, parse_coordinate),
        input.y.as_deref().map_or(f64::NAN, parse_coordinate),
    );
    if parsed.is_finite() {
        parsed
    } else {
        Point::new(0.0, 0.0)
    }
}

fn parse_coordinate(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(f64::NAN)
}

/// Render a world coordinate with exactly six decimals; non-finite values
/// render empty.
#[must_use]
pub fn format_coordinate(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let text = format!("{value:.6}");
    // Values that round to zero from below would print as "-0.000000".
    if text.trim_start_matches('-').bytes().all(|b| b == b'0' || b == b'.') {
        return "0.000000".to_string();
    }
    text
}

/// Normalize a time of day to `HH:MM:SS`, substituting `now` when `raw`
/// is missing or invalid.
#[must_use]
pub fn normalize_time(raw: Option<&str>, now: NaiveTime) -> String {
    raw.and_then(parse_time_of_day)
        .unwrap_or(now)
        .format("%H:%M:%S")
        .to_string()
}

/// Accept `H:MM`, `H:MM:SS` and `HH:MM:SS` with in-range fields.
fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    fn digits(part: &str, min_len: usize, max_len: usize) -> Option<u32> {
        if !(min_len..=max_len).contains(&part.len()) || !part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        part.parse().ok()
    }

    let mut parts = raw.trim().split(':');
    let hour = digits(parts.next()?, 1, 2)?;
    let minute = digits(parts.next()?, 2, 2)?;
    let second = match parts.next() {
        Some(part) => digits(part, 2, 2)?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}
