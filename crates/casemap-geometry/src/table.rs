//! Delimited text codec for stored evidence tables.
//!
//! The stored layout is comma-separated with a header line. Columns
//! `id,x,y,time` always come first and in that order; `label`,
//! `category` and `notes` follow only when some row carries them.
//! Fields containing a comma, a double quote or a line break are wrapped
//! in double quotes with inner quotes doubled. An optional column that is
//! present but empty is written as `""`, so it stays distinct from an
//! absent one, which is written as nothing.

use std::mem;

use crate::evidence::EvidenceRecord;

const FIXED_COLUMNS: [&str; 4] = ["id", "x", "y", "time"];
const OPTIONAL_COLUMNS: [&str; 3] = ["label", "category", "notes"];

/// Serialize rows to the stored layout.
///
/// An empty slice encodes to no bytes at all, not a header-only table.
/// Display pixels are never stored.
#[must_use]
pub fn encode(rows: &[EvidenceRecord]) -> Vec<u8> {
    if rows.is_empty() {
        return Vec::new();
    }

    let optional: Vec<&str> = OPTIONAL_COLUMNS
        .into_iter()
        .filter(|&column| rows.iter().any(|row| optional_field(row, column).is_some()))
        .collect();

    let mut out = String::new();
    let header = FIXED_COLUMNS.iter().chain(&optional).copied().map(Some);
    write_line(&mut out, header);

    for row in rows {
        let fixed = [
            Some(row.id.as_str()),
            Some(row.x.as_str()),
            Some(row.y.as_str()),
            Some(row.time.as_str()),
        ];
        let extra = optional.iter().map(|&column| optional_field(row, column));
        write_line(&mut out, fixed.into_iter().chain(extra));
    }

    out.into_bytes()
}

/// Parse the stored layout.
///
/// The first line names the columns; later lines map to those names by
/// position. Unknown columns are ignored and missing ones read as empty.
/// An optional column reads as `None` when its field is empty and
/// unquoted. Accepts quoted and unquoted fields, `\n` or `\r\n` line endings, a
/// leading byte-order mark, and blank lines.
#[must_use]
pub fn decode(text: &str) -> Vec<EvidenceRecord> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = parse_fields(text).into_iter();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let header: Vec<String> = header
        .iter()
        .map(|name| name.text.trim().to_ascii_lowercase())
        .collect();

    lines
        .map(|fields| {
            let mut record = EvidenceRecord::default();
            for (name, field) in header.iter().zip(fields) {
                match name.as_str() {
                    "id" => record.id = field.text,
                    "x" => record.x = field.text,
                    "y" => record.y = field.text,
                    "time" => record.time = field.text,
                    "label" => record.label = field.into_optional(),
                    "category" => record.category = field.into_optional(),
                    "notes" => record.notes = field.into_optional(),
                    _ => {}
                }
            }
            record
        })
        .collect()
}

fn optional_field<'a>(row: &'a EvidenceRecord, column: &str) -> Option<&'a str> {
    match column {
        "label" => row.label.as_deref(),
        "category" => row.category.as_deref(),
        "notes" => row.notes.as_deref(),
        _ => None,
    }
}

/// Write one line. `None` fields are written as nothing.
fn write_line<'a>(out: &mut String, fields: impl Iterator<Item = Option<&'a str>>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        match field {
            None => {}
            Some(text) if text.is_empty() || text.contains([',', '"', '\n', '\r']) => {
                out.push('"');
                out.push_str(&text.replace('"', "\"\""));
                out.push('"');
            }
            Some(text) => out.push_str(text),
        }
    }
    out.push('\n');
}

/// One unescaped field and whether it was written in quotes.
#[derive(Debug, Default)]
struct Field {
    text: String,
    quoted: bool,
}

impl Field {
    fn is_blank(&self) -> bool {
        self.text.is_empty() && !self.quoted
    }

    fn into_optional(self) -> Option<String> {
        (!self.is_blank()).then_some(self.text)
    }
}

/// Split text into lines of unescaped fields. Blank lines are dropped.
fn parse_fields(text: &str) -> Vec<Vec<Field>> {
    let mut lines = Vec::new();
    let mut line = Vec::new();
    let mut field = Field::default();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.text.push('"');
                }
                '"' => in_quotes = false,
                _ => field.text.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_blank() => {
                in_quotes = true;
                field.quoted = true;
            }
            ',' => line.push(mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                line.push(mem::take(&mut field));
                push_line(&mut lines, mem::take(&mut line));
            }
            _ => field.text.push(c),
        }
    }

    if !field.is_blank() || !line.is_empty() {
        line.push(field);
        push_line(&mut lines, line);
    }
    lines
}

fn push_line(lines: &mut Vec<Vec<Field>>, line: Vec<Field>) {
    let blank = matches!(line.as_slice(), [only] if only.is_blank());
    if !blank {
        lines.push(line);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row(id: &str, x: &str, y: &str, time: &str) -> EvidenceRecord {
        EvidenceRecord {
            id: id.into(),
            x: x.into(),
            y: y.into(),
            time: time.into(),
            ..EvidenceRecord::default()
        }
    }

    fn text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn empty_rows_encode_to_nothing() {
        assert!(encode(&[]).is_empty());
    }

    #[test]
    fn encodes_fixed_columns_in_order() {
        let bytes = encode(&[row("1", "0.500000", "-2.000000", "09:00:00")]);
        assert_eq!(text(&bytes), "id,x,y,time\n1,0.500000,-2.000000,09:00:00\n");
    }

    #[test]
    fn quotes_fields_that_need_it() {
        let bytes = encode(&[row("1", "a,b", "say \"hi\"", "line\nbreak")]);
        assert_eq!(
            text(&bytes),
            "id,x,y,time\n1,\"a,b\",\"say \"\"hi\"\"\",\"line\nbreak\"\n"
        );
    }

    #[test]
    fn optional_columns_appear_only_when_used() {
        let mut labelled = row("2", "1.000000", "1.000000", "10:00:00");
        labelled.label = Some("Glove".into());
        let bytes = encode(&[row("1", "0", "0", "09:00:00"), labelled]);
        assert_eq!(
            text(&bytes),
            "id,x,y,time,label\n1,0,0,09:00:00,\n2,1.000000,1.000000,10:00:00,Glove\n"
        );
    }

    #[test]
    fn round_trips_awkward_fields() {
        let mut tricky = row("7", "1,5", "\"quoted\"", "a\nb\r\nc");
        tricky.notes = Some("left, by \"the\" door\n(second line)".into());
        let rows = vec![row("1", "0.000000", "0.000000", "00:00:00"), tricky];
        assert_eq!(decode(text(&encode(&rows))), rows);
    }

    #[test]
    fn decode_maps_by_header_name() {
        let rows = decode("time,id,extra,y,x\n08:15:00,4,zzz,2.5,1.5\n");
        assert_eq!(rows, vec![row("4", "1.5", "2.5", "08:15:00")]);
    }

    #[test]
    fn decode_tolerates_crlf_bom_and_blank_lines() {
        let rows = decode("\u{feff}id,x,y,time\r\n1,2,3,04:05:06\r\n\r\n2,3,4,05:06:07");
        assert_eq!(
            rows,
            vec![row("1", "2", "3", "04:05:06"), row("2", "3", "4", "05:06:07")]
        );
    }

    #[test]
    fn decode_short_lines_leave_fields_empty() {
        let rows = decode("id,x,y,time\n9,1.0\n");
        assert_eq!(rows, vec![row("9", "1.0", "", "")]);
    }

    #[test]
    fn decode_empty_and_header_only() {
        assert!(decode("").is_empty());
        assert!(decode("id,x,y,time\n").is_empty());
    }

    #[test]
    fn decode_accepts_quoted_and_unquoted_mix() {
        let rows = decode("id,x,y,time\n\"3\",1,\"2\",\"\"\n");
        assert_eq!(rows, vec![row("3", "1", "2", "")]);
    }

    #[test]
    fn empty_optional_stays_distinct_from_absent() {
        let mut empty_label = row("1", "0.000000", "0.000000", "09:00:00");
        empty_label.label = Some(String::new());
        let mut named = row("2", "1.000000", "1.000000", "10:00:00");
        named.label = Some("Glove".into());
        let absent = row("3", "2.000000", "2.000000", "11:00:00");
        let rows = vec![empty_label, named, absent];

        let bytes = encode(&rows);
        assert_eq!(
            text(&bytes),
            concat!(
                "id,x,y,time,label\n",
                "1,0.000000,0.000000,09:00:00,\"\"\n",
                "2,1.000000,1.000000,10:00:00,Glove\n",
                "3,2.000000,2.000000,11:00:00,\n",
            )
        );
        assert_eq!(decode(text(&bytes)), rows);
    }

    #[test]
    fn quoted_empty_line_is_not_blank() {
        let rows = decode("id\n\"\"\n\n");
        assert_eq!(rows, vec![row("", "", "", "")]);
    }
}
