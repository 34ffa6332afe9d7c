//! Case metadata records and display defaults.

use std::hash::Hasher;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::evidence::EvidenceRecord;

/// Workflow state of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseStatus {
    /// Newly opened; the state of any case without stored metadata.
    #[default]
    Open,
    /// Under active investigation.
    InProgress,
    /// Investigation finished.
    Closed,
    /// Retained read-only.
    Archived,
}

impl CaseStatus {
    /// All statuses in workflow order.
    pub const ALL: [Self; 4] = [Self::Open, Self::InProgress, Self::Closed, Self::Archived];

    /// Stored name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in-progress",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The free-form JSON record stored next to each case.
///
/// Unknown keys are dropped on read; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaseMetadata {
    /// Display title; new records use the case id.
    pub title: String,
    /// Free-text summary.
    pub description: String,
    /// Workflow state.
    pub status: CaseStatus,
    /// Investigator who opened the case.
    pub created_by: String,
    /// First time the record was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last time the record was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Free-form labels.
    pub tags: Vec<String>,
    /// Earliest evidence time of day seen so far, `HH:MM:SS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_evidence_time: Option<String>,
    /// Latest evidence time of day seen so far, `HH:MM:SS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evidence_time: Option<String>,
}

impl CaseMetadata {
    /// A new record for `case_id`, titled with the id and filled with its
    /// [`DisplayDefaults`], status included.
    #[must_use]
    pub fn for_case(case_id: &str) -> Self {
        let defaults = DisplayDefaults::for_case(case_id);
        let mut metadata = Self {
            title: case_id.to_string(),
            status: defaults.status,
            ..Self::default()
        };
        defaults.apply(&mut metadata);
        metadata
    }

    /// Widen the stored evidence time range to include `span`.
    ///
    /// Stored bounds that do not parse are replaced.
    pub fn merge_time_span(&mut self, span: EvidenceTimeSpan) {
        let stored_first = self.first_evidence_time.as_deref().and_then(parse_hms);
        let stored_last = self.last_evidence_time.as_deref().and_then(parse_hms);

        let first = stored_first.map_or(span.earliest, |t| t.min(span.earliest));
        let last = stored_last.map_or(span.latest, |t| t.max(span.latest));

        self.first_evidence_time = Some(format_hms(first));
        self.last_evidence_time = Some(format_hms(last));
    }

    /// Stamp `updated_at`, and `created_at` if it was never set.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at = Some(now);
    }
}

/// Earliest and latest time of day across a set of evidence rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceTimeSpan {
    /// Earliest time of day.
    pub earliest: NaiveTime,
    /// Latest time of day.
    pub latest: NaiveTime,
}

impl EvidenceTimeSpan {
    /// Span of all rows whose `time` parses as `HH:MM:SS`. `None` when
    /// no row does.
    #[must_use]
    pub fn from_records(records: &[EvidenceRecord]) -> Option<Self> {
        records
            .iter()
            .filter_map(|r| parse_hms(&r.time))
            .fold(None, |span, t| {
                Some(match span {
                    None => Self {
                        earliest: t,
                        latest: t,
                    },
                    Some(Self { earliest, latest }) => Self {
                        earliest: earliest.min(t),
                        latest: latest.max(t),
                    },
                })
            })
    }
}

fn parse_hms(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M:%S").ok()
}

fn format_hms(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

const SEED_KEYS: (u64, u64) = (0x6361_7365_6d61_7030, 0x6469_7370_6c61_7931);

const CREATORS: [&str; 6] = [
    "J. Alvarez",
    "M. Chen",
    "R. Okafor",
    "S. Lindqvist",
    "T. Nakamura",
    "A. Haddad",
];

const TAGS: [&str; 8] = [
    "indoor",
    "outdoor",
    "forensics",
    "priority",
    "burglary",
    "assault",
    "vehicle",
    "follow-up",
];

/// Presentation-only placeholders for cases whose metadata is missing.
///
/// Derived from a SipHash-1-3 of the case id with fixed keys, so the same
/// id always shows the same values across processes and releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayDefaults {
    /// Placeholder investigator name.
    pub created_by: String,
    /// Placeholder status for records created from these defaults.
    pub status: CaseStatus,
    /// One to three distinct placeholder tags.
    pub tags: Vec<String>,
}

impl DisplayDefaults {
    /// Defaults derived from `case_id`.
    #[must_use]
    pub fn for_case(case_id: &str) -> Self {
        let mut hasher = SipHasher13::new_with_keys(SEED_KEYS.0, SEED_KEYS.1);
        hasher.write(case_id.as_bytes());
        let seed = hasher.finish();

        let created_by = CREATORS[pick(seed, 0, CREATORS.len())].to_string();
        let status = CaseStatus::ALL[pick(seed, 8, CaseStatus::ALL.len())];

        // One to three distinct tags.
        let count = 1 + pick(seed, 16, 3);
        let start = pick(seed, 24, TAGS.len());
        let tags = (0..count)
            .map(|i| TAGS[(start + i) % TAGS.len()].to_string())
            .collect();

        Self {
            created_by,
            status,
            tags,
        }
    }

    /// Fill empty fields of `metadata` with these defaults.
    ///
    /// Status always holds a value, so it is left alone here; records
    /// built by [`CaseMetadata::for_case`] take [`Self::status`].
    pub fn apply(&self, metadata: &mut CaseMetadata) {
        if metadata.created_by.is_empty() {
            metadata.created_by.clone_from(&self.created_by);
        }
        if metadata.tags.is_empty() {
            metadata.tags.clone_from(&self.tags);
        }
    }
}

/// Index in `0..len` from the byte of `seed` starting at bit `shift`.
fn pick(seed: u64, shift: u32, len: usize) -> usize {
    usize::from((seed >> shift) as u8) % len
}
