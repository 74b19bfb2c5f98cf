// scorewatch/src/model.rs
//
// Shared domain types: one prediction row, the immutable dataset snapshot,
// and the small enums the dashboard selects between.
//
// A Dataset is never mutated after load. Annotation produces a new Dataset
// and the backing file is rewritten from it wholesale.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Column names ──────────────────────────────────────────────────────────────

pub const COL_ID:             &str = "id";
pub const COL_ACCOUNT:        &str = "account";
pub const COL_DATE:           &str = "date";
pub const COL_TEXT:           &str = "text";
pub const COL_TRAINING_SCORE: &str = "training_score";
pub const COL_PROD_SCORE:     &str = "prod_score";
pub const COL_IS_ELECTRONICS: &str = "is_electronics";
pub const COL_ANNOTATION:     &str = "annotation";

pub const KNOWN_COLUMNS: [&str; 8] = [
    COL_ID, COL_ACCOUNT, COL_DATE, COL_TEXT,
    COL_TRAINING_SCORE, COL_PROD_SCORE, COL_IS_ELECTRONICS, COL_ANNOTATION,
];

// ── Record ────────────────────────────────────────────────────────────────────

/// One prediction row. `id` is stable across reload and rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id:             String,
    pub account:        String,
    pub date:           Option<NaiveDateTime>, // None when the cell did not parse
    #[serde(skip)]
    pub date_raw:       String,                // written back verbatim
    pub text:           String,
    pub training_score: f64,
    pub prod_score:     f64,
    pub is_electronics: bool,
    pub annotation:     Option<String>,
    #[serde(skip)]
    pub extra:          Vec<String>,           // unknown columns, header order
}

impl Record {
    /// Minimal constructor used by tests and the simulator.
    pub fn new(id: impl Into<String>, account: impl Into<String>, date: &str) -> Self {
        Self {
            id:             id.into(),
            account:        account.into(),
            date:           parse_date(date),
            date_raw:       date.to_string(),
            text:           String::new(),
            training_score: 0.0,
            prod_score:     0.0,
            is_electronics: false,
            annotation:     None,
            extra:          Vec::new(),
        }
    }

    pub fn with_scores(mut self, training: f64, prod: f64) -> Self {
        self.training_score = training;
        self.prod_score     = prod;
        self
    }

    pub fn with_truth(mut self, is_electronics: bool) -> Self {
        self.is_electronics = is_electronics;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

// ── Dataset ───────────────────────────────────────────────────────────────────

/// An immutable snapshot of the backing table as of one load.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Monotonic per DatasetSource; 0 for datasets built outside a source.
    pub version:   u64,
    /// Full header in file order, known and extra columns interleaved.
    pub columns:   Vec<String>,
    pub records:   Vec<Record>,
    /// Truncated sha256 of the file bytes this snapshot was parsed from.
    pub digest:    String,
    pub loaded_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            version:   0,
            columns:   KNOWN_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
            digest:    String::new(),
            loaded_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize { self.records.len() }
    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Distinct accounts in first-appearance order.
    pub fn accounts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records.iter()
            .filter(|r| seen.insert(r.account.as_str()))
            .map(|r| r.account.clone())
            .collect()
    }
}

/// Content equality: same header and same rows. Version, digest and load
/// time are provenance, not content.
impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.records == other.records
    }
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Parse the date formats the backing file is known to contain.
/// Anything else yields None; a bad date never fails a load.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() { return None; }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc())
}

/// Inclusive calendar range picked in the sidebar.
///
/// Matching follows the monitoring tab exactly: a row is inside when its
/// timestamp is strictly after `start` at midnight and at or before `end`
/// at midnight. Rows with no date are never inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end:   NaiveDate,
}

impl DateRange {
    /// Fails unless start <= end.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, date: Option<NaiveDateTime>) -> bool {
        let Some(dt) = date else { return false };
        let lo = self.start.and_time(chrono::NaiveTime::MIN);
        let hi = self.end.and_time(chrono::NaiveTime::MIN);
        dt > lo && dt <= hi
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            end:   NaiveDate::from_ymd_opt(2023, 4, 1).unwrap_or_default(),
        }
    }
}

// ── Enumerations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[value(name = "roc")]
    Roc,
    #[value(name = "pr")]
    PrecisionRecall,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Roc             => write!(f, "ROC Curve"),
            Self::PrecisionRecall => write!(f, "Precision-Recall"),
        }
    }
}

/// Reviewer label written into the `annotation` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Electronics,
    NotElectronics,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Electronics    => "electronics",
            Self::NotElectronics => "not_electronics",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "electronics"     => Some(Self::Electronics),
            "not_electronics" => Some(Self::NotElectronics),
            _                 => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column holding the ground truth a curve is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthField {
    IsElectronics,
    /// Reviewer labels; rows without an annotation are skipped.
    Annotation,
}

impl TruthField {
    pub fn of(&self, r: &Record) -> Option<bool> {
        match self {
            Self::IsElectronics => Some(r.is_electronics),
            Self::Annotation    => r.annotation.as_deref()
                .and_then(Label::parse)
                .map(|l| l == Label::Electronics),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    TrainingScore,
    ProdScore,
}

impl ScoreField {
    pub fn of(&self, r: &Record) -> f64 {
        match self {
            Self::TrainingScore => r.training_score,
            Self::ProdScore     => r.prod_score,
        }
    }
}

impl fmt::Display for ScoreField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrainingScore => f.write_str(COL_TRAINING_SCORE),
            Self::ProdScore     => f.write_str(COL_PROD_SCORE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_known_date_shapes() {
        assert!(parse_date("2023-02-01").is_some());
        assert!(parse_date("2023-02-01 13:45:00").is_some());
        assert!(parse_date("2023-02-01T13:45:00.250").is_some());
        assert!(parse_date("2023-02-01T13:45:00+02:00").is_some());
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("").is_none());
        assert!(parse_date("2023-13-45").is_none());
    }

    #[test]
    fn date_range_is_open_at_start_closed_at_end() {
        let r = DateRange::new(ymd(2023, 1, 1), ymd(2023, 4, 1)).unwrap();
        assert!(!r.contains(parse_date("2023-01-01")));
        assert!(r.contains(parse_date("2023-01-01 00:00:01")));
        assert!(r.contains(parse_date("2023-04-01")));
        assert!(!r.contains(parse_date("2023-04-01 00:00:01")));
        assert!(!r.contains(None));
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        assert!(DateRange::new(ymd(2023, 4, 1), ymd(2023, 1, 1)).is_none());
        assert!(DateRange::new(ymd(2023, 4, 1), ymd(2023, 4, 1)).is_some());
    }

    #[test]
    fn accounts_in_first_seen_order() {
        let ds = Dataset::new(vec![
            Record::new("1", "Berge", "2023-01-02"),
            Record::new("2", "Abernathy", "2023-01-02"),
            Record::new("3", "Berge", "2023-01-02"),
        ]);
        assert_eq!(ds.accounts(), vec!["Berge".to_string(), "Abernathy".to_string()]);
    }

    #[test]
    fn annotation_truth_skips_unlabeled_rows() {
        let mut r = Record::new("1", "A", "2023-01-02");
        assert_eq!(TruthField::Annotation.of(&r), None);
        r.annotation = Some("electronics".into());
        assert_eq!(TruthField::Annotation.of(&r), Some(true));
        r.annotation = Some("not_electronics".into());
        assert_eq!(TruthField::Annotation.of(&r), Some(false));
    }

    #[test]
    fn dataset_equality_ignores_provenance() {
        let a = Dataset::new(vec![Record::new("1", "A", "2023-01-02")]);
        let mut b = a.clone();
        b.version = 9;
        b.digest  = "abc".into();
        assert_eq!(a, b);
    }
}
