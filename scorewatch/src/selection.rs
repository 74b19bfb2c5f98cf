// scorewatch/src/selection.rs
//
// Per-session user choices. Setters validate; the graph reads fields.
//
// The selected row is held by stable id, never by position: a position is
// resolved against the filtered view once, at selection time, and the id is
// what survives account/date changes.

use serde::Serialize;

use crate::error::{DashError, Result};
use crate::model::{DateRange, MetricKind};

pub const DEFAULT_SAMPLE: usize = 10_000;
/// Upper bound on draws per session; each draw clones a row.
pub const MAX_SAMPLE:     usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    /// None until the dataset names an account.
    pub account:     Option<String>,
    pub date_range:  DateRange,
    pub sample_size: usize,
    pub metric:      MetricKind,
    pub selected_id: Option<String>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            account:     None,
            date_range:  DateRange::default(),
            sample_size: DEFAULT_SAMPLE,
            metric:      MetricKind::Roc,
            selected_id: None,
        }
    }
}

impl SelectionState {
    /// `known` is the current snapshot's account list.
    pub fn set_account(&mut self, account: &str, known: &[String]) -> Result<()> {
        if !known.iter().any(|a| a == account) {
            return Err(DashError::UnknownAccount(account.to_string()));
        }
        self.account = Some(account.to_string());
        Ok(())
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.date_range = range;
    }

    pub fn set_sample_size(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(DashError::InvalidSelection("sample size must be positive".into()));
        }
        if n > MAX_SAMPLE {
            return Err(DashError::InvalidSelection(format!(
                "sample size {} exceeds the maximum of {}", n, MAX_SAMPLE)));
        }
        self.sample_size = n;
        Ok(())
    }

    pub fn set_metric(&mut self, metric: MetricKind) {
        self.metric = metric;
    }

    pub fn select_id(&mut self, id: String) {
        self.selected_id = Some(id);
    }

    pub fn clear_selection(&mut self) {
        self.selected_id = None;
    }
}
