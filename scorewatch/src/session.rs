// scorewatch/src/session.rs
//
// One dashboard session: selection state + derivation graph, plus shared
// handles to the dataset source and the annotation store.
//
// Inputs mutate the selection; outputs read through the graph against the
// source's current snapshot. Panels never see the source directly.
//
// Panels (matching the three dashboard tabs):
//   Training    - score_distribution(), metric()
//   Monitoring  - drift(), prod_score_distribution()
//   Annotation  - results(), to_review(), annotate_selected()

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::annotate::{AnnotationOutcome, AnnotationStore};
use crate::error::{DashError, Result};
use crate::graph::{DerivationGraph, DerivedView, GraphStats};
use crate::metrics::{self, Curve, DriftPoint, ScoreDistribution};
use crate::model::{Dataset, DateRange, Label, MetricKind, ScoreField};
use crate::selection::SelectionState;
use crate::source::{DatasetSource, SourceStatus};

/// One row of the annotation table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub row:        usize,
    pub id:         String,
    pub text:       String,
    pub prod_score: f64,
    pub annotation: Option<String>,
}

/// Everything the dashboard renders, in one read.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub accounts:           Vec<String>,
    pub selection:          SelectionState,
    pub dataset_version:    u64,
    pub score_distribution: ScoreDistribution,
    pub metric:             std::result::Result<Curve, String>,
    pub drift:              Vec<DriftPoint>,
    pub prod_distribution:  ScoreDistribution,
    pub results:            Vec<ResultRow>,
    pub to_review:          Option<String>,
    pub source_error:       Option<String>,
    pub graph:              GraphStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session:           u64,
    pub selection:         SelectionState,
    pub graph:             GraphStats,
    pub source:            SourceStatus,
    pub annotation_writes: u64,
}

pub struct Session {
    pub id:    u64,
    source:    Arc<DatasetSource>,
    store:     Arc<AnnotationStore>,
    selection: SelectionState,
    graph:     DerivationGraph,
}

impl Session {
    /// Selects the first known account, mirroring the sidebar default.
    pub fn new(id: u64, store: Arc<AnnotationStore>, seed: Option<u64>) -> Self {
        let source = Arc::clone(store.source());
        let mut s = Self {
            id, source, store,
            selection: SelectionState::default(),
            graph:     DerivationGraph::new(seed),
        };
        s.snapshot();
        s
    }

    /// Start from `selection`. An unset account keeps the first-account
    /// default.
    pub fn with_selection(mut self, selection: SelectionState) -> Self {
        let account = selection.account.clone().or(self.selection.account.take());
        self.selection = SelectionState { account, ..selection };
        self
    }

    pub fn selection(&self) -> &SelectionState { &self.selection }
    pub fn stats(&self) -> GraphStats { self.graph.stats() }

    /// Current snapshot. Fills in the default account once the dataset
    /// names one, so a session opened before the file existed recovers.
    fn snapshot(&mut self) -> Arc<Dataset> {
        let ds = self.source.current();
        if self.selection.account.is_none() {
            self.selection.account = ds.accounts().into_iter().next();
        }
        ds
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session:           self.id,
            selection:         self.selection.clone(),
            graph:             self.graph.stats(),
            source:            self.source.status(),
            annotation_writes: self.store.writes.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    pub fn set_account(&mut self, account: &str) -> Result<()> {
        let known = self.snapshot().accounts();
        self.selection.set_account(account, &known)
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.selection.set_date_range(range);
    }

    pub fn set_sample_size(&mut self, n: usize) -> Result<()> {
        self.selection.set_sample_size(n)
    }

    pub fn set_metric(&mut self, metric: MetricKind) {
        self.selection.set_metric(metric);
    }

    pub fn resample(&mut self) {
        self.graph.resample();
    }

    /// Select the row at `index` of the current results table. The index is
    /// turned into the row's id here and not kept.
    pub fn select_row(&mut self, index: usize) -> Result<String> {
        let ds = self.snapshot();
        match self.graph.resolve_row(&ds, &self.selection, index) {
            Ok(id) => {
                debug!("session {} selected row {} -> id={}", self.id, index, id);
                self.selection.select_id(id.clone());
                Ok(id)
            }
            Err(e) => {
                self.selection.clear_selection();
                Err(e)
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear_selection();
    }

    /// Label the selected row and persist. NoSelection if nothing valid is
    /// selected.
    pub fn annotate_selected(&mut self, label: Label) -> Result<AnnotationOutcome> {
        let record = self.selected()?;
        let out = self.store.annotate(&record.id, label)?;
        info!("session {} annotated id={} as {}", self.id, record.id, label);
        Ok(out)
    }

    // ── Outputs ───────────────────────────────────────────────────────────────

    pub fn selected(&mut self) -> Result<Arc<crate::model::Record>> {
        let ds = self.snapshot();
        self.graph.selected_record(&ds, &self.selection)
    }

    /// Unsampled rows for the account.
    pub fn training(&mut self) -> Arc<DerivedView> {
        let ds = self.snapshot();
        self.graph.training(&ds, &self.selection)
    }

    /// Training-score distribution for the account (training tab).
    pub fn score_distribution(&mut self) -> ScoreDistribution {
        let ds = self.snapshot();
        let view = self.graph.training(&ds, &self.selection);
        metrics::score_distribution(&view.rows, ScoreField::TrainingScore)
    }

    pub fn metric(&mut self) -> Result<Arc<Curve>> {
        let ds = self.snapshot();
        self.graph.metric(&ds, &self.selection)
    }

    /// Production-score distribution over the sampled, filtered rows.
    pub fn prod_score_distribution(&mut self) -> ScoreDistribution {
        let ds = self.snapshot();
        let view = self.graph.filtered(&ds, &self.selection);
        metrics::score_distribution(&view.rows, ScoreField::ProdScore)
    }

    pub fn drift(&mut self) -> Vec<DriftPoint> {
        let ds = self.snapshot();
        let view = self.graph.filtered(&ds, &self.selection);
        metrics::daily_drift(&view.rows)
    }

    pub fn results(&mut self) -> Vec<ResultRow> {
        let ds = self.snapshot();
        let view = self.graph.filtered(&ds, &self.selection);
        view.rows.iter().enumerate()
            .map(|(row, r)| ResultRow {
                row,
                id:         r.id.clone(),
                text:       r.text.clone(),
                prod_score: r.prod_score,
                annotation: r.annotation.clone(),
            })
            .collect()
    }

    /// Text of the selected row, or None when there is nothing to show.
    pub fn to_review(&mut self) -> Result<Option<String>> {
        match self.selected() {
            Ok(r)                       => Ok(Some(r.text.clone())),
            Err(e) if e.is_empty_view() => Ok(None),
            Err(e)                      => Err(e),
        }
    }

    pub fn view(&mut self) -> Result<DashboardView> {
        let ds = self.snapshot();
        Ok(DashboardView {
            accounts:           ds.accounts(),
            selection:          self.selection.clone(),
            dataset_version:    ds.version,
            score_distribution: self.score_distribution(),
            metric:             self.metric()
                .map(|c| (*c).clone())
                .map_err(|e| match e {
                    DashError::UndefinedMetric(why) => why,
                    other                           => other.to_string(),
                }),
            drift:              self.drift(),
            prod_distribution:  self.prod_score_distribution(),
            results:            self.results(),
            to_review:          self.to_review()?,
            source_error:       self.source.last_error(),
            graph:              self.graph.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::persist;
    use crate::model::Record;
    use crate::source::DEFAULT_POLL;

    fn session(dir: &tempfile::TempDir) -> Session {
        let path = dir.path().join("data.csv");
        let mut rows = Vec::new();
        for i in 0..30 {
            let account = ["A", "B", "C"][i % 3];
            rows.push(Record::new(i.to_string(), account, "2023-03-01")
                .with_text(format!("item {}", i))
                .with_scores(if i % 2 == 0 { 0.8 } else { 0.2 }, 0.5)
                .with_truth(i % 2 == 0));
        }
        persist(&path, &Dataset::new(rows)).unwrap();
        let src = DatasetSource::open(&path, DEFAULT_POLL);
        Session::new(1, Arc::new(AnnotationStore::new(src)), Some(17))
    }

    #[test]
    fn defaults_to_first_account() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        assert_eq!(s.selection().account.as_deref(), Some("A"));
    }

    #[test]
    fn unknown_account_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir);
        assert!(matches!(s.set_account("Q"), Err(DashError::UnknownAccount(_))));
    }

    #[test]
    fn results_table_is_densely_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir);
        s.set_sample_size(90).unwrap();
        let rows = s.results();
        assert!(!rows.is_empty());
        for (i, r) in rows.iter().enumerate() { assert_eq!(r.row, i); }
    }

    #[test]
    fn to_review_is_empty_without_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir);
        assert_eq!(s.to_review().unwrap(), None);
        assert!(matches!(s.annotate_selected(Label::Electronics), Err(DashError::NoSelection)));
    }

    #[test]
    fn bad_index_clears_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir);
        s.select_row(0).unwrap();
        assert!(s.select_row(10_000).is_err());
        assert_eq!(s.selection().selected_id, None);
    }

    #[test]
    fn annotate_selected_persists_and_keeps_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir);
        let id = s.select_row(0).unwrap();
        let text = s.to_review().unwrap().unwrap();
        assert!(text.starts_with("item "));

        let out = s.annotate_selected(Label::NotElectronics).unwrap();
        assert!(out.applied);

        // The reload produces a new snapshot and a new draw; the label is on
        // disk regardless of whether the row is still in the sample.
        let ds = s.source.current();
        assert_eq!(ds.get(&id).unwrap().annotation.as_deref(), Some("not_electronics"));
        assert_eq!(ds.records.iter().filter(|r| r.annotation.is_some()).count(), 1);
    }

    #[test]
    fn default_account_fills_in_once_the_file_appears() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.csv");
        let src  = DatasetSource::open(&path, DEFAULT_POLL);
        let mut s = Session::new(1, Arc::new(AnnotationStore::new(Arc::clone(&src))), Some(3));
        assert_eq!(s.selection().account, None);

        let rows = vec![
            Record::new("1", "Q", "2023-02-01").with_scores(0.9, 0.5).with_truth(true),
            Record::new("2", "Q", "2023-02-01").with_scores(0.1, 0.5),
        ];
        persist(&path, &Dataset::new(rows)).unwrap();
        src.refresh();

        let v = s.view().unwrap();
        assert_eq!(v.selection.account.as_deref(), Some("Q"));
        assert_eq!(v.score_distribution.n, 2);
    }

    #[test]
    fn with_selection_keeps_default_account() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = SelectionState { sample_size: 7, ..Default::default() };
        let s = session(&dir).with_selection(defaults);
        assert_eq!(s.selection().account.as_deref(), Some("A"));
        assert_eq!(s.selection().sample_size, 7);
    }

    #[test]
    fn view_collects_every_panel() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir);
        s.set_metric(MetricKind::PrecisionRecall);
        let v = s.view().unwrap();
        assert_eq!(v.accounts, vec!["A", "B", "C"]);
        assert_eq!(v.metric.as_ref().unwrap().kind, MetricKind::PrecisionRecall);
        assert_eq!(v.score_distribution.n, 10);
        assert!(!v.drift.is_empty());
        assert_eq!(v.to_review, None);
    }
}
