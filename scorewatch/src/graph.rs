// scorewatch/src/graph.rs
//
// Derivation graph: the cached views behind every dashboard panel.
//
//   snapshot ──┬─► sampled(date_range, sample_size, epoch) ─► filtered(account) ─► selected(id)
//              └─► training(account) ─► metric(metric_kind)
//
// Each node remembers the key it was last computed for and the value. A read
// builds the node's current key from its inputs (including the generation of
// every upstream node) and recomputes only on mismatch. Nothing is pushed:
// changing an input leaves stale values in place until the next read, and a
// changed upstream generation is what invalidates everything downstream.
//
// Snapshots are compared by Arc identity, so two datasets with the same
// version number built outside a DatasetSource never share a cache entry.
//
// The graph is owned by one session and driven from one task; no locking.

use std::fmt::Debug;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::error::{DashError, Result};
use crate::metrics::{self, Curve};
use crate::model::{Dataset, DateRange, MetricKind, Record, ScoreField, TruthField};
use crate::selection::SelectionState;

// ── Views ─────────────────────────────────────────────────────────────────────

/// Output of a row-producing node: the rows plus the inputs they came from.
/// Row position in `rows` is the dense 0-based index the table UI shows.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedView {
    pub rows:            Vec<Record>,
    pub dataset_version: u64,
    pub selection:       SelectionState,
}

impl DerivedView {
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

// ── Node ──────────────────────────────────────────────────────────────────────

struct Node<K, V> {
    name:       &'static str,
    entry:      Option<(K, V)>,
    generation: u64,
    recomputes: u64,
}

impl<K: PartialEq + Debug, V: Clone> Node<K, V> {
    fn new(name: &'static str) -> Self {
        Self { name, entry: None, generation: 0, recomputes: 0 }
    }

    /// Cached value for `key`, computing it first if the key moved.
    fn get(&mut self, key: K, compute: impl FnOnce() -> V) -> (V, u64) {
        if let Some((cached, value)) = &self.entry {
            if *cached == key {
                return (value.clone(), self.generation);
            }
        }
        debug!("recomputing {} for {:?}", self.name, key);
        let value = compute();
        self.entry       = Some((key, value.clone()));
        self.generation += 1;
        self.recomputes += 1;
        (value, self.generation)
    }
}

/// Snapshot identity for cache keys.
#[derive(Clone)]
struct SnapshotKey(Arc<Dataset>);

impl PartialEq for SnapshotKey {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl Debug for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0.version)
    }
}

#[derive(Debug, PartialEq)]
struct SampledKey {
    snapshot:    SnapshotKey,
    date_range:  DateRange,
    sample_size: usize,
    epoch:       u64,
}

// ── Graph ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub sampled:  u64,
    pub filtered: u64,
    pub selected: u64,
    pub training: u64,
    pub metric:   u64,
}

pub struct DerivationGraph {
    seed:     Option<u64>,
    epoch:    u64,
    sampled:  Node<SampledKey, Arc<DerivedView>>,
    filtered: Node<(u64, Option<String>), Arc<DerivedView>>,
    selected: Node<(u64, Option<String>), Option<Arc<Record>>>,
    training: Node<(SnapshotKey, Option<String>), Arc<DerivedView>>,
    metric:   Node<(u64, MetricKind), std::result::Result<Arc<Curve>, String>>,
}

impl DerivationGraph {
    /// With a seed, sampling is reproducible for identical inputs.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            epoch:    0,
            sampled:  Node::new("sampled"),
            filtered: Node::new("filtered"),
            selected: Node::new("selected"),
            training: Node::new("training"),
            metric:   Node::new("metric"),
        }
    }

    /// Force a fresh draw on the next `sampled` read.
    pub fn resample(&mut self) {
        self.epoch += 1;
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            sampled:  self.sampled.recomputes,
            filtered: self.filtered.recomputes,
            selected: self.selected.recomputes,
            training: self.training.recomputes,
            metric:   self.metric.recomputes,
        }
    }

    fn sampled_gen(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> (Arc<DerivedView>, u64) {
        let key = SampledKey {
            snapshot:    SnapshotKey(Arc::clone(ds)),
            date_range:  sel.date_range,
            sample_size: sel.sample_size,
            epoch:       self.epoch,
        };
        let (seed, epoch) = (self.seed, self.epoch);
        self.sampled.get(key, || {
            let mut rng = draw_rng(seed, epoch);
            let pool: Vec<&Record> = ds.records.iter()
                .filter(|r| sel.date_range.contains(r.date))
                .collect();
            let rows = if pool.is_empty() {
                Vec::new()
            } else {
                (0..sel.sample_size)
                    .map(|_| pool[rng.gen_range(0..pool.len())].clone())
                    .collect()
            };
            Arc::new(DerivedView { rows, dataset_version: ds.version, selection: sel.clone() })
        })
    }

    /// Rows in the date range drawn `sample_size` times with replacement.
    /// Account is deliberately not applied here, so switching account
    /// re-filters the same draw instead of resampling.
    pub fn sampled(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> Arc<DerivedView> {
        self.sampled_gen(ds, sel).0
    }

    fn filtered_gen(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> (Arc<DerivedView>, u64) {
        let (sampled, sampled_gen) = self.sampled_gen(ds, sel);
        let key = (sampled_gen, sel.account.clone());
        self.filtered.get(key, || {
            let rows = match &sel.account {
                Some(account) => sampled.rows.iter()
                    .filter(|r| &r.account == account)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            Arc::new(DerivedView { rows, dataset_version: sampled.dataset_version, selection: sel.clone() })
        })
    }

    /// The sampled rows for the selected account, densely re-indexed.
    pub fn filtered(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> Arc<DerivedView> {
        self.filtered_gen(ds, sel).0
    }

    /// Id of the row at `index` in the current filtered view.
    pub fn resolve_row(&mut self, ds: &Arc<Dataset>, sel: &SelectionState, index: usize) -> Result<String> {
        let view = self.filtered(ds, sel);
        view.rows.get(index)
            .map(|r| r.id.clone())
            .ok_or(DashError::NoSelection)
    }

    /// The selected row, looked up by id in the current filtered view.
    /// NoSelection when nothing is selected or the row is no longer in view.
    pub fn selected_record(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> Result<Arc<Record>> {
        let (filtered, filtered_gen) = self.filtered_gen(ds, sel);
        let key = (filtered_gen, sel.selected_id.clone());
        let (found, _) = self.selected.get(key, || {
            let id = sel.selected_id.as_deref()?;
            filtered.rows.iter().find(|r| r.id == id).cloned().map(Arc::new)
        });
        found.ok_or(DashError::NoSelection)
    }

    fn training_gen(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> (Arc<DerivedView>, u64) {
        let key = (SnapshotKey(Arc::clone(ds)), sel.account.clone());
        self.training.get(key, || {
            let rows = match &sel.account {
                Some(account) => ds.records.iter()
                    .filter(|r| &r.account == account)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            Arc::new(DerivedView { rows, dataset_version: ds.version, selection: sel.clone() })
        })
    }

    /// Full, unsampled snapshot rows for the selected account.
    pub fn training(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> Arc<DerivedView> {
        self.training_gen(ds, sel).0
    }

    /// Training-time curve for the selected metric: is_electronics against
    /// training_score over the `training` view.
    pub fn metric(&mut self, ds: &Arc<Dataset>, sel: &SelectionState) -> Result<Arc<Curve>> {
        let (training, training_gen) = self.training_gen(ds, sel);
        let key = (training_gen, sel.metric);
        let (outcome, _) = self.metric.get(key, || {
            metrics::metric_curve(sel.metric, &training.rows, TruthField::IsElectronics, ScoreField::TrainingScore)
                .map(Arc::new)
                .map_err(|e| match e {
                    DashError::UndefinedMetric(why) => why,
                    other                           => other.to_string(),
                })
        });
        outcome.map_err(DashError::UndefinedMetric)
    }
}

fn draw_rng(seed: Option<u64>, epoch: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))),
        None       => StdRng::from_entropy(),
    }
}
