// scorewatch/src/metrics.rs
//
// Stateless metric computations over a derived subset.
//
//   roc_curve              - (FPR, TPR) sweep + trapezoidal AUC
//   precision_recall_curve - (recall, precision) sweep + average precision
//   score_distribution     - 0.05-wide histogram + Gaussian KDE for plotting
//   confusion_at           - tp/fp/tn/fn at one threshold
//   daily_drift            - per-day prod_score aggregate (monitoring tab)
//
// Every function is deterministic for the same records and fields and never
// mutates its input. A curve that needs both classes and does not have them
// fails with UndefinedMetric instead of producing NaN from 0/0.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{DashError, Result};
use crate::model::{MetricKind, Record, ScoreField, TruthField};

pub const HIST_BINS:  usize = 20;
pub const HIST_WIDTH: f64   = 0.05;
pub const KDE_POINTS: usize = 64;

// ── Confusion counts ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confusion {
    pub tp:  u64,
    pub fp:  u64,
    pub tn:  u64,
    pub fn_: u64,
}

impl Confusion {
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 { 1.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 { 0.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn fpr(&self) -> f64 {
        let denom = self.fp + self.tn;
        if denom == 0 { 0.0 } else { self.fp as f64 / denom as f64 }
    }
}

/// Predict positive when score >= threshold. Rows with no truth are ignored.
pub fn confusion_at(records: &[Record], truth: TruthField, score: ScoreField, threshold: f64) -> Confusion {
    let mut c = Confusion::default();
    for r in records {
        let Some(actual) = truth.of(r) else { continue };
        match (score.of(r) >= threshold, actual) {
            (true,  true)  => c.tp  += 1,
            (true,  false) => c.fp  += 1,
            (false, true)  => c.fn_ += 1,
            (false, false) => c.tn  += 1,
        }
    }
    c
}

// ── Curves ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvePoint {
    pub x:         f64,
    pub y:         f64,
    /// Score at which this point is reached; None for the synthetic endpoint.
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Curve {
    pub kind:       MetricKind,
    pub points:     Vec<CurvePoint>,
    /// AUC for ROC, average precision for PR.
    pub area:       f64,
    pub n_positive: usize,
    pub n_negative: usize,
}

/// (score, truth) pairs sorted by descending score; ties keep input order.
fn ranked(records: &[Record], truth: TruthField, score: ScoreField) -> Vec<(f64, bool)> {
    let mut pairs: Vec<(f64, bool)> = records.iter()
        .filter_map(|r| truth.of(r).map(|t| (score.of(r), t)))
        .collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    pairs
}

/// Cumulative (threshold, tp, fp) at each distinct score, descending.
fn sweep(pairs: &[(f64, bool)]) -> Vec<(f64, u64, u64)> {
    let mut out = Vec::new();
    let (mut tp, mut fp) = (0u64, 0u64);
    for (i, &(s, t)) in pairs.iter().enumerate() {
        if t { tp += 1 } else { fp += 1 }
        let last_of_tie = pairs.get(i + 1).map(|n| n.0 != s).unwrap_or(true);
        if last_of_tie {
            out.push((s, tp, fp));
        }
    }
    out
}

fn trapezoid(points: &[CurvePoint]) -> f64 {
    points.windows(2)
        .map(|w| (w[1].x - w[0].x) * (w[1].y + w[0].y) / 2.0)
        .sum()
}

pub fn roc_curve(records: &[Record], truth: TruthField, score: ScoreField) -> Result<Curve> {
    let pairs = ranked(records, truth, score);
    let n_pos = pairs.iter().filter(|p| p.1).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(DashError::UndefinedMetric(format!(
            "ROC needs both classes (positive={}, negative={})", n_pos, n_neg)));
    }

    let mut points = vec![CurvePoint { x: 0.0, y: 0.0, threshold: None }];
    for (s, tp, fp) in sweep(&pairs) {
        points.push(CurvePoint {
            x:         fp as f64 / n_neg as f64,
            y:         tp as f64 / n_pos as f64,
            threshold: Some(s),
        });
    }
    // Curve must end at (1,1).
    if points.last().map(|p| p.x < 1.0 || p.y < 1.0).unwrap_or(true) {
        points.push(CurvePoint { x: 1.0, y: 1.0, threshold: None });
    }

    let area = trapezoid(&points);
    Ok(Curve { kind: MetricKind::Roc, points, area, n_positive: n_pos, n_negative: n_neg })
}

/// Points are (recall, precision), starting at the (0, 1) convention point
/// and stopping once full recall is first reached.
pub fn precision_recall_curve(records: &[Record], truth: TruthField, score: ScoreField) -> Result<Curve> {
    let pairs = ranked(records, truth, score);
    let n_pos = pairs.iter().filter(|p| p.1).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 {
        return Err(DashError::UndefinedMetric(format!(
            "precision-recall needs positive rows (rows={})", pairs.len())));
    }

    let mut points = vec![CurvePoint { x: 0.0, y: 1.0, threshold: None }];
    let mut ap     = 0.0;
    let mut prev_r = 0.0;
    for (s, tp, fp) in sweep(&pairs) {
        let recall    = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap    += (recall - prev_r) * precision;
        prev_r = recall;
        points.push(CurvePoint { x: recall, y: precision, threshold: Some(s) });
        if tp as usize == n_pos { break; }
    }

    Ok(Curve {
        kind: MetricKind::PrecisionRecall,
        points,
        area: ap,
        n_positive: n_pos,
        n_negative: n_neg,
    })
}

pub fn metric_curve(kind: MetricKind, records: &[Record], truth: TruthField, score: ScoreField) -> Result<Curve> {
    match kind {
        MetricKind::Roc             => roc_curve(records, truth, score),
        MetricKind::PrecisionRecall => precision_recall_curve(records, truth, score),
    }
}

// ── Score distribution ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreDistribution {
    pub field:     ScoreField,
    pub n:         usize,
    pub mean:      f64,
    pub std_dev:   f64,
    pub min:       f64,
    pub max:       f64,
    pub median:    f64,
    /// (bin lower edge, count); scores outside [0,1] land in the edge bins.
    pub histogram: Vec<(f64, usize)>,
    /// (x, density) on an evenly spaced grid.
    pub density:   Vec<(f64, f64)>,
    pub bandwidth: f64,
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() { return 0.0; }
    let pos  = q * (sorted.len() - 1) as f64;
    let lo   = pos.floor() as usize;
    let hi   = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn score_distribution(records: &[Record], field: ScoreField) -> ScoreDistribution {
    let mut values: Vec<f64> = records.iter().map(|r| field.of(r)).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut bins = vec![0usize; HIST_BINS];
    for &v in &values {
        let bin = ((v / HIST_WIDTH).max(0.0) as usize).min(HIST_BINS - 1);
        bins[bin] += 1;
    }
    let histogram = bins.iter().enumerate()
        .map(|(i, &c)| (i as f64 * HIST_WIDTH, c))
        .collect();

    let n = values.len();
    if n == 0 {
        return ScoreDistribution {
            field, n, mean: 0.0, std_dev: 0.0, min: 0.0, max: 0.0, median: 0.0,
            histogram, density: Vec::new(), bandwidth: 0.0,
        };
    }

    let mean     = values.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else { 0.0 };
    let std_dev  = variance.sqrt();
    let min      = values[0];
    let max      = values[n - 1];
    let iqr      = quantile(&values, 0.75) - quantile(&values, 0.25);

    // Silverman's rule of thumb; degenerate spread falls back to one bin width.
    let spread    = if iqr > 0.0 { std_dev.min(iqr / 1.34) } else { std_dev };
    let mut bandwidth = 0.9 * spread * (n as f64).powf(-0.2);
    if bandwidth.is_nan() || bandwidth <= 0.0 { bandwidth = HIST_WIDTH; }

    let lo   = min - 3.0 * bandwidth;
    let hi   = max + 3.0 * bandwidth;
    let step = (hi - lo) / (KDE_POINTS - 1) as f64;
    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    let density = (0..KDE_POINTS)
        .map(|i| {
            let x = lo + step * i as f64;
            let d = values.iter()
                .map(|v| (-0.5 * ((x - v) / bandwidth).powi(2)).exp())
                .sum::<f64>() * norm;
            (x, d)
        })
        .collect();

    ScoreDistribution {
        field, n, mean, std_dev, min, max,
        median: quantile(&values, 0.5),
        histogram, density, bandwidth,
    }
}

// ── Production drift ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftPoint {
    pub date:       NaiveDate,
    pub count:      usize,
    pub mean_score: f64,
    pub min_score:  f64,
    pub max_score:  f64,
}

/// Per-day aggregate of prod_score, ascending by date. Undated rows are
/// left out.
pub fn daily_drift(records: &[Record]) -> Vec<DriftPoint> {
    let mut days: BTreeMap<NaiveDate, (usize, f64, f64, f64)> = BTreeMap::new();
    for r in records {
        let Some(dt) = r.date else { continue };
        let e = days.entry(dt.date())
            .or_insert((0, 0.0, f64::INFINITY, f64::NEG_INFINITY));
        e.0 += 1;
        e.1 += r.prod_score;
        e.2  = e.2.min(r.prod_score);
        e.3  = e.3.max(r.prod_score);
    }
    days.into_iter()
        .map(|(date, (count, sum, min, max))| DriftPoint {
            date,
            count,
            mean_score: sum / count as f64,
            min_score:  min,
            max_score:  max,
        })
        .collect()
}
