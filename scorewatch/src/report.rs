// scorewatch/src/report.rs
//
// Headless rendering of the training dashboard for one account: markdown
// for terminals, JSON for downstream tooling.

use serde::Serialize;

use crate::error::Result;
use crate::metrics::{self, Confusion, Curve, ScoreDistribution};
use crate::model::{ScoreField, TruthField};
use crate::session::Session;

pub const REPORT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub account:         String,
    pub dataset_version: u64,
    pub n_rows:          usize,
    pub threshold:       f64,
    pub confusion:       Confusion,
    pub curve:           std::result::Result<Curve, String>,
    pub distribution:    ScoreDistribution,
}

impl TrainingReport {
    pub fn build(session: &mut Session) -> Result<Self> {
        let account = session.selection().account.clone().unwrap_or_default();
        let curve = match session.metric() {
            Ok(c)                       => Ok((*c).clone()),
            Err(e) if e.is_empty_view() => Err(e.to_string()),
            Err(e)                      => return Err(e),
        };
        let view = session.training();
        Ok(Self {
            account,
            dataset_version: view.dataset_version,
            n_rows:          view.len(),
            threshold:       REPORT_THRESHOLD,
            confusion:       metrics::confusion_at(&view.rows, TruthField::IsElectronics, ScoreField::TrainingScore, REPORT_THRESHOLD),
            curve,
            distribution:    session.score_distribution(),
        })
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let c = &self.confusion;

        out.push_str(&format!("# Training Report: {}\n\n", self.account));
        out.push_str(&format!("**Rows**: {}  **Snapshot**: v{}  **Threshold**: {:.2}\n\n",
            self.n_rows, self.dataset_version, self.threshold));

        out.push_str("| Metric    | Value  |\n");
        out.push_str("|-----------|--------|\n");
        out.push_str(&format!("| Precision | {:.4} |\n", c.precision()));
        out.push_str(&format!("| Recall    | {:.4} |\n", c.recall()));
        out.push_str(&format!("| F1        | {:.4} |\n", c.f1()));
        out.push_str(&format!("| FPR       | {:.4} |\n", c.fpr()));
        match &self.curve {
            Ok(curve) => {
                let name = match curve.kind {
                    crate::model::MetricKind::Roc             => "AUC-ROC",
                    crate::model::MetricKind::PrecisionRecall => "Avg prec",
                };
                out.push_str(&format!("| {:9} | {:.4} |\n", name, curve.area));
            }
            Err(why) => out.push_str(&format!("| Curve     | n/a ({}) |\n", why)),
        }

        out.push_str("\n## Training Score Distribution\n\n");
        let n = self.distribution.n.max(1) as f64;
        for (lower, count) in &self.distribution.histogram {
            let bar = "#".repeat((*count as f64 / n * 80.0) as usize);
            out.push_str(&format!("{:.2}-{:.2} | {:5} | {}\n", lower, lower + metrics::HIST_WIDTH, count, bar));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
