// scorewatch/tests/end_to_end.rs
//
// Full path through a real file: load, derive, select, annotate, reload.

use std::sync::Arc;

use scorewatch::model::{Label, MetricKind};
use scorewatch::source::{DatasetSource, PollOutcome, DEFAULT_POLL};
use scorewatch::{AnnotationStore, Session};

const FIXTURE: &str = "\
id,account,date,text,training_score,prod_score,is_electronics,annotation,batch
1,A,2023-02-01,usb hub,0.9,0.8,True,,b-17
2,A,2023-02-01,tea towel,0.1,0.2,False,,b-17
";

fn open(dir: &tempfile::TempDir) -> (Arc<DatasetSource>, Session) {
    let path = dir.path().join("predictions.csv");
    std::fs::write(&path, FIXTURE).unwrap();
    let source  = DatasetSource::open(&path, DEFAULT_POLL);
    let store   = Arc::new(AnnotationStore::new(Arc::clone(&source)));
    let session = Session::new(1, store, Some(11));
    (source, session)
}

#[test]
fn perfect_separation_gives_unit_auc() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut s) = open(&dir);
    assert_eq!(s.selection().account.as_deref(), Some("A"));
    s.set_metric(MetricKind::Roc);
    let curve = s.metric().unwrap();
    assert!((curve.area - 1.0).abs() < 1e-12);
    assert_eq!((curve.n_positive, curve.n_negative), (1, 1));
}

#[test]
fn annotating_the_selection_labels_exactly_that_row() {
    let dir = tempfile::tempdir().unwrap();
    let (source, mut s) = open(&dir);

    // Sampling draws with replacement, so find where id 1 landed.
    let index = s.results().iter().position(|r| r.id == "1").unwrap();
    let id = s.select_row(index).unwrap();
    assert_eq!(id, "1");
    assert_eq!(s.to_review().unwrap().as_deref(), Some("usb hub"));
    let out = s.annotate_selected(Label::Electronics).unwrap();
    assert!(out.applied);

    let now = source.current();
    assert_eq!(now.len(), 2);
    for r in &now.records {
        let expected = if r.id == "1" { Some("electronics") } else { None };
        assert_eq!(r.annotation.as_deref(), expected, "row {}", r.id);
        assert_eq!(r.extra, vec!["b-17".to_string()]);
    }

    let written = std::fs::read_to_string(source.path()).unwrap();
    assert!(written.starts_with("id,account,date,text,training_score,prod_score,is_electronics,annotation,batch"));
}

#[test]
fn external_edits_are_picked_up_by_polling() {
    let dir = tempfile::tempdir().unwrap();
    let (source, mut s) = open(&dir);
    let before = source.current().version;

    let more = format!("{}3,B,2023-02-02,router,0.7,0.6,yes,,b-18\n", FIXTURE);
    std::fs::write(source.path(), more).unwrap();
    assert!(matches!(source.refresh(), PollOutcome::Reloaded(v) if v > before));

    assert!(s.set_account("B").is_ok());
    assert_eq!(s.training().len(), 1);
}
