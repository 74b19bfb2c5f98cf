// scorewatch/src/annotate.rs
//
// AnnotationStore: the only writer of the backing file.
//
// `annotate()` is the pure edit: new Dataset, one row's annotation set.
// `AnnotationStore::annotate()` is the persisted edit:
//
//   lock writer mutex
//     refresh source           (pick up edits made by other processes)
//     apply edit to latest snapshot
//     write <file>.tmp, rename over <file>
//     refresh source           (writer sees its own edit without waiting a tick)
//   unlock
//
// Within one process writers are serialised, so concurrent sessions never
// drop each other's labels. Across processes there is no coordination: two
// instances rewriting the same file race and the last full rewrite wins.
// The rename keeps readers from ever seeing a half-written table.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{Dataset, Label};
use crate::source::{DatasetSource, PollOutcome};
use crate::table;

/// Set `annotation = label` on the row with `id`. Rows are otherwise
/// untouched. An unknown id returns an equal dataset: the selection can race
/// a reload that removed the row, and that is not an error.
pub fn annotate(dataset: &Dataset, id: &str, label: Label) -> Dataset {
    let mut next = dataset.clone();
    for r in next.records.iter_mut().filter(|r| r.id == id) {
        r.annotation = Some(label.as_str().to_string());
    }
    next
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationOutcome {
    pub id:      String,
    pub label:   Label,
    /// False when no row carried the id; nothing was written.
    pub applied: bool,
    /// Snapshot version after the write was observed.
    pub version: u64,
}

pub struct AnnotationStore {
    source:     Arc<DatasetSource>,
    write_lock: Mutex<()>,
    pub writes: AtomicU64,
}

impl AnnotationStore {
    pub fn new(source: Arc<DatasetSource>) -> Self {
        Self { source, write_lock: Mutex::new(()), writes: AtomicU64::new(0) }
    }

    pub fn source(&self) -> &Arc<DatasetSource> { &self.source }

    /// Apply a label to the freshest snapshot and rewrite the whole file.
    pub fn annotate(&self, id: &str, label: Label) -> Result<AnnotationOutcome> {
        let _guard = self.write_lock.lock();

        if let PollOutcome::Failed(e) = self.source.refresh() {
            warn!("Annotating against last good snapshot: {}", e);
        }
        let current = self.source.current();

        if current.get(id).is_none() {
            info!("Annotation for id={} skipped: not in snapshot v{}", id, current.version);
            return Ok(AnnotationOutcome {
                id: id.to_string(), label, applied: false, version: current.version,
            });
        }

        let next = annotate(&current, id, label);
        persist(self.source.path(), &next)?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        let version = match self.source.refresh() {
            PollOutcome::Reloaded(v) => v,
            _                        => self.source.current().version,
        };
        info!("Annotated id={} as {} ({} rows written, now v{})", id, label, next.len(), version);

        Ok(AnnotationOutcome { id: id.to_string(), label, applied: true, version })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Overwrite `path` with the full dataset.
pub fn persist(path: &Path, dataset: &Dataset) -> Result<()> {
    let tmp = temp_path(path);
    {
        let file = std::fs::File::create(&tmp)?;
        table::write_table(BufWriter::new(file), dataset)?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
