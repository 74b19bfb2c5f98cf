// scorewatch/src/source.rs
//
// DatasetSource: owns the current snapshot of the backing file.
//
// Readers call `current()` and get an Arc<Dataset>. The poll loop only ever
// swaps that Arc; it never touches a published Dataset, so a reader holding
// an old Arc keeps a complete (if stale) view.
//
// Poll tick (default 200ms):
//   1. stat the file - (mtime, len) unchanged → nothing to do
//   2. read bytes, sha256 - digest unchanged → remember the signal, no reload
//   3. parse - structural failure → keep old snapshot, record the error
//   4. publish a new Dataset with the next version number
//
// A missing or unreadable file is an error state, not a reset: the last good
// snapshot stays current and `status().last_error` reports the failure.
//
// Polls are serialised from stat to publish. The tick and the annotation
// writer's refresh both poll, and an older read must never be published
// over a newer one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::model::Dataset;
use crate::table;

pub const DEFAULT_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSignal {
    modified: Option<SystemTime>,
    len:      u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Reloaded(u64),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub path:       String,
    pub version:    u64,
    pub rows:       usize,
    pub digest:     String,
    pub loaded_at:  DateTime<Utc>,
    pub reloads:    u64,
    pub last_error: Option<String>,
}

pub struct DatasetSource {
    path:          PathBuf,
    poll_interval: Duration,
    snapshot:      RwLock<Arc<Dataset>>,
    signal:        Mutex<Option<FileSignal>>,
    poll_lock:     Mutex<()>,
    last_error:    RwLock<Option<String>>,
    next_version:  AtomicU64,
    pub reloads:   AtomicU64,
}

impl DatasetSource {
    /// Create a source with an empty snapshot. Nothing is read until the
    /// first poll; use `open` to load eagerly.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path:          path.into(),
            poll_interval,
            snapshot:      RwLock::new(Arc::new(Dataset::new(Vec::new()))),
            signal:        Mutex::new(None),
            poll_lock:     Mutex::new(()),
            last_error:    RwLock::new(None),
            next_version:  AtomicU64::new(1),
            reloads:       AtomicU64::new(0),
        }
    }

    /// Create and perform the initial load. A failed initial load is logged
    /// and reported through `status()`; the source is still usable.
    pub fn open(path: impl Into<PathBuf>, poll_interval: Duration) -> Arc<Self> {
        let src = Arc::new(Self::new(path, poll_interval));
        if let PollOutcome::Failed(e) = src.refresh() {
            warn!("Initial load of {} failed: {}", src.path.display(), e);
        }
        src
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Most recent successfully parsed snapshot.
    pub fn current(&self) -> Arc<Dataset> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn status(&self) -> SourceStatus {
        let ds = self.current();
        SourceStatus {
            path:       self.path.display().to_string(),
            version:    ds.version,
            rows:       ds.len(),
            digest:     ds.digest.clone(),
            loaded_at:  ds.loaded_at,
            reloads:    self.reloads.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }

    /// One poll tick. Skips the read when the file signal is unchanged.
    pub fn poll_once(&self) -> PollOutcome {
        self.poll(false)
    }

    /// Poll ignoring the file signal. Used after our own writes, where mtime
    /// resolution may hide the change.
    pub fn refresh(&self) -> PollOutcome {
        self.poll(true)
    }

    fn poll(&self, force: bool) -> PollOutcome {
        let _guard = self.poll_lock.lock();
        let meta = match std::fs::metadata(&self.path) {
            Ok(m)  => m,
            Err(e) => return self.fail(format!("cannot stat {}: {}", self.path.display(), e)),
        };
        let signal = FileSignal { modified: meta.modified().ok(), len: meta.len() };

        if !force && *self.signal.lock() == Some(signal) {
            return PollOutcome::Unchanged;
        }

        let bytes = match std::fs::read(&self.path) {
            Ok(b)  => b,
            Err(e) => return self.fail(format!("cannot read {}: {}", self.path.display(), e)),
        };
        let digest = content_digest(&bytes);

        if self.snapshot.read().digest == digest {
            *self.signal.lock() = Some(signal);
            self.clear_error();
            return PollOutcome::Unchanged;
        }

        let parsed = match table::read_table(bytes.as_slice()) {
            Ok(t)  => t,
            Err(e) => return self.fail(format!("cannot parse {}: {}", self.path.display(), e)),
        };

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let dataset = Dataset {
            version,
            columns:   parsed.columns,
            records:   parsed.records,
            digest,
            loaded_at: Utc::now(),
        };
        let rows = dataset.len();

        *self.snapshot.write() = Arc::new(dataset);
        *self.signal.lock()    = Some(signal);
        self.reloads.fetch_add(1, Ordering::Relaxed);
        self.clear_error();

        info!("Loaded {} v{} rows={} skipped={}",
            self.path.display(), version, rows, parsed.skipped);
        PollOutcome::Reloaded(version)
    }

    fn fail(&self, msg: String) -> PollOutcome {
        let mut last = self.last_error.write();
        if last.as_deref() != Some(msg.as_str()) {
            warn!("{}", msg);
        } else {
            debug!("{}", msg);
        }
        *last = Some(msg.clone());
        PollOutcome::Failed(msg)
    }

    fn clear_error(&self) {
        let mut last = self.last_error.write();
        if last.take().is_some() {
            info!("{} readable again", self.path.display());
        }
    }

    /// Poll forever on the configured interval. File IO runs on the
    /// blocking pool so session tasks are never stalled by a slow disk.
    pub async fn poll_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let src = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || src.poll_once()).await {
                warn!("Poll task failed: {}", e);
            }
        }
    }
}

fn content_digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(&h.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "id,account,date,text,training_score,prod_score,is_electronics,annotation\n";

    fn write_file(path: &Path, body: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(HEADER.as_bytes()).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn loads_and_versions_snapshots() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");

        let src = DatasetSource::open(&path, DEFAULT_POLL);
        let v1  = src.current();
        assert_eq!(v1.len(), 1);
        assert_eq!(v1.version, 1);

        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n2,B,2023-02-02,y,0.1,0.2,False,\n");
        assert_eq!(src.refresh(), PollOutcome::Reloaded(2));
        assert_eq!(src.current().len(), 2);

        // Old handle is untouched by the reload.
        assert_eq!(v1.len(), 1);
    }

    #[test]
    fn identical_content_is_not_a_new_version() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");

        let src = DatasetSource::open(&path, DEFAULT_POLL);
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");
        assert_eq!(src.refresh(), PollOutcome::Unchanged);
        assert_eq!(src.current().version, 1);
    }

    #[test]
    fn unchanged_signal_skips_read() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");

        let src = DatasetSource::open(&path, DEFAULT_POLL);
        assert_eq!(src.poll_once(), PollOutcome::Unchanged);
        assert_eq!(src.reloads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn missing_file_retains_last_snapshot() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");

        let src = DatasetSource::open(&path, DEFAULT_POLL);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(src.poll_once(), PollOutcome::Failed(_)));
        assert_eq!(src.current().len(), 1);
        assert!(src.status().last_error.is_some());

        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n2,A,2023-02-01,y,0.2,0.3,False,\n");
        assert_eq!(src.refresh(), PollOutcome::Reloaded(2));
        assert!(src.status().last_error.is_none());
    }

    #[test]
    fn malformed_file_keeps_previous_snapshot() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");
        let src = DatasetSource::open(&path, DEFAULT_POLL);

        std::fs::write(&path, "id,account\n1,A\n").unwrap();
        assert!(matches!(src.refresh(), PollOutcome::Failed(_)));
        assert_eq!(src.current().version, 1);
    }

    #[test]
    fn never_loaded_source_is_empty() {
        let src = DatasetSource::open("/nonexistent/scorewatch.csv", DEFAULT_POLL);
        assert!(src.current().is_empty());
        assert_eq!(src.current().version, 0);
        assert!(src.last_error().is_some());
    }

    #[test]
    fn concurrent_polls_publish_in_order() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "0,A,2023-02-01,x,0.5,0.5,True,\n");
        let src = DatasetSource::open(&path, DEFAULT_POLL);

        let pollers: Vec<_> = (0..3).map(|_| {
            let src = Arc::clone(&src);
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    src.poll_once();
                    seen.push(src.current().version);
                }
                seen
            })
        }).collect();

        let mut body = String::new();
        for i in 0..50 {
            body.push_str(&format!("{},A,2023-02-01,x,0.5,0.5,True,\n", i));
            write_file(&path, &body);
            src.refresh();
            assert_eq!(src.current().len(), i + 1, "refresh sees its own write");
        }

        for p in pollers {
            let seen = p.join().unwrap();
            assert!(seen.windows(2).all(|w| w[0] <= w[1]), "versions went backwards");
        }
    }

    #[tokio::test]
    async fn poll_loop_picks_up_external_writes() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n");

        let src  = DatasetSource::open(&path, Duration::from_millis(10));
        let task = tokio::spawn(Arc::clone(&src).poll_loop());

        write_file(&path, "1,A,2023-02-01,x,0.9,0.8,True,\n2,B,2023-02-02,y,0.1,0.2,False,\n");
        let mut reloaded = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if src.current().len() == 2 { reloaded = true; break; }
        }
        task.abort();

        assert!(reloaded, "poll loop never published the new file");
        assert_eq!(src.current().version, 2);
    }
}
