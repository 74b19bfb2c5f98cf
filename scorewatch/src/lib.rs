// scorewatch/src/lib.rs
//
// Scorewatch: model-score monitoring and annotation dashboard backend.
//
// A CSV prediction table is polled from disk into immutable snapshots.
// Each dashboard session keeps its own selection and a lazily recomputed
// derivation graph over the current snapshot. Labels are written back to
// the same file through a single in-process writer.
//
//   source ──► graph (sampled → filtered → selected / training → metric)
//     ▲                              │
//     └──── annotate ◄── session ◄───┘◄── api (length-prefixed JSON over TCP)

pub mod annotate;
pub mod api;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod report;
pub mod selection;
pub mod session;
pub mod simulate;
pub mod source;
pub mod table;

pub use annotate::AnnotationStore;
pub use error::{DashError, Result};
pub use model::{Dataset, DateRange, Label, MetricKind, Record};
pub use session::Session;
pub use source::DatasetSource;
