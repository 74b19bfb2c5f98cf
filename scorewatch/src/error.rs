// scorewatch/src/error.rs
//
// Library error type. Binary-side orchestration (main, query API loop) wraps
// these in anyhow; everything below the session boundary returns DashError.
//
// Two variants are expected conditions rather than faults:
//   NoSelection     - nothing selected, or the selected row left the view
//   UndefinedMetric - the subset lacks the class balance a curve needs
// The presentation layer renders both as "nothing to show".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashError {
    #[error("no row selected")]
    NoSelection,

    #[error("metric undefined: {0}")]
    UndefinedMetric(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("backing file is missing column `{0}`")]
    MissingColumn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl DashError {
    /// True for conditions the dashboard shows as an empty panel.
    pub fn is_empty_view(&self) -> bool {
        matches!(self, Self::NoSelection | Self::UndefinedMetric(_))
    }
}

pub type Result<T> = std::result::Result<T, DashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_view_conditions() {
        assert!(DashError::NoSelection.is_empty_view());
        assert!(DashError::UndefinedMetric("no positives".into()).is_empty_view());
        assert!(!DashError::UnknownAccount("Z".into()).is_empty_view());
        assert!(!DashError::InvalidSelection("sample size 0".into()).is_empty_view());
    }

    #[test]
    fn io_errors_convert() {
        let e: DashError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(e, DashError::Io(_)));
        assert!(e.to_string().contains("gone"));
    }
}
