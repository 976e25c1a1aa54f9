//! Error type shared by every stage of the pipeline.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a pipeline run.
///
/// Every variant names the file or the date boundary that caused it, so the
/// operator can decide whether to re-run, force or look at the upstream data.
#[derive(Error, Debug)]
pub enum FluxError {
    /// A day-file is unreadable or does not match the expected schema.
    #[error("failed to parse {}{}: {reason}", path.display(), line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    Parse {
        path: PathBuf,
        line: Option<u64>,
        reason: String,
    },

    /// Persisted data and the new day-files do not join on consecutive days.
    #[error(
        "the last persisted day ({last}) and the first day of the update ({first}) are not consecutive; \
         rerun the download and process from scratch, or force the append"
    )]
    Continuity { last: NaiveDate, first: NaiveDate },

    /// Update mode was requested without a dataset to update.
    #[error("update requested but no persisted dataset exists at {}", path.display())]
    MissingDataset { path: PathBuf },

    #[error("province code table {}: {reason}", path.display())]
    CodeMap { path: PathBuf, reason: String },

    #[error("dataset {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FluxError {
    pub(crate) fn parse(path: impl Into<PathBuf>, line: Option<u64>, reason: impl ToString) -> Self {
        FluxError::Parse {
            path: path.into(),
            line,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn dataset(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        FluxError::Dataset {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for FluxError {
    fn from(err: reqwest::Error) -> Self {
        FluxError::Http(err.to_string())
    }
}

pub type Result<T, E = FluxError> = std::result::Result<T, E>;
