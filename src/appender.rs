//! Merging freshly aggregated days into the persisted dataset.
//!
//! In full mode the new rows replace whatever was persisted. In update mode
//! they are appended after the persisted rows, provided the first new day is
//! the day after the last persisted one. Only the boundary is checked; gaps
//! inside a batch are not detected.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::{ProvinceFlowDataset, ProvinceFlowRecord};
use crate::error::{FluxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Rebuild the dataset from every stored day-file.
    Full,
    /// Extend the persisted dataset; `force` skips the continuity check.
    Update { force: bool },
}

impl RunMode {
    pub fn from_flags(update: bool, force: bool) -> Self {
        if update {
            RunMode::Update { force }
        } else {
            RunMode::Full
        }
    }
}

/// Fails unless `first_new` is exactly the day after `last_persisted`.
pub fn check_continuity(last_persisted: NaiveDate, first_new: NaiveDate) -> Result<()> {
    if last_persisted.succ_opt() == Some(first_new) {
        Ok(())
    } else {
        Err(FluxError::Continuity {
            last: last_persisted,
            first: first_new,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IncrementalAppender {
    output: PathBuf,
    mode: RunMode,
}

impl IncrementalAppender {
    pub fn new(output: impl Into<PathBuf>, mode: RunMode) -> Self {
        Self {
            output: output.into(),
            mode,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Dataset the new rows will be appended to: empty in full mode, the
    /// persisted file in update mode.
    pub fn load_base(&self) -> Result<ProvinceFlowDataset> {
        match self.mode {
            RunMode::Full => Ok(ProvinceFlowDataset::default()),
            RunMode::Update { .. } => {
                if !self.output.exists() {
                    return Err(FluxError::MissingDataset {
                        path: self.output.clone(),
                    });
                }
                ProvinceFlowDataset::load(&self.output)
            }
        }
    }

    /// Checks that a batch starting on `first_new` continues `base`.
    ///
    /// An empty base has nothing to continue and always passes.
    pub fn ensure_continuity(&self, base: &ProvinceFlowDataset, first_new: NaiveDate) -> Result<()> {
        let RunMode::Update { force } = self.mode else {
            return Ok(());
        };
        let Some(last) = base.last_date() else {
            return Ok(());
        };

        match check_continuity(last, first_new) {
            Err(_) if force => {
                warn!(last = %last, first = %first_new, "Dates not consecutive, appending anyway (forced)");
                Ok(())
            }
            other => other,
        }
    }

    /// Appends `fresh` after `base` and atomically persists the result.
    #[tracing::instrument(skip_all, fields(output = %self.output.display(), base = base.len(), fresh = fresh.len()))]
    pub fn append(&self, base: ProvinceFlowDataset, fresh: Vec<ProvinceFlowRecord>) -> Result<ProvinceFlowDataset> {
        let mut merged = base;
        merged.records.extend(fresh);
        merged.save(&self.output)?;

        info!(rows = merged.len(), last = ?merged.last_date(), "Dataset updated");
        Ok(merged)
    }
}
