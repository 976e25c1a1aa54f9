//! End-to-end processing run: raw day-files in, `province_flux.csv` out.
//!
//! A run is all-or-nothing. Continuity is checked before any file is read,
//! every selected day-file must aggregate cleanly, and the dataset is written
//! once, by a single atomic replace, after all aggregation has finished.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::aggregate::DayAggregator;
use crate::appender::{IncrementalAppender, RunMode};
use crate::config::PipelineConfig;
use crate::dataset::ProvinceFlowRecord;
use crate::error::Result;
use crate::names::ProvinceCodeMap;
use crate::reducer::ParallelReducer;
use crate::store::{DayFile, RawFileStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Day-files aggregated in this run.
    pub days: usize,
    /// Rows produced by this run.
    pub new_rows: usize,
    /// Rows in the persisted dataset after the run.
    pub total_rows: usize,
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Written(RunSummary),
    /// Nothing to process; the persisted dataset was left untouched.
    NoInput,
}

/// Processes the day-files selected by the run mode.
///
/// Full mode takes every stored day-file. Update mode takes the stored
/// day-files dated after the last persisted day. With nothing to process an
/// existing dataset is never touched.
pub async fn process(config: &PipelineConfig) -> Result<RunOutcome> {
    process_files(config, None).await
}

/// Processes `files` when given, otherwise the selection described in
/// [`process`].
#[tracing::instrument(skip_all, fields(raw_dir = %config.raw_dir().display(), update = config.update, force = config.force))]
pub async fn process_files(config: &PipelineConfig, files: Option<Vec<DayFile>>) -> Result<RunOutcome> {
    let store = RawFileStore::new(config.raw_dir(), config.maestra, config.location);
    let mode = RunMode::from_flags(config.update, config.force);
    let appender = IncrementalAppender::new(&config.output_path, mode);

    let base = appender.load_base()?;

    let mut files = match files {
        Some(files) => files,
        None => match (mode, base.last_date()) {
            (RunMode::Update { .. }, Some(last)) => store.day_files_after(last)?,
            _ => store.day_files()?,
        },
    };
    files.sort();

    let Some(first_new) = files.first().map(|f| f.date) else {
        warn!(dir = %store.dir().display(), "No files to process");
        return match mode {
            // Only a missing dataset gets the header-only file; an existing one is kept.
            RunMode::Full if !appender.output().exists() => {
                let written = appender.append(base, Vec::new())?;
                Ok(RunOutcome::Written(RunSummary {
                    days: 0,
                    new_rows: 0,
                    total_rows: written.len(),
                    first: None,
                    last: None,
                }))
            }
            _ => Ok(RunOutcome::NoInput),
        };
    };

    appender.ensure_continuity(&base, first_new)?;

    let names = ProvinceCodeMap::load(&config.code_map_path, config.province_digits)?;

    info!(files = files.len(), first = %first_new, "Processing data");
    let reducer = ParallelReducer::new(DayAggregator::new(config.province_digits), config.workers);
    let aggregated = reducer.reduce(&files).await?;

    let fresh: Vec<ProvinceFlowRecord> = aggregated
        .into_iter()
        .map(|r| ProvinceFlowRecord::resolve(r, &names))
        .collect();
    let unresolved = fresh
        .iter()
        .filter(|r| r.origin_name.is_none() || r.destination_name.is_none())
        .count();
    if unresolved > 0 {
        warn!(unresolved, "Rows with province codes missing from the code table");
    }

    let new_rows = fresh.len();
    let written = appender.append(base, fresh)?;

    Ok(RunOutcome::Written(RunSummary {
        days: files.len(),
        new_rows,
        total_rows: written.len(),
        first: written.first_date(),
        last: written.last_date(),
    }))
}
