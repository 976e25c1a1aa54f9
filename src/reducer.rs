//! Concurrent aggregation of many day-files.
//!
//! Each day-file is aggregated on the blocking pool, at most `workers` at a
//! time. Results are reassembled in input order. The first failure aborts
//! the batch: pending tasks are cancelled and results already computed are
//! dropped.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info};

use crate::aggregate::{DayAggregator, ProvinceDayRecord};
use crate::error::{FluxError, Result};
use crate::store::DayFile;

#[derive(Debug, Clone)]
pub struct ParallelReducer {
    aggregator: DayAggregator,
    workers: usize,
}

impl ParallelReducer {
    pub fn new(aggregator: DayAggregator, workers: usize) -> Self {
        Self {
            aggregator,
            workers: workers.max(1),
        }
    }

    /// Aggregates `files` and concatenates the results in the order given.
    #[tracing::instrument(skip_all, fields(files = files.len(), workers = self.workers))]
    pub async fn reduce(&self, files: &[DayFile]) -> Result<Vec<ProvinceDayRecord>> {
        let total = files.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (idx, day) in files.iter().cloned().enumerate() {
            let sem = semaphore.clone();
            let aggregator = self.aggregator;
            let span = tracing::debug_span!("aggregate_day", date = %day.date);

            tasks.spawn(
                async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|e| FluxError::Worker(e.to_string()))?;
                    let result = tokio::task::spawn_blocking(move || aggregator.aggregate_file(&day))
                        .await
                        .map_err(|e| FluxError::Worker(e.to_string()))?;
                    result.map(|records| (idx, records))
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<Vec<ProvinceDayRecord>>> = vec![None; total];
        let mut completed = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| FluxError::Worker(e.to_string()))?;
            match outcome {
                Ok((idx, records)) => {
                    slots[idx] = Some(records);
                    completed += 1;
                    info!(completed, total, "Day-file processed");
                }
                Err(e) => {
                    error!(error = %e, completed, total, "Aborting batch");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(slots.into_iter().flatten().flatten().collect())
    }
}
