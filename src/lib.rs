pub mod aggregate;
pub mod appender;
pub mod config;
pub mod dataset;
pub mod download;
pub mod error;
pub mod fetch;
pub mod flowmap;
pub mod index;
pub mod infra;
pub mod latin1;
pub mod names;
pub mod output;
pub mod pipeline;
pub mod reducer;
pub mod services;
pub mod store;

pub use config::PipelineConfig;
pub use error::{FluxError, Result};
pub use pipeline::{RunOutcome, RunSummary, process, process_files};
