//! The accumulated province flow dataset (`province_flux.csv`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::aggregate::ProvinceDayRecord;
use crate::error::Result;
use crate::names::ProvinceCodeMap;
use crate::output;

pub const HEADERS: [&str; 6] = [
    "date",
    "province origin",
    "province id origin",
    "province destination",
    "province id destination",
    "flux",
];

/// One row of the persisted dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvinceFlowRecord {
    pub date: NaiveDate,
    #[serde(rename = "province origin")]
    pub origin_name: Option<String>,
    #[serde(rename = "province id origin")]
    pub origin: String,
    #[serde(rename = "province destination")]
    pub destination_name: Option<String>,
    #[serde(rename = "province id destination")]
    pub destination: String,
    #[serde(serialize_with = "output::number")]
    pub flux: f64,
}

impl ProvinceFlowRecord {
    /// Attaches province names; unknown codes keep a blank name.
    pub fn resolve(record: ProvinceDayRecord, names: &ProvinceCodeMap) -> Self {
        Self {
            date: record.date,
            origin_name: names.name_of(&record.origin).map(str::to_string),
            destination_name: names.name_of(&record.destination).map(str::to_string),
            origin: record.origin,
            destination: record.destination,
            flux: record.trips,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvinceFlowDataset {
    pub records: Vec<ProvinceFlowRecord>,
}

impl ProvinceFlowDataset {
    pub fn new(records: Vec<ProvinceFlowRecord>) -> Self {
        Self { records }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let records: Vec<ProvinceFlowRecord> = output::read_table(path)?;
        info!(path = %path.display(), rows = records.len(), "Persisted dataset loaded");
        Ok(Self { records })
    }

    /// Atomically replaces `path` with this dataset.
    pub fn save(&self, path: &Path) -> Result<()> {
        output::write_table(path, &HEADERS, &self.records)?;
        info!(path = %path.display(), rows = self.records.len(), "Dataset persisted");
        Ok(())
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.iter().map(|r| r.date).min()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.iter().map(|r| r.date).max()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
