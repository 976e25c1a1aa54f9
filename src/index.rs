//! Mobility indices per province and day.
//!
//! Three kinds of daily totals are derived from the located flows:
//! trips inside a province, trips leaving it and trips entering it. Each is
//! compared against two reference periods with the same weekday: the
//! pre-lockdown February week (a separate flows file) and the week of
//! 2020-05-04 taken from the current data.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{FluxError, Result};
use crate::latin1;
use crate::output;

pub const INDEX_FILE: &str = "mobility_index.csv";
pub const REFERENCE_FLOWS_FILE: &str = "ref_flowmap_flows_location.csv";
pub const PROVINCES_FILE: &str = "provincias.csv";
pub const NATIONAL_TOTAL: &str = "Spain (Total)";

/// First and last day of the week used as the May reference.
pub fn may_reference_week() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2020, 5, 4).unwrap_or_default(),
        NaiveDate::from_ymd_opt(2020, 5, 10).unwrap_or_default(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKind {
    Internal,
    Outward,
    Inward,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Internal => write!(f, "INTERNAL"),
            IndexKind::Outward => write!(f, "OUTWARD"),
            IndexKind::Inward => write!(f, "INWARD"),
        }
    }
}

/// The columns of a located flows table the indices need.
#[derive(Debug, Clone, Deserialize)]
pub struct LocatedFlow {
    pub time: NaiveDate,
    pub origin_name: String,
    pub dest_name: String,
    pub count: f64,
}

/// Daily total of one kind for one province (or the whole country).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub time: NaiveDate,
    pub province: String,
    pub count: f64,
    pub kind: IndexKind,
}

impl IndexRow {
    /// Monday = 0.
    pub fn weekday(&self) -> u32 {
        self.time.weekday().num_days_from_monday()
    }

    fn key(&self) -> (String, IndexKind, u32) {
        (self.province.clone(), self.kind, self.weekday())
    }
}

/// Internal, outward and inward totals followed by their national sums.
pub fn index_rows(flows: &[LocatedFlow]) -> Vec<IndexRow> {
    let mut per_pair: BTreeMap<(NaiveDate, &str, &str), f64> = BTreeMap::new();
    for f in flows {
        *per_pair
            .entry((f.time, f.origin_name.as_str(), f.dest_name.as_str()))
            .or_insert(0.0) += f.count;
    }

    let mut by_kind: BTreeMap<IndexKind, BTreeMap<(NaiveDate, &str), f64>> = BTreeMap::new();
    for (&(time, origin, dest), &count) in &per_pair {
        if origin == dest {
            *by_kind.entry(IndexKind::Internal).or_default().entry((time, origin)).or_insert(0.0) += count;
        } else {
            *by_kind.entry(IndexKind::Outward).or_default().entry((time, origin)).or_insert(0.0) += count;
            *by_kind.entry(IndexKind::Inward).or_default().entry((time, dest)).or_insert(0.0) += count;
        }
    }

    let mut rows = Vec::new();
    for kind in [IndexKind::Internal, IndexKind::Outward, IndexKind::Inward] {
        let Some(totals) = by_kind.get(&kind) else {
            continue;
        };
        let mut national: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for (&(time, province), &count) in totals {
            *national.entry(time).or_insert(0.0) += count;
            rows.push(IndexRow {
                time,
                province: province.to_string(),
                count,
                kind,
            });
        }
        rows.extend(national.into_iter().map(|(time, count)| IndexRow {
            time,
            province: NATIONAL_TOTAL.to_string(),
            count,
            kind,
        }));
    }
    rows
}

/// Reference counts keyed by (province, kind, weekday); the first row wins.
pub fn reference_lookup<'a>(rows: impl IntoIterator<Item = &'a IndexRow>) -> HashMap<(String, IndexKind, u32), f64> {
    let mut lookup = HashMap::new();
    for row in rows {
        lookup.entry(row.key()).or_insert(row.count);
    }
    lookup
}

fn ratio(count: f64, reference: Option<&f64>) -> Option<f64> {
    reference.filter(|r| **r != 0.0).map(|r| count / r)
}

/// Province → region table; rows with an empty cell are skipped.
#[derive(Debug, Clone)]
pub struct RegionTable {
    pub column: String,
    regions: HashMap<String, String>,
}

impl RegionTable {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let text = latin1::decode(&bytes);
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(output::DELIMITER)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = rdr.headers().map_err(|e| FluxError::dataset(path, e))?.clone();
        let column = headers
            .get(1)
            .ok_or_else(|| FluxError::dataset(path, "expected at least two columns (province, region)"))?
            .trim()
            .to_string();

        let mut regions = HashMap::new();
        for result in rdr.records() {
            let record = result.map_err(|e| FluxError::dataset(path, e))?;
            match (record.get(0).map(str::trim), record.get(1).map(str::trim)) {
                (Some(p), Some(r)) if !p.is_empty() && !r.is_empty() => {
                    regions.insert(p.to_string(), r.to_string());
                }
                _ => {}
            }
        }
        Ok(Self { column, regions })
    }

    pub fn region_of(&self, province: &str) -> Option<&str> {
        self.regions.get(province).map(String::as_str)
    }
}

/// One line of `mobility_index.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct MobilityIndex {
    pub row: IndexRow,
    pub index_feb: Option<f64>,
    pub index_may: Option<f64>,
    pub region: String,
}

/// Joins each row with both references and its region.
pub fn mobility_indices(current: &[IndexRow], february: &[IndexRow], regions: &RegionTable) -> Vec<MobilityIndex> {
    let feb = reference_lookup(february);
    let (may_start, may_end) = may_reference_week();
    let may = reference_lookup(current.iter().filter(|r| r.time >= may_start && r.time <= may_end));

    current
        .iter()
        .filter_map(|row| {
            let region = regions.region_of(&row.province)?;
            let key = row.key();
            Some(MobilityIndex {
                index_feb: ratio(row.count, feb.get(&key)),
                index_may: ratio(row.count, may.get(&key)),
                region: region.to_string(),
                row: row.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub flows_location: PathBuf,
    pub reference_flows: PathBuf,
    pub provinces: PathBuf,
    pub output: PathBuf,
}

impl IndexPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            flows_location: dir.join(crate::flowmap::FLOWS_LOCATION_FILE),
            reference_flows: dir.join(REFERENCE_FLOWS_FILE),
            provinces: dir.join(PROVINCES_FILE),
            output: dir.join(INDEX_FILE),
        }
    }
}

/// Reads the located flows, the February reference and the region table,
/// and writes `mobility_index.csv`. Returns the number of rows written.
#[tracing::instrument(skip_all, fields(output = %paths.output.display()))]
pub fn generate_index(paths: &IndexPaths) -> Result<usize> {
    let flows: Vec<LocatedFlow> = output::read_table(&paths.flows_location)?;
    let reference: Vec<LocatedFlow> = output::read_table(&paths.reference_flows)?;
    let regions = RegionTable::load(&paths.provinces)?;

    let current = index_rows(&flows);
    let february = index_rows(&reference);
    let indices = mobility_indices(&current, &february, &regions);

    let dropped = current.len() - indices.len();
    if dropped > 0 {
        warn!(dropped, "Index rows without a region were dropped");
    }

    let fmt_opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    let lines: Vec<Vec<String>> = indices
        .iter()
        .map(|m| {
            vec![
                m.row.time.format("%Y-%m-%d").to_string(),
                m.row.province.clone(),
                m.row.count.to_string(),
                m.row.kind.to_string(),
                m.row.weekday().to_string(),
                fmt_opt(m.index_feb),
                fmt_opt(m.index_may),
                m.region.clone(),
            ]
        })
        .collect();

    output::write_table(
        &paths.output,
        &[
            "time",
            "origin_name",
            "count",
            "index",
            "weekday",
            "INDEX_FEB",
            "INDEX_MAY",
            regions.column.as_str(),
        ],
        &lines,
    )?;

    info!(rows = lines.len(), "Mobility index written");
    Ok(lines.len())
}
