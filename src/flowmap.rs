//! Flow-map tables derived from the province dataset.
//!
//! Produces the location and flow tables the flow-map visualization loads,
//! geocoding province names once and caching them in `flowmap_coord.csv`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::ProvinceFlowDataset;
use crate::error::Result;
use crate::output::{self, number};
use crate::services::geocoder::{Coordinates, Geocoder};

pub const COORD_FILE: &str = "flowmap_coord.csv";
pub const LOCATIONS_FILE: &str = "flowmap_locations.csv";
pub const FLOWS_FILE: &str = "flowmap_flows.csv";
pub const FLOWS_LOCATION_FILE: &str = "flowmap_flows_location.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordRecord {
    pub name: String,
    #[serde(serialize_with = "number")]
    pub lat: f64,
    #[serde(serialize_with = "number")]
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: String,
    pub name: String,
    #[serde(serialize_with = "number")]
    pub lat: f64,
    #[serde(serialize_with = "number")]
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub time: NaiveDate,
    pub origin: String,
    pub dest: String,
    #[serde(serialize_with = "number")]
    pub count: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowLocationRecord {
    pub time: NaiveDate,
    pub origin: String,
    pub dest: String,
    #[serde(serialize_with = "number")]
    pub count: f64,
    pub origin_name: String,
    #[serde(serialize_with = "number")]
    pub orig_lat: f64,
    #[serde(serialize_with = "number")]
    pub orig_lon: f64,
    pub dest_name: String,
    #[serde(serialize_with = "number")]
    pub dest_lat: f64,
    #[serde(serialize_with = "number")]
    pub dest_lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowmapSummary {
    pub locations: usize,
    pub flows: usize,
    pub flows_with_location: usize,
}

/// Where the flow-map tables live.
#[derive(Debug, Clone)]
pub struct FlowmapPaths {
    pub coord: PathBuf,
    pub locations: PathBuf,
    pub flows: PathBuf,
    pub flows_location: PathBuf,
}

impl FlowmapPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            coord: dir.join(COORD_FILE),
            locations: dir.join(LOCATIONS_FILE),
            flows: dir.join(FLOWS_FILE),
            flows_location: dir.join(FLOWS_LOCATION_FILE),
        }
    }
}

/// Loads cached coordinates, or geocodes every origin province and caches them.
pub async fn province_coordinates<G: Geocoder>(
    dataset: &ProvinceFlowDataset,
    coord_path: &Path,
    geocoder: &G,
) -> Result<Vec<CoordRecord>> {
    if coord_path.exists() {
        return output::read_table(coord_path);
    }

    let names: BTreeSet<&str> = dataset
        .records
        .iter()
        .filter_map(|r| r.origin_name.as_deref())
        .collect();

    info!(provinces = names.len(), "Geocoding provinces");
    let mut coords = Vec::with_capacity(names.len());
    for name in names {
        let Coordinates { lat, lon } = geocoder.locate(name).await?;
        coords.push(CoordRecord {
            name: name.to_string(),
            lat,
            lon,
        });
    }

    output::write_table(coord_path, &["name", "lat", "lon"], &coords)?;
    Ok(coords)
}

/// Distinct origin (name, id) pairs that have coordinates, ordered by name then id.
pub fn locations(dataset: &ProvinceFlowDataset, coords: &[CoordRecord]) -> Vec<LocationRecord> {
    let by_name: HashMap<&str, &CoordRecord> = coords.iter().map(|c| (c.name.as_str(), c)).collect();

    let pairs: BTreeSet<(&str, &str)> = dataset
        .records
        .iter()
        .filter_map(|r| r.origin_name.as_deref().map(|n| (n, r.origin.as_str())))
        .collect();

    pairs
        .into_iter()
        .filter_map(|(name, id)| {
            by_name.get(name).map(|c| LocationRecord {
                id: id.to_string(),
                name: name.to_string(),
                lat: c.lat,
                lon: c.lon,
            })
        })
        .collect()
}

pub fn flows(dataset: &ProvinceFlowDataset) -> Vec<FlowRecord> {
    dataset
        .records
        .iter()
        .map(|r| FlowRecord {
            time: r.date,
            origin: r.origin.clone(),
            dest: r.destination.clone(),
            count: r.flux,
        })
        .collect()
}

/// Flows whose both ends have a location, with names and coordinates attached.
pub fn flows_with_locations(flows: &[FlowRecord], locations: &[LocationRecord]) -> Vec<FlowLocationRecord> {
    let mut by_id: HashMap<&str, &LocationRecord> = HashMap::new();
    for loc in locations {
        by_id.entry(loc.id.as_str()).or_insert(loc);
    }

    flows
        .iter()
        .filter_map(|f| {
            let orig = by_id.get(f.origin.as_str())?;
            let dest = by_id.get(f.dest.as_str())?;
            Some(FlowLocationRecord {
                time: f.time,
                origin: f.origin.clone(),
                dest: f.dest.clone(),
                count: f.count,
                origin_name: orig.name.clone(),
                orig_lat: orig.lat,
                orig_lon: orig.lon,
                dest_name: dest.name.clone(),
                dest_lat: dest.lat,
                dest_lon: dest.lon,
            })
        })
        .collect()
}

/// Writes every flow-map table from the dataset at `dataset_path`.
#[tracing::instrument(skip_all, fields(dataset = %dataset_path.display()))]
pub async fn generate_flowmap<G: Geocoder>(
    dataset_path: &Path,
    paths: &FlowmapPaths,
    geocoder: &G,
) -> Result<FlowmapSummary> {
    let dataset = ProvinceFlowDataset::load(dataset_path)?;
    let coords = province_coordinates(&dataset, &paths.coord, geocoder).await?;

    let locations = locations(&dataset, &coords);
    output::write_table(&paths.locations, &["id", "name", "lat", "lon"], &locations)?;

    let flows = flows(&dataset);
    output::write_table(&paths.flows, &["time", "origin", "dest", "count"], &flows)?;

    let joined = flows_with_locations(&flows, &locations);
    output::write_table(
        &paths.flows_location,
        &[
            "time",
            "origin",
            "dest",
            "count",
            "origin_name",
            "orig_lat",
            "orig_lon",
            "dest_name",
            "dest_lat",
            "dest_lon",
        ],
        &joined,
    )?;

    let summary = FlowmapSummary {
        locations: locations.len(),
        flows: flows.len(),
        flows_with_location: joined.len(),
    };
    info!(?summary, "Flow-map tables written");
    Ok(summary)
}
