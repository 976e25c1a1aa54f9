//! Run configuration.
//!
//! Every component receives the paths and knobs it needs from a
//! [`PipelineConfig`] built once at start-up.

use clap::ValueEnum;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default number of day-files aggregated concurrently.
pub const DEFAULT_WORKERS: usize = 4;

/// Number of leading zone-id characters that identify a province.
pub const DEFAULT_PROVINCE_DIGITS: usize = 2;

/// Release of the MITMA origin/destination tables ("maestra").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MaestraVersion {
    #[default]
    #[value(name = "maestra1")]
    Maestra1,
    #[value(name = "maestra2")]
    Maestra2,
}

impl MaestraVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaestraVersion::Maestra1 => "maestra1",
            MaestraVersion::Maestra2 => "maestra2",
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            MaestraVersion::Maestra1 => 1,
            MaestraVersion::Maestra2 => 2,
        }
    }
}

impl fmt::Display for MaestraVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity of the zones in the raw tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Location {
    #[default]
    #[value(name = "municipios")]
    Municipios,
    #[value(name = "distritos")]
    Distritos,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Municipios => "municipios",
            Location::Distritos => "distritos",
        }
    }

    /// Singular form used inside day-file names.
    pub fn singular(&self) -> &'static str {
        match self {
            Location::Municipios => "municipio",
            Location::Distritos => "distrito",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub maestra: MaestraVersion,
    pub location: Location,
    pub province_digits: usize,
    pub workers: usize,
    /// Append to the persisted dataset instead of rebuilding it.
    pub update: bool,
    /// Skip the continuity check in update mode.
    pub force: bool,
    pub code_map_path: PathBuf,
    pub output_path: PathBuf,
}

impl PipelineConfig {
    /// Builds the default layout rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let code_map_path = data_dir
            .join("raw")
            .join("codigos_ine")
            .join("20_cod_prov.xls");
        let output_path = data_dir.join("processed").join("province_flux.csv");

        Self {
            data_dir,
            maestra: MaestraVersion::default(),
            location: Location::default(),
            province_digits: DEFAULT_PROVINCE_DIGITS,
            workers: DEFAULT_WORKERS,
            update: false,
            force: false,
            code_map_path,
            output_path,
        }
    }

    pub fn with_source(mut self, maestra: MaestraVersion, location: Location) -> Self {
        self.maestra = maestra;
        self.location = location;
        self
    }

    pub fn with_update(mut self, update: bool, force: bool) -> Self {
        self.update = update;
        self.force = force;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn raw_root(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    /// Directory holding the day-files for the configured maestra/location.
    pub fn raw_dir(&self) -> PathBuf {
        self.raw_root()
            .join(self.maestra.as_str())
            .join(self.location.as_str())
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.output_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.data_dir.join("processed"))
    }
}
