//! Raw day-file storage.
//!
//! Day-files live in one directory per (maestra, location) pair and are named
//! `<YYYYMMDD>_maestra_<n>_mitma_<location>.txt.gz`. Only the leading date
//! matters for ordering.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{Location, MaestraVersion};
use crate::error::Result;

pub const DAY_FILE_SUFFIX: &str = ".txt.gz";

/// One raw compressed table of flow records for a single calendar date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DayFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl DayFile {
    /// Recognises a day-file by its name; returns `None` for anything else.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?;
        let date = date_from_file_name(name)?;
        Some(Self { date, path })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Extracts the date from `<YYYYMMDD>_<tag>.txt.gz`.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    if !name.ends_with(DAY_FILE_SUFFIX) {
        return None;
    }
    let stamp = name.get(..8)?;
    if !stamp.bytes().all(|b| b.is_ascii_digit()) || name.as_bytes().get(8) != Some(&b'_') {
        return None;
    }
    NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
}

/// Name the provider publishes a day-file under.
pub fn day_file_name(date: NaiveDate, maestra: MaestraVersion, location: Location) -> String {
    format!(
        "{}_maestra_{}_mitma_{}{}",
        date.format("%Y%m%d"),
        maestra.number(),
        location.singular(),
        DAY_FILE_SUFFIX
    )
}

#[derive(Debug, Clone)]
pub struct RawFileStore {
    dir: PathBuf,
    maestra: MaestraVersion,
    location: Location,
}

impl RawFileStore {
    pub fn new(dir: impl Into<PathBuf>, maestra: MaestraVersion, location: Location) -> Self {
        Self {
            dir: dir.into(),
            maestra,
            location,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists the stored day-files in ascending date order.
    ///
    /// A missing directory is an empty store.
    pub fn day_files(&self) -> Result<Vec<DayFile>> {
        if !self.dir.exists() {
            warn!(dir = %self.dir.display(), "Raw directory does not exist");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match DayFile::from_path(entry.path()) {
                Some(day) => files.push(day),
                None => debug!(path = %entry.path().display(), "Skipping non day-file entry"),
            }
        }

        files.sort();
        Ok(files)
    }

    /// Stored day-files dated strictly after `date`.
    pub fn day_files_after(&self, date: NaiveDate) -> Result<Vec<DayFile>> {
        Ok(self
            .day_files()?
            .into_iter()
            .filter(|f| f.date > date)
            .collect())
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(day_file_name(date, self.maestra, self.location))
    }

    pub fn latest_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.day_files()?.last().map(|f| f.date))
    }
}
