//! Day-file downloader for the MITMA open mobility data portal.
//!
//! Walks a date range, fetching each day-file that is not stored yet, and
//! afterwards repairs the one day the provider is known to have published
//! broken.

use chrono::{Local, NaiveDate};
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::aggregate::COL_DATE;
use crate::config::{Location, MaestraVersion, PipelineConfig};
use crate::error::{FluxError, Result};
use crate::fetch::{Fetched, HttpClient, fetch_with_retry};
use crate::output::write_atomic;
use crate::store::{RawFileStore, day_file_name};

pub const BASE_URL: &str = "https://opendata-movilidad.mitma.es";

/// First day published by the provider.
pub const FIRST_DAY: (i32, u32, u32) = (2020, 2, 21);
/// Last day of the original publication window.
pub const LAST_DAY: (i32, u32, u32) = (2021, 5, 9);

/// The 2020-07-12 file is published corrupt; 2020-07-05 (same weekday) stands in.
const REPAIR_SOURCE: (i32, u32, u32) = (2020, 7, 5);
const REPAIR_TARGET: (i32, u32, u32) = (2020, 7, 12);

fn ymd((y, m, d): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub base_url: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Continue from the newest stored day up to today instead of `start..=end`.
    pub update: bool,
    /// Re-download files that are already stored.
    pub force: bool,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            start: ymd(FIRST_DAY),
            end: ymd(LAST_DAY),
            update: false,
            force: false,
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

pub fn day_url(base_url: &str, maestra: MaestraVersion, location: Location, date: NaiveDate) -> String {
    format!(
        "{}/{}-mitma-{}/ficheros-diarios/{}/{}",
        base_url.trim_end_matches('/'),
        maestra,
        location,
        date.format("%Y-%m"),
        day_file_name(date, maestra, location)
    )
}

/// Inclusive list of days between `start` and `end`; empty if `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Downloads missing day-files and returns the paths written in this call.
#[tracing::instrument(skip_all, fields(maestra = %config.maestra, location = %config.location, update = opts.update))]
pub async fn download<C: HttpClient>(
    client: &C,
    config: &PipelineConfig,
    opts: &DownloadOptions,
) -> Result<Vec<PathBuf>> {
    let store = RawFileStore::new(config.raw_dir(), config.maestra, config.location);
    std::fs::create_dir_all(store.dir())?;

    let (start, end) = if opts.update {
        match store.latest_date()? {
            Some(latest) => (
                latest.succ_opt().unwrap_or(latest),
                Local::now().date_naive(),
            ),
            None => {
                warn!("No stored day-files to update from, downloading the full range");
                (opts.start, opts.end)
            }
        }
    } else {
        (opts.start, opts.end)
    };

    let dates = date_range(start, end);
    if dates.is_empty() {
        info!("Already up-to-date");
        return Ok(Vec::new());
    }

    info!(start = %start, end = %end, days = dates.len(), "Downloading files");
    let mut written = Vec::new();

    for date in dates {
        let path = store.path_for(date);
        if path.exists() && !opts.force {
            debug!(file = %path.display(), "Already downloaded, not overwriting");
            continue;
        }

        let url = day_url(&opts.base_url, config.maestra, config.location, date);
        match fetch_with_retry(client, &url, opts.attempts, opts.backoff).await {
            Ok(Fetched::Found(body)) => {
                write_atomic(&path, &body)?;
                debug!(file = %path.display(), bytes = body.len(), "Day-file saved");
                written.push(path);
            }
            Ok(Fetched::NotFound) => info!(date = %date, "Not available yet"),
            Err(e) => error!(url = %url, error = %e, "Download failed"),
        }
    }

    info!(downloaded = written.len(), "Download finished");

    if config.maestra == MaestraVersion::Maestra1 && config.location == Location::Municipios {
        repair_known_defects(&store)?;
    }

    Ok(written)
}

/// Regenerates the 2020-07-12 file from the 2020-07-05 one with its dates
/// rewritten. Returns `false` when the source day is not stored.
pub fn repair_known_defects(store: &RawFileStore) -> Result<bool> {
    let src = store.path_for(ymd(REPAIR_SOURCE));
    let dst = store.path_for(ymd(REPAIR_TARGET));
    if !src.exists() {
        debug!("No fixes needed, 2020-07-05 is not stored");
        return Ok(false);
    }

    let stamp = ymd(REPAIR_TARGET).format("%Y%m%d").to_string();
    let body = restamp_day_file(&src, stamp.as_bytes())?;
    write_atomic(&dst, &body)?;

    info!(src = %src.display(), dst = %dst.display(), "Replaced defective day-file");
    Ok(true)
}

/// Copy of the gzip table at `src` with every date field set to `stamp`.
fn restamp_day_file(src: &Path, stamp: &[u8]) -> Result<Vec<u8>> {
    let file = std::fs::File::open(src).map_err(|e| FluxError::parse(src, None, e))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(true)
        .from_reader(GzDecoder::new(file));

    let headers = rdr
        .byte_headers()
        .map_err(|e| FluxError::parse(src, Some(1), e))?
        .clone();
    let date_col = headers
        .iter()
        .position(|h| h.trim_ascii() == COL_DATE.as_bytes())
        .ok_or_else(|| FluxError::parse(src, Some(1), format!("missing column '{COL_DATE}'")))?;

    let mut wtr = WriterBuilder::new()
        .delimiter(b'|')
        .from_writer(GzEncoder::new(Vec::new(), Compression::default()));
    wtr.write_byte_record(&headers)
        .map_err(|e| FluxError::parse(src, None, e))?;

    let mut record = ByteRecord::new();
    while rdr
        .read_byte_record(&mut record)
        .map_err(|e| FluxError::parse(src, e.position().map(|p| p.line()), e))?
    {
        let restamped: ByteRecord = record
            .iter()
            .enumerate()
            .map(|(idx, field)| if idx == date_col { stamp } else { field })
            .collect();
        wtr.write_byte_record(&restamped)
            .map_err(|e| FluxError::parse(src, None, e))?;
    }

    let mut encoder = wtr
        .into_inner()
        .map_err(|e| FluxError::parse(src, None, e.error()))?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}
