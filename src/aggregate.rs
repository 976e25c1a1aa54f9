//! Aggregation of one raw day-file to province level.
//!
//! A day-file is a gzip-compressed, pipe-separated Latin-1 table with one row
//! per (hour, origin zone, destination zone, activity, distance band). Zones
//! are truncated to their province prefix and trips are summed per
//! (date, origin province, destination province).

use chrono::NaiveDate;
use csv::{ByteRecord, ReaderBuilder};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::error::{FluxError, Result};
use crate::latin1;
use crate::store::DayFile;

pub const COL_DATE: &str = "fecha";
pub const COL_ORIGIN: &str = "origen";
pub const COL_DESTINATION: &str = "destino";
pub const COL_PERIOD: &str = "periodo";
pub const COL_TRIPS: &str = "viajes";
pub const COL_TRIP_KM: &str = "viajes_km";

/// Trips between two provinces on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvinceDayRecord {
    pub date: NaiveDate,
    pub origin: String,
    pub destination: String,
    pub trips: f64,
}

/// Positions of the columns the aggregation reads.
struct Columns {
    date: usize,
    origin: usize,
    destination: usize,
    trips: usize,
}

impl Columns {
    fn locate(headers: &ByteRecord) -> std::result::Result<Self, String> {
        let names: Vec<String> = headers
            .iter()
            .map(|h| latin1::decode(h).trim().to_string())
            .collect();
        let find = |name: &str| {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| format!("missing column '{name}'"))
        };

        // Not aggregated, but their absence means the file is not a MITMA table.
        find(COL_PERIOD)?;
        find(COL_TRIP_KM)?;

        Ok(Self {
            date: find(COL_DATE)?,
            origin: find(COL_ORIGIN)?,
            destination: find(COL_DESTINATION)?,
            trips: find(COL_TRIPS)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DayAggregator {
    province_digits: usize,
}

impl DayAggregator {
    pub fn new(province_digits: usize) -> Self {
        Self { province_digits }
    }

    /// Leading `province_digits` characters of a zone id.
    pub fn province_of<'a>(&self, zone: &'a str) -> &'a str {
        match zone.char_indices().nth(self.province_digits) {
            Some((idx, _)) => &zone[..idx],
            None => zone,
        }
    }

    /// Province of a zone id, rejecting ids too short to contain one.
    fn province_code(&self, zone: &str, path: &Path, line: Option<u64>) -> Result<String> {
        if zone.chars().count() < self.province_digits {
            return Err(FluxError::parse(path, line, format!("zone id '{zone}' is shorter than a province code")));
        }
        Ok(self.province_of(zone).to_string())
    }

    /// Aggregates one day-file.
    #[tracing::instrument(skip(self, day), fields(file = %day.file_name()))]
    pub fn aggregate_file(&self, day: &DayFile) -> Result<Vec<ProvinceDayRecord>> {
        let file = File::open(&day.path).map_err(|e| FluxError::parse(&day.path, None, e))?;
        let records = self.aggregate_reader(&day.path, GzDecoder::new(BufReader::new(file)))?;
        debug!(rows = records.len(), "Day-file aggregated");
        Ok(records)
    }

    /// Aggregates an already decompressed table; `path` only labels errors.
    pub fn aggregate_reader<R: Read>(&self, path: &Path, reader: R) -> Result<Vec<ProvinceDayRecord>> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(true)
            .from_reader(reader);

        let headers = rdr
            .byte_headers()
            .map_err(|e| FluxError::parse(path, Some(1), e))?
            .clone();
        if headers.is_empty() {
            return Err(FluxError::parse(path, Some(1), "empty table"));
        }
        let cols = Columns::locate(&headers).map_err(|e| FluxError::parse(path, Some(1), e))?;

        let mut sums: BTreeMap<(NaiveDate, String, String), f64> = BTreeMap::new();
        let mut record = ByteRecord::new();
        let mut last_stamp: Vec<u8> = Vec::new();
        let mut last_date: Option<NaiveDate> = None;

        loop {
            let has_row = rdr
                .read_byte_record(&mut record)
                .map_err(|e| FluxError::parse(path, e.position().map(|p| p.line()), e))?;
            if !has_row {
                break;
            }
            let line = record.position().map(|p| p.line());
            let field = |idx: usize| {
                record
                    .get(idx)
                    .ok_or_else(|| FluxError::parse(path, line, format!("row has no column {idx}")))
            };

            let stamp = field(cols.date)?;
            let date = match last_date {
                Some(d) if stamp == last_stamp.as_slice() => d,
                _ => {
                    let d = parse_date(stamp)
                        .ok_or_else(|| FluxError::parse(path, line, format!("invalid date '{}'", latin1::decode(stamp))))?;
                    last_stamp = stamp.to_vec();
                    last_date = Some(d);
                    d
                }
            };

            let origin = latin1::decode(field(cols.origin)?);
            let destination = latin1::decode(field(cols.destination)?);
            let raw_trips = field(cols.trips)?;
            let trips = parse_trips(&latin1::decode(raw_trips)).ok_or_else(|| {
                FluxError::parse(path, line, format!("invalid trip count '{}'", latin1::decode(raw_trips)))
            })?;

            let key = (
                date,
                self.province_code(origin.trim(), path, line)?,
                self.province_code(destination.trim(), path, line)?,
            );
            *sums.entry(key).or_insert(0.0) += trips;
        }

        Ok(sums
            .into_iter()
            .map(|((date, origin, destination), trips)| ProvinceDayRecord {
                date,
                origin,
                destination,
                trips,
            })
            .collect())
    }
}

/// Parses an 8-digit `YYYYMMDD` field.
fn parse_date(field: &[u8]) -> Option<NaiveDate> {
    let field = field.trim_ascii();
    if field.len() != 8 || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    NaiveDate::parse_from_str(std::str::from_utf8(field).ok()?, "%Y%m%d").ok()
}

/// Parses a count written with `.` as thousands separator and an optional
/// `,` decimal part, e.g. `1.234` or `1.234,5`.
pub fn parse_trips(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let normalized: String = text
        .chars()
        .filter(|&c| c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const HEADER: &str = "fecha|origen|destino|actividad_origen|actividad_destino|residencia|edad|periodo|distancia|viajes|viajes_km";

    fn table(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        s.push('\n');
        for r in rows {
            s.push_str(r);
            s.push('\n');
        }
        s
    }

    fn aggregate(text: &str) -> Result<Vec<ProvinceDayRecord>> {
        DayAggregator::new(2).aggregate_reader(Path::new("test.txt.gz"), text.as_bytes())
    }

    fn write_gz(path: &Path, text: &str) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        std::fs::write(path, encoder.finish().unwrap()).unwrap();
    }

    #[test]
    fn test_parse_trips_thousands_separator() {
        assert_eq!(parse_trips("50"), Some(50.0));
        assert_eq!(parse_trips("1.234"), Some(1234.0));
        assert_eq!(parse_trips("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_trips("12,5"), Some(12.5));
        assert_eq!(parse_trips(" 7 "), Some(7.0));
        assert_eq!(parse_trips(""), None);
        assert_eq!(parse_trips("abc"), None);
    }

    #[test]
    fn test_province_of_truncates() {
        let agg = DayAggregator::new(2);
        assert_eq!(agg.province_of("28079"), "28");
        assert_eq!(agg.province_of("2807"), "28");
        assert_eq!(agg.province_of("4601"), "46");
        assert_eq!(agg.province_of("0"), "0");
        assert_eq!(agg.province_of("28079"), agg.province_of("28079"));
    }

    #[test]
    fn test_sums_across_periods_and_distances() {
        let text = table(&[
            "20200221|28079|28079|casa|trabajo|28|NA|07|002-005|1.200|5.000",
            "20200221|28006|28148|casa|otros|28|NA|08|005-010|300|2.100",
            "20200221|28079|46250|casa|otros|28|NA|09|>100|25,5|3.000",
            "20200221|28079|46015|otros|casa|28|NA|21|>100|4,5|900",
        ]);

        let records = aggregate(&text).unwrap();

        let d = NaiveDate::from_ymd_opt(2020, 2, 21).unwrap();
        assert_eq!(
            records,
            vec![
                ProvinceDayRecord { date: d, origin: "28".into(), destination: "28".into(), trips: 1500.0 },
                ProvinceDayRecord { date: d, origin: "28".into(), destination: "46".into(), trips: 30.0 },
            ]
        );
    }

    #[test]
    fn test_aggregation_is_repeatable() {
        let text = table(&[
            "20200221|01001|01002|casa|otros|01|NA|00|002-005|10|20",
            "20200221|01001|48001|casa|otros|01|NA|01|002-005|3|20",
        ]);
        assert_eq!(aggregate(&text).unwrap(), aggregate(&text).unwrap());
    }

    #[test]
    fn test_header_only_table_is_empty() {
        assert!(aggregate(&table(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        let text = "fecha|origen|destino|viajes\n20200221|28|28|1\n";
        let err = aggregate(text).unwrap_err();
        assert!(matches!(err, FluxError::Parse { .. }));
        assert!(err.to_string().contains("periodo"));
    }

    #[test]
    fn test_bad_trip_count_reports_line() {
        let text = table(&[
            "20200221|28079|28079|casa|otros|28|NA|00|002-005|10|20",
            "20200221|28079|28079|casa|otros|28|NA|01|002-005|diez|20",
        ]);
        match aggregate(&text).unwrap_err() {
            FluxError::Parse { line, reason, .. } => {
                assert_eq!(line, Some(3));
                assert!(reason.contains("diez"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_zone_id_is_parse_error() {
        let err = aggregate(&table(&[
            "20200221|2807|4601|casa|otros|28|NA|00|002-005|10|20",
            "20200221||4601|casa|otros|28|NA|00|002-005|10|20",
        ]))
        .unwrap_err();
        match err {
            FluxError::Parse { line, reason, .. } => {
                assert_eq!(line, Some(3));
                assert!(reason.contains("zone id"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(aggregate(&table(&["20200221|2807|4|casa|otros|28|NA|00|002-005|10|20"])).is_err());
    }

    #[test]
    fn test_bad_date_is_parse_error() {
        let text = table(&["2020-02-21|28079|28079|casa|otros|28|NA|00|002-005|10|20"]);
        assert!(matches!(aggregate(&text), Err(FluxError::Parse { .. })));
    }

    #[test]
    fn test_ragged_row_is_parse_error() {
        let text = table(&["20200221|28079|28079"]);
        assert!(matches!(aggregate(&text), Err(FluxError::Parse { .. })));
    }

    #[test]
    fn test_aggregate_file_reads_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20200221_maestra_1_mitma_municipio.txt.gz");
        write_gz(&path, &table(&["20200221|2807|4601|casa|otros|28|NA|00|002-005|50|100"]));

        let day = DayFile::from_path(&path).unwrap();
        let records = DayAggregator::new(2).aggregate_file(&day).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, "28");
        assert_eq!(records[0].destination, "46");
        assert_eq!(records[0].trips, 50.0);
    }

    #[test]
    fn test_corrupt_gzip_is_parse_error_naming_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20200221_maestra_1_mitma_municipio.txt.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let day = DayFile::from_path(&path).unwrap();
        let err = DayAggregator::new(2).aggregate_file(&day).unwrap_err();

        assert!(matches!(err, FluxError::Parse { .. }));
        assert!(err.to_string().contains("20200221_maestra_1_mitma_municipio.txt.gz"));
    }
}
