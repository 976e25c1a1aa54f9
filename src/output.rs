//! Persistence of the `;`-separated Latin-1 tables read by the
//! visualization layer.
//!
//! Writes go to a hidden sibling file that is synced and renamed over the
//! destination, so a crash never leaves a truncated table behind.

use csv::{ReaderBuilder, WriterBuilder};
use serde::Serializer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::{FluxError, Result};
use crate::latin1;

pub const DELIMITER: u8 = b';';

/// Replaces `path` with `bytes` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("file"),
        std::process::id()
    ));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Serializes `rows` under `headers` and atomically writes them as Latin-1.
///
/// The header line is written even when `rows` is empty.
pub fn write_table<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(headers)
        .map_err(|e| FluxError::dataset(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| FluxError::dataset(path, e))?;
    }
    let buf = writer
        .into_inner()
        .map_err(|e| FluxError::dataset(path, e.error()))?;

    // The csv writer only ever sees valid UTF-8 coming from `String` fields.
    let text = String::from_utf8_lossy(&buf);
    write_atomic(path, &latin1::encode(&text))?;

    debug!(path = %path.display(), rows = rows.len(), "Table written");
    Ok(())
}

/// Reads a `;`-separated Latin-1 table, mapping columns by header name.
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = std::fs::read(path)?;
    let text = latin1::decode(&bytes);

    let mut rdr = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.map_err(|e| FluxError::dataset(path, e))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Writes a number without a trailing `.0` when it is integral.
pub fn number<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Like [`number`], leaving the field blank for `None`.
pub fn optional_number<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_str(""),
    }
}
