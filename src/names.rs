//! Province code to name lookup.
//!
//! The INE province table is loaded once per run and shared read-only by
//! every stage. It is read straight from the INE spreadsheet (`.xls`,
//! `.xlsx` or `.ods`, first sheet) or from a `;`-separated Latin-1 `.csv`
//! export. The header row holds `Codigo` and `Literal`; when those headers
//! are absent the first two columns of the first row are used.

use calamine::{Reader, open_workbook_auto};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{FluxError, Result};
use crate::latin1;

const CODE_HEADER: &str = "codigo";
const NAME_HEADER: &str = "literal";

#[derive(Debug, Clone, Default)]
pub struct ProvinceCodeMap {
    names: HashMap<String, String>,
}

impl ProvinceCodeMap {
    /// Loads the table at `path`, picking the reader from its extension.
    /// Numeric codes are zero-padded to `code_width` so that `1` and `01`
    /// resolve alike.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path, code_width: usize) -> Result<Self> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

        let rows = if is_csv {
            let bytes = std::fs::read(path).map_err(|e| code_map_error(path, e))?;
            csv_rows(&latin1::decode(&bytes)).map_err(|e| code_map_error(path, e))?
        } else {
            sheet_rows(path).map_err(|e| code_map_error(path, e))?
        };
        let map = Self::from_rows(rows, code_width).map_err(|e| code_map_error(path, e))?;
        info!(provinces = map.len(), "Province code table loaded");
        Ok(map)
    }

    #[cfg(test)]
    fn from_text(text: &str, code_width: usize) -> std::result::Result<Self, String> {
        Self::from_rows(csv_rows(text)?, code_width)
    }

    fn from_rows(rows: Vec<Vec<String>>, code_width: usize) -> std::result::Result<Self, String> {
        let position = |row: &[String], wanted: &str| row.iter().position(|h| h.trim().eq_ignore_ascii_case(wanted));

        // Spreadsheets may carry a title above the header row.
        let located = rows.iter().enumerate().find_map(|(idx, row)| {
            match (position(row, CODE_HEADER), position(row, NAME_HEADER)) {
                (Some(c), Some(n)) => Some((idx, c, n)),
                _ => None,
            }
        });
        let (header_idx, code_col, name_col) = match located {
            Some(found) => found,
            None if rows.first().is_some_and(|r| r.len() >= 2) => (0, 0, 1),
            None => return Err("expected at least two columns (code, name)".to_string()),
        };

        let mut names = HashMap::new();
        for row in rows.iter().skip(header_idx + 1) {
            let (Some(code), Some(name)) = (row.get(code_col), row.get(name_col)) else {
                continue;
            };
            let (code, name) = (code.trim(), name.trim());
            if code.is_empty() || name.is_empty() {
                debug!(code, name, "Skipping incomplete province entry");
                continue;
            }
            names.insert(normalize_code(code, code_width), name.to_string());
        }

        Ok(Self { names })
    }

    pub fn from_pairs<I, C, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(c, n)| (c.into(), n.into()))
                .collect(),
        }
    }

    /// Name for `code`, or `None` when the table does not know it.
    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn csv_rows(text: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    rdr.records()
        .map(|r| {
            r.map(|record| record.iter().map(str::to_string).collect())
                .map_err(|e| e.to_string())
        })
        .collect()
}

/// Cells of the first sheet, rendered as text. Whole-number codes stored as
/// floats come out without a fractional part.
fn sheet_rows(path: &Path) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| e.to_string())?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no sheets".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect())
}

fn code_map_error(path: &Path, err: impl ToString) -> FluxError {
    FluxError::CodeMap {
        path: PathBuf::from(path),
        reason: err.to_string(),
    }
}

fn normalize_code(code: &str, width: usize) -> String {
    if code.bytes().all(|b| b.is_ascii_digit()) && code.len() < width {
        format!("{code:0>width$}")
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_ine_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20_cod_prov.csv");
        std::fs::write(&path, b"Codigo;Literal\n02;Albacete\n11;C\xe1diz\n28;Madrid\n").unwrap();

        let map = ProvinceCodeMap::load(&path, 2).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.name_of("11"), Some("Cádiz"));
        assert_eq!(map.name_of("28"), Some("Madrid"));
    }

    #[test]
    fn test_load_ine_spreadsheet() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/20_cod_prov.xlsx");

        let map = ProvinceCodeMap::load(&path, 2).unwrap();

        assert_eq!(map.len(), 4);
        assert_eq!(map.name_of("02"), Some("Albacete"));
        assert_eq!(map.name_of("11"), Some("Cádiz"));
        assert_eq!(map.name_of("46"), Some("Valencia/València"));
    }

    #[test]
    fn test_header_below_title_row() {
        let map = ProvinceCodeMap::from_text("Provincias;\nCodigo;Literal\n28;Madrid\n", 2).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.name_of("28"), Some("Madrid"));
    }

    #[test]
    fn test_unreadable_spreadsheet_is_code_map_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20_cod_prov.xls");
        std::fs::write(&path, b"not a workbook").unwrap();

        let err = ProvinceCodeMap::load(&path, 2).unwrap_err();
        assert!(matches!(err, FluxError::CodeMap { .. }));
    }

    #[test]
    fn test_unknown_code_is_unresolved() {
        let map = ProvinceCodeMap::from_pairs([("28", "Madrid")]);
        assert_eq!(map.name_of("99"), None);
    }

    #[test]
    fn test_codes_are_zero_padded() {
        let map = ProvinceCodeMap::from_text("Codigo;Literal\n1;Araba/Álava\n", 2).unwrap();
        assert_eq!(map.name_of("01"), Some("Araba/Álava"));
    }

    #[test]
    fn test_falls_back_to_first_two_columns() {
        let map = ProvinceCodeMap::from_text("CPRO;NOMBRE;EXTRA\n46;Valencia/València;x\n", 2).unwrap();
        assert_eq!(map.name_of("46"), Some("Valencia/València"));
    }

    #[test]
    fn test_headers_found_in_any_order() {
        let map = ProvinceCodeMap::from_text("Literal;Codigo\nMadrid;28\n", 2).unwrap();
        assert_eq!(map.name_of("28"), Some("Madrid"));
    }

    #[test]
    fn test_single_column_is_rejected() {
        assert!(ProvinceCodeMap::from_text("Codigo\n28\n", 2).is_err());
    }

    #[test]
    fn test_missing_file_is_code_map_error() {
        let err = ProvinceCodeMap::load(Path::new("/nonexistent/20_cod_prov.xls"), 2).unwrap_err();
        assert!(matches!(err, FluxError::CodeMap { .. }));
    }
}
