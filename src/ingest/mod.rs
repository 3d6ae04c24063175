//! File ingestion
//!
//! Turns an uploaded file into a polars [`DataFrame`]. The parser is picked from
//! the file extension; anything that is not CSV or a spreadsheet is rejected up
//! front instead of being fed to the spreadsheet reader.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType as CellType, Reader};
use polars::prelude::*;
use tracing::{debug, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Cell texts read as missing values
const NA_TOKENS: &[&str] = &[
    "NA", "N/A", "n/a", "NULL", "null", "NaN", "nan", "-NaN", "-nan", "None", "#N/A", "<NA>",
];

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unsupported file type '{0}': upload a .csv or .xlsx file")]
    UnsupportedFormat(String),

    #[error("No columns to parse from file")]
    Empty,

    #[error("Error tokenizing CSV data: {0}")]
    Csv(#[from] PolarsError),

    #[error("Error reading spreadsheet: {0}")]
    Spreadsheet(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

impl FileKind {
    /// Pick the parser from the file name's extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(FileKind::Csv),
            "xlsx" | "xlsm" | "xls" => Ok(FileKind::Spreadsheet),
            _ => Err(IngestError::UnsupportedFormat(filename.to_string())),
        }
    }
}

/// Parse an uploaded file into a table
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<DataFrame, IngestError> {
    let kind = FileKind::from_filename(filename)?;
    debug!(filename, ?kind, size = bytes.len(), "Parsing upload");

    let frame = match kind {
        FileKind::Csv => parse_csv(bytes)?,
        FileKind::Spreadsheet => parse_spreadsheet(bytes)?,
    };

    let (rows, columns) = frame.shape();
    info!(filename, rows, columns, "Parsed upload");
    Ok(frame)
}

/// Read CSV with a header row, inferring dtypes from the whole file
pub fn parse_csv(bytes: &[u8]) -> Result<DataFrame, IngestError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(IngestError::Empty);
    }

    let null_values = NullValues::AllColumns(NA_TOKENS.iter().map(|t| t.to_string()).collect());
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(CsvParseOptions::default().with_null_values(Some(null_values)))
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()?;

    if frame.width() == 0 {
        return Err(IngestError::Empty);
    }
    Ok(frame)
}

/// Read the first worksheet; its first row holds the column names
pub fn parse_spreadsheet(bytes: &[u8]) -> Result<DataFrame, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IngestError::Spreadsheet(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| IngestError::Spreadsheet("workbook has no worksheets".to_string()))?
        .map_err(|e| IngestError::Spreadsheet(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(cell_string).map(Option::unwrap_or_default).collect(),
        None => return Err(IngestError::Empty),
    };
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::Empty);
    }

    let body: Vec<&[Data]> = rows.collect();
    let columns: Vec<Series> = unique_headers(headers)
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells: Vec<Option<&Data>> = body
                .iter()
                .map(|row| row.get(idx).filter(|cell| !is_blank(cell)))
                .collect();
            column_series(name, &cells)
        })
        .collect();

    DataFrame::new(columns).map_err(|e| IngestError::Spreadsheet(e.to_string()))
}

/// Empty names become `Unnamed: <index>`, repeats get a `.1`, `.2`, ... suffix
fn unique_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(headers.len());
    for (idx, header) in headers.into_iter().enumerate() {
        let base = if header.trim().is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            header
        };
        let mut name = base.clone();
        let mut n = 0;
        while seen.contains(&name) {
            n += 1;
            name = format!("{}.{}", base, n);
        }
        seen.push(name);
    }
    seen
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty | Data::Error(_) => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn whole_number(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(i) => Some(*i),
        // Spreadsheets store whole numbers as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
        _ => None,
    }
}

fn number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Int(i) => Some(*i as f64),
        Data::Float(f) => Some(*f),
        _ => None,
    }
}

fn cell_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::DateTime(_) => cell.as_datetime().map(|dt| dt.to_string()),
        other => Some(other.to_string()),
    }
}

/// Build one typed series: int64 when every cell is a whole number, then
/// float64, then boolean; anything mixed is kept as text.
fn column_series(name: &str, cells: &[Option<&Data>]) -> Series {
    let present: Vec<&Data> = cells.iter().flatten().copied().collect();

    if present.iter().all(|c| whole_number(c).is_some()) && !present.is_empty() {
        let values: Vec<Option<i64>> = cells.iter().map(|c| c.and_then(whole_number)).collect();
        return Series::new(name, values);
    }
    if present.iter().all(|c| number(c).is_some()) {
        let values: Vec<Option<f64>> = cells.iter().map(|c| c.and_then(number)).collect();
        return Series::new(name, values);
    }
    if present.iter().all(|c| matches!(c, Data::Bool(_))) {
        let values: Vec<Option<bool>> = cells
            .iter()
            .map(|c| match c {
                Some(Data::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        return Series::new(name, values);
    }
    let values: Vec<Option<String>> = cells.iter().map(|c| c.and_then(cell_string)).collect();
    Series::new(name, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::text_rows;

    const SALES_XLSX: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/sales.xlsx"));

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_filename("data.csv").unwrap(), FileKind::Csv);
        assert_eq!(FileKind::from_filename("DATA.CSV").unwrap(), FileKind::Csv);
        assert_eq!(FileKind::from_filename("book.xlsx").unwrap(), FileKind::Spreadsheet);
        assert!(matches!(
            FileKind::from_filename("notes.txt"),
            Err(IngestError::UnsupportedFormat(name)) if name == "notes.txt"
        ));
        assert!(FileKind::from_filename("no_extension").is_err());
    }

    #[test]
    fn test_parse_csv() {
        let csv = b"city,population,area\nParis,2161000,105.4\nRome,2873000,1285\n";
        let df = parse_upload("cities.csv", csv).unwrap();
        assert_eq!(df.shape(), (2, 3));
        assert_eq!(df.get_column_names(), vec!["city", "population", "area"]);
        assert_eq!(df.column("population").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("area").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_parse_csv_na_tokens_and_bom() {
        let csv = "\u{feff}name,score\n\"Smith, J\",NA\nLee,4\n";
        let df = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(df.get_column_names(), vec!["name", "score"]);
        assert_eq!(df.column("score").unwrap().null_count(), 1);
        assert_eq!(df.column("score").unwrap().dtype(), &DataType::Int64);
        assert_eq!(text_rows(&df)[0][0], "Smith, J");
    }

    #[test]
    fn test_header_only_csv_has_no_rows() {
        let df = parse_csv(b"a,b\n").unwrap();
        assert_eq!(df.shape(), (0, 2));
    }

    #[test]
    fn test_empty_csv_is_rejected() {
        assert!(matches!(parse_csv(b""), Err(IngestError::Empty)));
        assert!(matches!(parse_csv(b"\xEF\xBB\xBF \n"), Err(IngestError::Empty)));
    }

    #[test]
    fn test_ragged_csv_is_rejected() {
        let err = parse_csv(b"a,b\n1,2\n3,4,5\n").unwrap_err();
        assert!(matches!(err, IngestError::Csv(_)));
        assert!(err.to_string().starts_with("Error tokenizing CSV data"));
    }

    #[test]
    fn test_parse_workbook() {
        let df = parse_upload("sales.xlsx", SALES_XLSX).unwrap();
        assert_eq!(df.shape(), (3, 5));
        assert_eq!(
            df.get_column_names(),
            vec!["region", "units", "price", "in_stock", "shipped"]
        );
        assert_eq!(df.column("units").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("price").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("in_stock").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(df.column("shipped").unwrap().dtype(), &DataType::String);

        let rows = text_rows(&df);
        assert_eq!(rows[0], vec!["north", "10", "1.5", "true", "2024-01-15 00:00:00"]);
        assert_eq!(rows[2][4], "null");
    }

    #[test]
    fn test_corrupt_spreadsheet_is_rejected() {
        let err = parse_upload("broken.xlsx", b"definitely not a zip archive").unwrap_err();
        assert!(matches!(err, IngestError::Spreadsheet(_)));
        assert!(err.to_string().starts_with("Error reading spreadsheet"));
    }

    #[test]
    fn test_unique_headers() {
        let names = unique_headers(vec!["a".into(), "".into(), "a".into(), "a".into()]);
        assert_eq!(names, vec!["a", "Unnamed: 1", "a.1", "a.2"]);
    }

    #[test]
    fn test_column_series_types() {
        let whole = Data::Float(3.0);
        let half = Data::Float(2.5);
        let text = Data::String("x".into());

        let s = column_series("n", &[Some(&whole), None]);
        assert_eq!(s.dtype(), &DataType::Int64);
        let s = column_series("f", &[Some(&whole), Some(&half)]);
        assert_eq!(s.dtype(), &DataType::Float64);
        let s = column_series("t", &[Some(&whole), Some(&text)]);
        assert_eq!(s.dtype(), &DataType::String);
        assert_eq!(s.null_count(), 0);
    }
}
