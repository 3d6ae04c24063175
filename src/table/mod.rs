//! Helpers over polars data frames
//!
//! Uploaded files are held as a [`polars::prelude::DataFrame`]. This module
//! resolves the column names the model asks for and renders frames and cells
//! as plain text for previews and agent observations.

pub mod render;

use polars::prelude::*;

use render::render_table;

/// Name of the temporary row-number column added before filtering or sorting
pub const ROW_INDEX: &str = "__row_nr__";

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Column '{name}' not found. Available columns: {available}")]
    ColumnNotFound { name: String, available: String },

    #[error("Column '{column}' is not numeric (dtype {dtype})")]
    NotNumeric { column: String, dtype: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Look a column up by exact name, then case-insensitively
pub fn resolve_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series, TableError> {
    let columns = df.get_columns();
    columns
        .iter()
        .find(|s| s.name() == name)
        .or_else(|| columns.iter().find(|s| s.name().eq_ignore_ascii_case(name)))
        .ok_or_else(|| TableError::ColumnNotFound {
            name: name.to_string(),
            available: df.get_column_names().join(", "),
        })
}

pub fn ensure_numeric(series: &Series) -> Result<(), TableError> {
    let dtype = series.dtype();
    if dtype.is_numeric() || dtype == &DataType::Boolean {
        Ok(())
    } else {
        Err(TableError::NotNumeric {
            column: series.name().to_string(),
            dtype: dtype.to_string(),
        })
    }
}

/// Column names with their dtypes
pub fn schema(df: &DataFrame) -> Vec<(String, String)> {
    df.get_columns()
        .iter()
        .map(|s| (s.name().to_string(), s.dtype().to_string()))
        .collect()
}

/// Render a float with one decimal when integral, otherwise up to six decimals
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        let s = format!("{:.6}", v);
        let s = s.trim_end_matches('0');
        if s.ends_with('.') {
            format!("{}0", s)
        } else {
            s.to_string()
        }
    }
}

/// Plain text for one cell; strings are shown unquoted
pub fn cell_text(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => "null".to_string(),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        AnyValue::Float64(f) => format_float(*f),
        AnyValue::Float32(f) => format_float(*f as f64),
        other => other.to_string(),
    }
}

/// Every cell of the frame as text, row by row
pub fn text_rows(df: &DataFrame) -> Vec<Vec<String>> {
    let columns = df.get_columns();
    (0..df.height())
        .map(|row| {
            columns
                .iter()
                .map(|s| s.get(row).map(|v| cell_text(&v)).unwrap_or_default())
                .collect()
        })
        .collect()
}

pub fn render_frame(df: &DataFrame, labels: Option<&[usize]>) -> String {
    let headers: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    render_table(&headers, &text_rows(df), labels)
}

/// First `n` rows, labelled with their row numbers
pub fn render_head(df: &DataFrame, n: usize) -> String {
    let n = n.min(df.height());
    let labels: Vec<usize> = (0..n).collect();
    render_frame(&df.head(Some(n)), Some(&labels))
}

/// Last `n` rows, labelled with their row numbers
pub fn render_tail(df: &DataFrame, n: usize) -> String {
    let n = n.min(df.height());
    let labels: Vec<usize> = (df.height() - n..df.height()).collect();
    render_frame(&df.tail(Some(n)), Some(&labels))
}

/// Render a frame carrying a [`ROW_INDEX`] column, using it as row labels
pub fn render_indexed(df: &DataFrame) -> Result<String, TableError> {
    let index = df.column(ROW_INDEX)?.cast(&DataType::UInt64)?;
    let labels: Vec<usize> = index.u64()?.into_no_null_iter().map(|i| i as usize).collect();
    let body = df.drop(ROW_INDEX)?;
    Ok(render_frame(&body, Some(&labels)))
}
