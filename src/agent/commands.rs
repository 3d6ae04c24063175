//! Structured analysis commands
//!
//! The model never runs code of its own. It emits JSON commands that this
//! executor evaluates against the bound table, read-only.

use std::sync::Arc;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::render::{render_pairs, render_table};
use crate::table::{
    cell_text, ensure_numeric, format_float, render_head, render_indexed, render_tail, resolve_column, schema,
    text_rows, TableError, ROW_INDEX,
};

const DEFAULT_HEAD_ROWS: usize = 5;
const DEFAULT_ROW_LIMIT: usize = 10;
const DEFAULT_LIST_LIMIT: usize = 50;
const DEFAULT_COUNTS_LIMIT: usize = 20;

const DESCRIBE_STATS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("JSON parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error(transparent)]
    Table(#[from] TableError),
}

impl From<PolarsError> for CommandError {
    fn from(err: PolarsError) -> Self {
        CommandError::Table(TableError::Polars(err))
    }
}

/// A single analysis step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// {"op": "shape"}
    Shape,
    /// {"op": "columns"}
    Columns,
    /// {"op": "dtypes"}
    Dtypes,
    /// {"op": "head", "n": 5}
    Head {
        #[serde(default)]
        n: Option<usize>,
    },
    /// {"op": "tail", "n": 5}
    Tail {
        #[serde(default)]
        n: Option<usize>,
    },
    /// {"op": "describe"} or {"op": "describe", "column": "age"}
    Describe {
        #[serde(default)]
        column: Option<String>,
    },
    /// {"op": "missing"}
    Missing,
    /// {"op": "unique", "column": "city"}
    Unique {
        column: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// {"op": "value_counts", "column": "city", "limit": 5}
    ValueCounts {
        column: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// {"op": "aggregate", "column": "price", "func": "mean"}
    Aggregate { column: String, func: AggFunc },
    /// {"op": "corr", "x": "height", "y": "weight"}
    Corr { x: String, y: String },
    /// {"op": "filter", "column": "age", "cmp": "gt", "value": 30}
    Filter {
        column: String,
        cmp: Comparison,
        value: serde_json::Value,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// {"op": "sort", "column": "price", "descending": true, "n": 5}
    Sort {
        column: String,
        #[serde(default)]
        descending: bool,
        #[serde(default)]
        n: Option<usize>,
    },
    /// {"op": "group_by", "by": "region", "column": "sales", "func": "sum"}
    GroupBy {
        by: String,
        column: String,
        func: AggFunc,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// {"op": "final", "answer": "There are 42 rows."}
    Final { answer: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Nunique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Median => "median",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Std => "std",
            AggFunc::Nunique => "nunique",
        }
    }
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Contains => "contains",
        }
    }
}

/// Result of command execution
#[derive(Debug, PartialEq)]
pub enum ExecutionResult {
    /// Observation to hand back to the model
    Continue { output: String },
    /// Final answer reached
    Final { answer: String },
}

/// Evaluates commands against one table
#[derive(Clone)]
pub struct CommandExecutor {
    frame: Arc<DataFrame>,
}

impl CommandExecutor {
    pub fn new(frame: Arc<DataFrame>) -> Self {
        Self { frame }
    }

    /// Execute a sequence of commands from JSON
    pub fn execute_json(&self, json: &str) -> Result<ExecutionResult, CommandError> {
        let commands = parse_commands(json)?;
        self.execute_commands(&commands)
    }

    /// Run commands in order; a `final` command ends the batch
    pub fn execute_commands(&self, commands: &[Command]) -> Result<ExecutionResult, CommandError> {
        if commands.is_empty() {
            return Err(CommandError::InvalidCommand("no commands given".to_string()));
        }
        let mut outputs = Vec::with_capacity(commands.len());
        for cmd in commands {
            match self.execute_one(cmd)? {
                ExecutionResult::Final { answer } => return Ok(ExecutionResult::Final { answer }),
                ExecutionResult::Continue { output } => outputs.push(output),
            }
        }
        Ok(ExecutionResult::Continue {
            output: outputs.join("\n\n"),
        })
    }

    pub fn execute_one(&self, cmd: &Command) -> Result<ExecutionResult, CommandError> {
        let df = self.frame.as_ref();
        let output = match cmd {
            Command::Final { answer } => {
                return Ok(ExecutionResult::Final {
                    answer: answer.trim().to_string(),
                })
            }
            Command::Shape => {
                let (rows, cols) = df.shape();
                format!("({}, {})", rows, cols)
            }
            Command::Columns => df.get_column_names().join(", "),
            Command::Dtypes => render_pairs(&schema(df)),
            Command::Head { n } => render_head(df, n.unwrap_or(DEFAULT_HEAD_ROWS)),
            Command::Tail { n } => render_tail(df, n.unwrap_or(DEFAULT_HEAD_ROWS)),
            Command::Describe { column } => self.describe(column.as_deref())?,
            Command::Missing => {
                let pairs: Vec<(String, String)> = df
                    .get_columns()
                    .iter()
                    .map(|s| (s.name().to_string(), s.null_count().to_string()))
                    .collect();
                render_pairs(&pairs)
            }
            Command::Unique { column, limit } => {
                let series = resolve_column(df, column)?;
                let unique = series.unique_stable()?;
                let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
                let shown: Vec<String> = (0..unique.len().min(limit))
                    .map(|i| unique.get(i).map(|v| cell_text(&v)))
                    .collect::<Result<_, _>>()?;
                let mut out = format!(
                    "{} unique values in '{}': [{}]",
                    unique.len(),
                    series.name(),
                    shown.join(", ")
                );
                if unique.len() > limit {
                    out.push_str(&format!(" (first {} shown)", limit));
                }
                out
            }
            Command::ValueCounts { column, limit } => {
                let series = resolve_column(df, column)?;
                let counts = value_counts(df, series.name())?;
                let limit = limit.unwrap_or(DEFAULT_COUNTS_LIMIT);
                format!("{}\n{}", series.name(), render_rows_as_pairs(&counts.head(Some(limit))))
            }
            Command::Aggregate { column, func } => {
                let series = resolve_column(df, column)?;
                check_aggregate(series, *func)?;
                let out = df
                    .clone()
                    .lazy()
                    .select([agg_expr(col(series.name()), *func).alias("value")])
                    .collect()?;
                format!("{}({}) = {}", func.name(), series.name(), scalar_text(&out, "value")?)
            }
            Command::Corr { x, y } => {
                let sx = resolve_column(df, x)?;
                let sy = resolve_column(df, y)?;
                match correlation(df, sx, sy)? {
                    Some(r) => format!(
                        "Pearson correlation between '{}' and '{}': {}",
                        sx.name(),
                        sy.name(),
                        format_float(r)
                    ),
                    None => format!(
                        "Correlation between '{}' and '{}' is undefined (fewer than two paired values or zero variance)",
                        sx.name(),
                        sy.name()
                    ),
                }
            }
            Command::Filter {
                column,
                cmp,
                value,
                limit,
            } => {
                let series = resolve_column(df, column)?;
                let matched = filter_rows(df, series, *cmp, value)?;
                let limit = limit.unwrap_or(DEFAULT_ROW_LIMIT);
                let mut out = format!(
                    "{} of {} rows match {} {} {}",
                    matched.height(),
                    df.height(),
                    series.name(),
                    cmp.symbol(),
                    value
                );
                if matched.height() > 0 && limit > 0 {
                    out.push('\n');
                    out.push_str(&render_indexed(&matched.head(Some(limit)))?);
                }
                out
            }
            Command::Sort {
                column,
                descending,
                n,
            } => {
                let series = resolve_column(df, column)?;
                let options = SortMultipleOptions::default()
                    .with_order_descending(*descending)
                    .with_nulls_last(true)
                    .with_maintain_order(true);
                let sorted = df
                    .with_row_index(ROW_INDEX, None)?
                    .lazy()
                    .sort_by_exprs([col(series.name())], options)
                    .limit(n.unwrap_or(DEFAULT_ROW_LIMIT) as IdxSize)
                    .collect()?;
                render_indexed(&sorted)?
            }
            Command::GroupBy {
                by,
                column,
                func,
                limit,
            } => self.group_by(by, column, *func, limit.unwrap_or(DEFAULT_LIST_LIMIT))?,
        };
        Ok(ExecutionResult::Continue { output })
    }

    fn describe(&self, column: Option<&str>) -> Result<String, CommandError> {
        let df = self.frame.as_ref();
        let picked: Vec<&Series> = match column {
            Some(name) => vec![resolve_column(df, name)?],
            None => {
                let numeric: Vec<&Series> = df.get_columns().iter().filter(|s| s.dtype().is_numeric()).collect();
                if numeric.is_empty() {
                    df.get_columns().iter().collect()
                } else {
                    numeric
                }
            }
        };
        if picked.iter().all(|s| s.dtype().is_numeric()) {
            describe_numeric(df, &picked)
        } else {
            describe_categorical(df, &picked)
        }
    }

    fn group_by(&self, by: &str, column: &str, func: AggFunc, limit: usize) -> Result<String, CommandError> {
        let df = self.frame.as_ref();
        let key = resolve_column(df, by)?;
        let values = resolve_column(df, column)?;
        check_aggregate(values, func)?;

        // Groups sorted by key; null keys are dropped
        let grouped = df
            .clone()
            .lazy()
            .filter(col(key.name()).is_not_null())
            .group_by([col(key.name())])
            .agg([agg_expr(col(values.name()), func).alias("__value__")])
            .sort_by_exprs([col(key.name())], SortMultipleOptions::default())
            .collect()?;

        let total = grouped.height();
        let mut out = format!(
            "{} of {} grouped by {}\n{}",
            func.name(),
            values.name(),
            key.name(),
            render_rows_as_pairs(&grouped.head(Some(limit)))
        );
        if total > limit {
            out.push_str(&format!("\n({} groups, first {} shown)", total, limit));
        }
        Ok(out)
    }
}

fn check_aggregate(series: &Series, func: AggFunc) -> Result<(), TableError> {
    match func {
        AggFunc::Sum | AggFunc::Mean | AggFunc::Median | AggFunc::Std => ensure_numeric(series),
        AggFunc::Count | AggFunc::Min | AggFunc::Max | AggFunc::Nunique => Ok(()),
    }
}

fn agg_expr(expr: Expr, func: AggFunc) -> Expr {
    match func {
        AggFunc::Count => expr.count(),
        AggFunc::Sum => expr.sum(),
        AggFunc::Mean => expr.mean(),
        AggFunc::Median => expr.median(),
        AggFunc::Min => expr.min(),
        AggFunc::Max => expr.max(),
        AggFunc::Std => expr.std(1),
        AggFunc::Nunique => expr.drop_nulls().n_unique(),
    }
}

/// First value of a one-row result; missing results read as NaN
fn scalar_text(df: &DataFrame, name: &str) -> Result<String, CommandError> {
    let value = df.column(name)?.get(0)?;
    Ok(match value {
        AnyValue::Null => "NaN".to_string(),
        other => cell_text(&other),
    })
}

fn scalar_f64(df: &DataFrame, name: &str) -> Result<Option<f64>, CommandError> {
    Ok(df.column(name)?.get(0)?.extract::<f64>())
}

/// Render a two-column frame as aligned `key  value` lines
fn render_rows_as_pairs(df: &DataFrame) -> String {
    let pairs: Vec<(String, String)> = text_rows(df)
        .into_iter()
        .filter_map(|row| {
            let mut cells = row.into_iter();
            Some((cells.next()?, cells.next()?))
        })
        .collect();
    render_pairs(&pairs)
}

/// Non-null values with their counts, most frequent first; ties keep first appearance
fn value_counts(df: &DataFrame, name: &str) -> Result<DataFrame, CommandError> {
    let counts = df
        .clone()
        .lazy()
        .filter(col(name).is_not_null())
        .group_by_stable([col(name)])
        .agg([len().alias("__count__")])
        .sort_by_exprs(
            [col("__count__")],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        )
        .collect()?;
    Ok(counts)
}

/// Pearson r over rows where both columns are present
fn correlation(df: &DataFrame, x: &Series, y: &Series) -> Result<Option<f64>, CommandError> {
    ensure_numeric(x)?;
    ensure_numeric(y)?;

    let centered = |name: &str| col(name) - col(name).mean();
    let out = df
        .clone()
        .lazy()
        .select([
            col(x.name()).cast(DataType::Float64).alias("x"),
            col(y.name()).cast(DataType::Float64).alias("y"),
        ])
        .drop_nulls(None)
        .select([
            len().cast(DataType::Float64).alias("n"),
            (centered("x") * centered("y")).mean().alias("cov"),
            col("x").std(0).alias("sx"),
            col("y").std(0).alias("sy"),
        ])
        .collect()?;

    let n = scalar_f64(&out, "n")?.unwrap_or(0.0);
    let (Some(cov), Some(sx), Some(sy)) = (scalar_f64(&out, "cov")?, scalar_f64(&out, "sx")?, scalar_f64(&out, "sy")?)
    else {
        return Ok(None);
    };
    if n < 2.0 || sx == 0.0 || sy == 0.0 {
        return Ok(None);
    }
    Ok(Some((cov / (sx * sy)).clamp(-1.0, 1.0)))
}

/// Matching rows, carrying their original row numbers in [`ROW_INDEX`]
fn filter_rows(
    df: &DataFrame,
    series: &Series,
    cmp: Comparison,
    target: &serde_json::Value,
) -> Result<DataFrame, CommandError> {
    let indexed = df.with_row_index(ROW_INDEX, None)?;
    let name = series.name();

    if cmp == Comparison::Contains {
        let needle = json_text(target).to_lowercase();
        let text = series.cast(&DataType::String)?;
        let mask: BooleanChunked = text
            .str()?
            .into_iter()
            .map(|cell| Some(cell.is_some_and(|s| s.to_lowercase().contains(&needle))))
            .collect();
        return Ok(indexed.filter(&mask)?);
    }

    let predicate = if target.is_null() {
        match cmp {
            Comparison::Eq => col(name).is_null(),
            Comparison::Ne => col(name).is_not_null(),
            _ => lit(false),
        }
    } else {
        let (lhs, rhs) = comparison_operands(series, target);
        match cmp {
            // Missing cells never equal a value
            Comparison::Ne => lhs.clone().neq(rhs).or(lhs.is_null()),
            Comparison::Eq => lhs.eq(rhs),
            Comparison::Gt => lhs.gt(rhs),
            Comparison::Ge => lhs.gt_eq(rhs),
            Comparison::Lt => lhs.lt(rhs),
            Comparison::Le => lhs.lt_eq(rhs),
            Comparison::Contains => lit(false),
        }
    };
    Ok(indexed.lazy().filter(predicate).collect()?)
}

/// Compare numerically when both sides are numbers, otherwise as text
fn comparison_operands(series: &Series, target: &serde_json::Value) -> (Expr, Expr) {
    let column = col(series.name());
    let dtype = series.dtype();
    match target {
        serde_json::Value::Bool(b) if dtype == &DataType::Boolean => (column, lit(*b)),
        _ if dtype.is_numeric() => match json_number(target) {
            Some(v) => (column, lit(v)),
            None => (column.cast(DataType::String), lit(json_text(target))),
        },
        _ => (column.cast(DataType::String), lit(json_text(target))),
    }
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(format_float).unwrap_or_else(|| "NaN".to_string())
}

fn summary_headers(columns: &[&Series]) -> Vec<String> {
    std::iter::once(String::new())
        .chain(columns.iter().map(|s| s.name().to_string()))
        .collect()
}

/// count/mean/std/min/quartiles/max per numeric column, one lazy pass
fn describe_numeric(df: &DataFrame, columns: &[&Series]) -> Result<String, CommandError> {
    let mut exprs = Vec::with_capacity(columns.len() * DESCRIBE_STATS.len());
    for (i, series) in columns.iter().enumerate() {
        let c = || col(series.name()).cast(DataType::Float64);
        let quantile = |q: f64| c().quantile(lit(q), QuantileInterpolOptions::Linear);
        let stats = [
            c().count().cast(DataType::Float64),
            c().mean(),
            c().std(1),
            c().min(),
            quantile(0.25),
            quantile(0.5),
            quantile(0.75),
            c().max(),
        ];
        for (stat, expr) in DESCRIBE_STATS.iter().zip(stats) {
            exprs.push(expr.alias(&format!("{}_{}", i, stat)));
        }
    }
    let out = df.clone().lazy().select(exprs).collect()?;

    let mut rows = Vec::with_capacity(DESCRIBE_STATS.len());
    for stat in DESCRIBE_STATS {
        let mut row = vec![stat.to_string()];
        for i in 0..columns.len() {
            row.push(opt(scalar_f64(&out, &format!("{}_{}", i, stat))?));
        }
        rows.push(row);
    }
    Ok(render_table(&summary_headers(columns), &rows, None))
}

/// count/unique/top/freq per column
fn describe_categorical(df: &DataFrame, columns: &[&Series]) -> Result<String, CommandError> {
    let mut rows: Vec<Vec<String>> = ["count", "unique", "top", "freq"]
        .iter()
        .map(|label| vec![label.to_string()])
        .collect();
    for series in columns {
        let counts = value_counts(df, series.name())?;
        let top = text_rows(&counts.head(Some(1))).into_iter().next();
        let (top, freq) = match top {
            Some(mut row) if row.len() == 2 => {
                let freq = row.pop().unwrap_or_default();
                (row.pop().unwrap_or_default(), freq)
            }
            _ => ("NaN".to_string(), "0".to_string()),
        };
        rows[0].push((series.len() - series.null_count()).to_string());
        rows[1].push(counts.height().to_string());
        rows[2].push(top);
        rows[3].push(freq);
    }
    Ok(render_table(&summary_headers(columns), &rows, None))
}

/// Parse one command, an array of commands, or one command object per line
pub fn parse_commands(json: &str) -> Result<Vec<Command>, CommandError> {
    let trimmed = json.trim();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let mut cmds = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if line.starts_with('{') && line.ends_with('}') {
            cmds.push(serde_json::from_str(line)?);
        }
    }
    if cmds.is_empty() {
        // A single object spread over several lines
        cmds.push(serde_json::from_str(trimmed)?);
    }
    Ok(cmds)
}

/// Extract a JSON command block from a model reply
pub fn extract_commands(response: &str) -> Option<String> {
    let patterns = [("```json", "```"), ("```", "```")];

    for (start_pat, end_pat) in &patterns {
        if let Some(start_idx) = response.find(start_pat) {
            let code_start = start_idx + start_pat.len();
            if let Some(end_idx) = response[code_start..].find(end_pat) {
                let content = response[code_start..code_start + end_idx].trim();
                if content.starts_with('{') || content.starts_with('[') {
                    return Some(content.to_string());
                }
            }
        }
    }

    // Bare single-line JSON
    for line in response.lines() {
        let line = line.trim();
        if line.starts_with('{') && line.ends_with('}') && line.contains("\"op\"") {
            return Some(line.to_string());
        }
    }

    None
}

/// Extract a plain-text `Final Answer:` from a model reply
pub fn extract_final(response: &str) -> Option<String> {
    const MARKER: &str = "Final Answer:";
    let idx = response.find(MARKER)?;
    let answer = response[idx + MARKER.len()..].trim();
    if answer.is_empty() {
        None
    } else {
        Some(answer.to_string())
    }
}
