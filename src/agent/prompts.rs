//! Prompt construction for the table agent

use polars::prelude::DataFrame;

use crate::table;

const COMMAND_REFERENCE: &str = r#"AVAILABLE COMMANDS (JSON, one object per line or a JSON array):
{"op": "shape"}                                   rows and columns
{"op": "columns"}                                 column names
{"op": "dtypes"}                                  column types
{"op": "head", "n": 5}                            first n rows
{"op": "tail", "n": 5}                            last n rows
{"op": "describe"}                                count/mean/std/min/quartiles/max of numeric columns
{"op": "describe", "column": "c"}                 summary of one column
{"op": "missing"}                                 missing values per column
{"op": "unique", "column": "c"}                   distinct values
{"op": "value_counts", "column": "c", "limit": 10}
{"op": "aggregate", "column": "c", "func": "mean"}    func: count, sum, mean, median, min, max, std, nunique
{"op": "corr", "x": "a", "y": "b"}                Pearson correlation
{"op": "filter", "column": "c", "cmp": "gt", "value": 10, "limit": 10}    cmp: eq, ne, gt, ge, lt, le, contains
{"op": "sort", "column": "c", "descending": true, "n": 5}
{"op": "group_by", "by": "g", "column": "c", "func": "sum"}
{"op": "final", "answer": "..."}                  your answer to the user"#;

/// System prompt describing the table and the command protocol
pub fn system_prompt(frame: &DataFrame, preview_rows: usize) -> String {
    let (rows, cols) = frame.shape();
    let schema = table::schema(frame)
        .iter()
        .map(|(name, dtype)| format!("- {} ({})", name, dtype))
        .collect::<Vec<_>>()
        .join("\n");
    let head = table::render_head(frame, preview_rows);

    format!(
        r#"You are a data analyst working with a table loaded from the user's file.
The table has {rows} rows and {cols} columns.

COLUMNS:
{schema}

FIRST ROWS:
{head}

You answer questions by running analysis commands against the table. Each turn, reply with
a ```json block containing one or more commands. You will receive their output as an
Observation. Repeat until you can answer, then reply with a final command.

{COMMAND_REFERENCE}

RULES:
- Only use numbers that appear in an Observation; never guess.
- Use the column names exactly as listed; check them with "columns" if unsure.
- If a command fails, read the error and fix the command.
- The final answer is plain text for a non-technical reader."#
    )
}

pub fn observation(output: &str) -> String {
    format!("Observation:\n{}", output)
}

pub fn command_error(error: &str) -> String {
    format!(
        "Observation:\nError: {}\nFix the command and try again, or give a final answer.",
        error
    )
}

/// Truncate long observations, keeping the head and tail
pub fn truncate_output(output: &str, limit: usize) -> String {
    let total = output.chars().count();
    if total <= limit {
        return output.to_string();
    }
    let half = limit / 2;
    let head: String = output.chars().take(half).collect();
    let tail: String = output.chars().skip(total - half).collect();
    format!("{}... [truncated {} chars] ...{}", head, total - 2 * half, tail)
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;

    #[test]
    fn test_system_prompt_describes_table() {
        let df = df!("name" => &["ann", "bo"], "age" => &[31i64, 27]).unwrap();
        let prompt = system_prompt(&df, 5);
        assert!(prompt.contains("The table has 2 rows and 2 columns."));
        assert!(prompt.contains("- age (i64)"));
        assert!(prompt.contains("- name (str)"));
        assert!(prompt.contains("ann"));
        assert!(prompt.contains(r#"{"op": "final""#));
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        let long = "a".repeat(10) + "b".repeat(10).as_str();
        assert_eq!(truncate_output(&long, 10), "aaaaa... [truncated 10 chars] ...bbbbb");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(30);
        let out = truncate_output(&text, 6);
        assert!(out.starts_with("ééé..."));
        assert!(out.ends_with("...ééé"));
    }
}
