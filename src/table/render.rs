//! Plain-text table rendering for agent observations

/// Render rows as a right-aligned text table with an optional row-label column
pub fn render_table(headers: &[String], rows: &[Vec<String>], labels: Option<&[usize]>) -> String {
    let label_text: Vec<String> = match labels {
        Some(labels) => labels.iter().map(|l| l.to_string()).collect(),
        None => Vec::new(),
    };
    let label_width = label_text.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| {
            rows.iter()
                .filter_map(|r| r.get(idx))
                .map(|c| c.chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    if labels.is_some() {
        out.push_str(&" ".repeat(label_width));
    }
    for (idx, header) in headers.iter().enumerate() {
        if labels.is_some() || idx > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{:>width$}", header, width = widths[idx]));
    }

    for (row_idx, row) in rows.iter().enumerate() {
        out.push('\n');
        if let Some(label) = label_text.get(row_idx) {
            out.push_str(&format!("{:<width$}", label, width = label_width));
        }
        for (idx, width) in widths.iter().enumerate() {
            if labels.is_some() || idx > 0 {
                out.push_str("  ");
            }
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            out.push_str(&format!("{:>width$}", cell, width = width));
        }
    }
    out
}

/// Two-column listing, used for series-like output (dtypes, counts, ...)
pub fn render_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    let width = pairs.iter().map(|(k, _)| k.as_ref().chars().count()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(k, v)| format!("{:<width$}  {}", k.as_ref(), v.as_ref(), width = width))
        .collect::<Vec<_>>()
        .join("\n")
}
