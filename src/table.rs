//! Tabular values flowing through sources and computes
//!
//! Every source produces a [`SourceTable`], and every compute turns one table into the next.
//! Tables are plain owned values: a compute step works on its own copy and hands the result
//! to the following step, so nothing here is shared between concurrent executions.
//!
//! ## Text forms
//!
//! Sources frequently exchange tables as text. The canonical text form is one line per row,
//! cells separated by `;` and every line terminated by the separator:
//!
//! ```text
//! enc-1;ok;
//! enc-2;degraded;
//! ```

use std::collections::HashMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Separator used when a table is rendered to or parsed from text
pub const TABLE_SEP: &str = ";";

/// Result of a source or compute step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    /// Rows of string cells
    #[serde(default)]
    pub table: Vec<Vec<String>>,

    /// Unparsed output of the producing source, when it had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,

    /// Column names, when the producing source knows them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
}

impl SourceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(table: Vec<Vec<String>>) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }

    /// Builds a table from its text form, keeping the text as raw data
    pub fn from_csv(csv: &str, separator: &str) -> Self {
        Self {
            table: csv_to_table(csv, separator),
            raw_data: Some(csv.to_string()),
            headers: None,
        }
    }

    /// An empty table that still carries the raw data of `other`
    pub fn empty_keeping_raw(other: Option<&SourceTable>) -> Self {
        Self {
            raw_data: other.and_then(|t| t.raw_data.clone()),
            ..Default::default()
        }
    }

    /// A table is empty when it has neither rows nor meaningful raw data
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
            && self
                .raw_data
                .as_deref()
                .is_none_or(|raw| raw.trim().is_empty())
    }

    /// Returns the cell at the 1-based `column` of `row`, if any
    pub fn cell(row: &[String], column: usize) -> Option<&str> {
        column
            .checked_sub(1)
            .and_then(|index| row.get(index))
            .map(String::as_str)
    }

    /// Renders the rows in text form
    pub fn to_csv(&self) -> String {
        table_to_csv(&self.table, TABLE_SEP)
    }

    /// Inlined content when the table is referenced from another source
    pub fn reference_content(&self) -> String {
        match &self.raw_data {
            Some(raw) if !raw.is_empty() => raw.clone(),
            _ => self.to_csv(),
        }
    }

    /// Drops rows whose width differs from the dominant width of the table
    pub fn drop_malformed_rows(&mut self) {
        if self.table.is_empty() {
            return;
        }

        let mut widths: HashMap<usize, usize> = HashMap::new();
        for row in &self.table {
            *widths.entry(row.len()).or_default() += 1;
        }

        // ties go to the first width seen, so a table of one row always keeps it
        let first = self.table[0].len();
        let expected = widths
            .iter()
            .max_by_key(|(width, count)| (**count, **width == first))
            .map(|(width, _)| *width)
            .unwrap_or(first);

        let before = self.table.len();
        self.table.retain(|row| row.len() == expected);
        let dropped = before - self.table.len();
        if dropped > 0 {
            debug!("dropped {dropped} malformed row(s), expected {expected} column(s)");
        }
    }

    /// Human readable rendering used by debug logs
    pub fn to_text_table(&self) -> String {
        if self.table.is_empty() {
            return String::from("<empty table>");
        }

        let columns = self.table.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![0usize; columns];
        if let Some(headers) = &self.headers {
            for (i, header) in headers.iter().enumerate().take(columns) {
                widths[i] = widths[i].max(header.len());
            }
        }
        for row in &self.table {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }

        let mut out = String::new();
        let mut render = |cells: &[String]| {
            let line = widths
                .iter()
                .enumerate()
                .map(|(i, width)| {
                    let cell = cells.get(i).map(String::as_str).unwrap_or("");
                    format!("{cell:<width$}")
                })
                .collect::<Vec<_>>()
                .join(" | ");
            let _ = writeln!(out, "| {line} |");
        };

        if let Some(headers) = &self.headers {
            render(headers);
        }
        for row in &self.table {
            render(row);
        }
        out
    }
}

/// Splits one line of text into cells
///
/// A single trailing separator terminates the line and does not create an empty cell, while
/// empty cells in the middle of the line are preserved.
pub fn line_to_list(line: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![line.to_string()];
    }

    let line = line.strip_suffix(separator).unwrap_or(line);
    line.split(separator).map(str::to_string).collect()
}

/// Parses the text form of a table, skipping blank lines
pub fn csv_to_table(csv: &str, separator: &str) -> Vec<Vec<String>> {
    csv.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| line_to_list(line, separator))
        .collect()
}

/// Renders rows in text form, each line terminated by the separator
pub fn table_to_csv(table: &[Vec<String>], separator: &str) -> String {
    table
        .iter()
        .map(|row| {
            let mut line = row.join(separator);
            line.push_str(separator);
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
