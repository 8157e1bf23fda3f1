//! Tabular transformations applied to source results
//!
//! Each compute takes ownership of the previous table and returns the next one. A compute
//! never fails: a column outside the row, a non-numeric operand or an undecodable cell leaves
//! the row as it was.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::RegexBuilder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connector::Compute;
use crate::connector::compute::{Conversion, Encoding};
use crate::reference::{self, ReferenceResolver};
use crate::table::{self, SourceTable, TABLE_SEP};

const DEFAULT_TRANSLATION: &str = "default";

pub struct ComputeProcessor<'a> {
    resolver: &'a ReferenceResolver<'a>,
    connector_id: &'a str,
}

impl<'a> ComputeProcessor<'a> {
    pub fn new(resolver: &'a ReferenceResolver<'a>, connector_id: &'a str) -> Self {
        Self {
            resolver,
            connector_id,
        }
    }

    /// Runs the whole chain, each step consuming the previous step's table
    pub fn process_all(&self, computes: &[Compute], source_key: &str, table: SourceTable) -> SourceTable {
        computes.iter().enumerate().fold(table, |table, (index, compute)| {
            // the loaded definition stays untouched, substitutions go to a copy
            let mut compute = compute.clone();
            compute.update(&|text| self.resolver.resolve(text));

            debug!(
                "{}: begin of compute #{index} {} on {source_key}",
                self.connector_id,
                compute.name()
            );
            let rows_before = table.table.clone();
            let mut result = self.apply(&compute, table);
            // references inline the raw data, it must follow the rewritten rows
            if result.table != rows_before && !compute.produces_raw_data() {
                result.raw_data = Some(result.to_csv());
            }
            debug!(
                "{}: end of compute #{index} {} on {source_key}:\n{}",
                self.connector_id,
                compute.name(),
                result.to_text_table()
            );
            result
        })
    }

    pub fn apply(&self, compute: &Compute, table: SourceTable) -> SourceTable {
        match compute {
            Compute::Replace {
                column,
                existing_value,
                new_value,
            } => map_cells(table, *column, |cell, row| {
                let existing = value_for_row(existing_value, row);
                if existing.is_empty() {
                    return None;
                }
                Some(cell.replace(&existing, &value_for_row(new_value, row)))
            }),
            Compute::Substring {
                column,
                start,
                length,
            } => map_cells(table, *column, |cell, row| {
                let start = value_for_row(start, row).trim().parse::<usize>().ok()?;
                let length = value_for_row(length, row).trim().parse::<usize>().ok()?;
                Some(
                    cell.chars()
                        .skip(start.saturating_sub(1))
                        .take(length)
                        .collect(),
                )
            }),
            Compute::Extract {
                column,
                sub_column,
                sub_separators,
            } => map_cells(table, *column, |cell, _| {
                let tokens: Vec<&str> = cell
                    .split(|c: char| sub_separators.contains(c))
                    .filter(|token| !token.is_empty())
                    .collect();
                Some(
                    sub_column
                        .checked_sub(1)
                        .and_then(|i| tokens.get(i))
                        .map(|token| token.to_string())
                        .unwrap_or_default(),
                )
            }),
            Compute::Translate {
                column,
                translation_table,
            } => map_cells(table, *column, |cell, _| {
                Some(translate(translation_table, cell))
            }),
            Compute::PerBitTranslation {
                column,
                bit_list,
                translation_table,
            } => map_cells(table, *column, |cell, _| {
                per_bit_translation(cell, bit_list, translation_table)
            }),
            Compute::ArrayTranslate {
                column,
                translation_table,
                array_separator,
                result_separator,
            } => map_cells(table, *column, |cell, _| {
                let translated: Vec<String> = cell
                    .split(array_separator.as_str())
                    .map(|item| translate(translation_table, item.trim()))
                    .filter(|item| !item.is_empty())
                    .collect();
                Some(translated.join(result_separator))
            }),
            Compute::Decode { column, encoding } => {
                map_cells(table, *column, |cell, _| decode(*encoding, cell))
            }
            Compute::Encode { column, encoding } => {
                map_cells(table, *column, |cell, _| Some(encode(*encoding, cell)))
            }
            Compute::DuplicateColumn { column } => map_rows(table, |mut row| {
                if let Some(cell) = SourceTable::cell(&row, *column).map(str::to_string) {
                    row.insert(*column, cell);
                }
                Some(row)
            }),
            Compute::ExcludeMatchingLines {
                column,
                reg_exp,
                value_list,
            } => self.filter_lines(table, *column, reg_exp, value_list, false),
            Compute::KeepOnlyMatchingLines {
                column,
                reg_exp,
                value_list,
            } => self.filter_lines(table, *column, reg_exp, value_list, true),
            Compute::KeepColumns { column_numbers } => {
                let columns: Vec<usize> = column_numbers
                    .split(',')
                    .filter_map(|c| c.trim().parse().ok())
                    .collect();
                map_rows(table, |row| {
                    Some(
                        columns
                            .iter()
                            .map(|&c| SourceTable::cell(&row, c).unwrap_or_default().to_string())
                            .collect(),
                    )
                })
            }
            Compute::Append { column, value } => map_cells(table, *column, |cell, row| {
                Some(format!("{cell}{}", value_for_row(value, row)))
            }),
            Compute::Prepend { column, value } => map_cells(table, *column, |cell, row| {
                Some(format!("{}{cell}", value_for_row(value, row)))
            }),
            Compute::Add { column, value } => arithmetic(table, *column, value, |a, b| Some(a + b)),
            Compute::Subtract { column, value } => {
                arithmetic(table, *column, value, |a, b| Some(a - b))
            }
            Compute::Multiply { column, value } => {
                arithmetic(table, *column, value, |a, b| Some(a * b))
            }
            Compute::Divide { column, value } => {
                arithmetic(table, *column, value, |a, b| (b != 0.0).then(|| a / b))
            }
            Compute::And { column, value } => map_cells(table, *column, |cell, row| {
                let a = parse_integer(cell)?;
                let b = parse_integer(&value_for_row(value, row))?;
                Some((a & b).to_string())
            }),
            Compute::Convert { column, conversion } => map_cells(table, *column, |cell, _| {
                match conversion {
                    Conversion::Hex2Decimal => hex_to_decimal(cell),
                    Conversion::Array2SimpleStatus => Some(array_to_simple_status(cell)),
                }
            }),
            Compute::Json2Csv {
                entry_key,
                properties,
                separator,
            } => json_to_csv(&table, entry_key, properties, separator).unwrap_or_else(|| {
                warn!("{}: json2Csv could not parse its input", self.connector_id);
                SourceTable::empty()
            }),
            Compute::Xml2Csv {
                record_tag,
                properties,
            } => xml_to_csv(&table, record_tag, properties).unwrap_or_else(|| {
                warn!("{}: xml2Csv could not parse its input", self.connector_id);
                SourceTable::empty()
            }),
            Compute::TableJoin {
                right_table,
                left_key_column,
                right_key_column,
                default_right_line,
            } => {
                let right = self.resolver.lookup_table(right_table).unwrap_or_default();
                table_join(
                    &table,
                    &right,
                    *left_key_column,
                    *right_key_column,
                    default_right_line.as_deref(),
                )
            }
            Compute::TableUnion { tables } => {
                let others: Vec<SourceTable> = tables
                    .iter()
                    .filter_map(|name| self.resolver.lookup_table(name))
                    .collect();
                table_union(std::iter::once(&table).chain(others.iter()))
            }
        }
    }

    fn filter_lines(
        &self,
        table: SourceTable,
        column: usize,
        reg_exp: &Option<String>,
        value_list: &Option<String>,
        keep_matching: bool,
    ) -> SourceTable {
        let pattern = match reg_exp.as_deref().filter(|r| !r.is_empty()) {
            Some(raw) => match RegexBuilder::new(raw).case_insensitive(true).build() {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("{}: invalid line filter {raw}: {e}", self.connector_id);
                    return table;
                }
            },
            None => None,
        };
        let values: Vec<String> = value_list
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(|v| v.trim().to_lowercase())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if pattern.is_none() && values.is_empty() {
            return table;
        }

        map_rows(table, |row| {
            let Some(cell) = SourceTable::cell(&row, column) else {
                return (!keep_matching).then_some(row);
            };
            let matches = pattern.as_ref().is_some_and(|p| p.is_match(cell))
                || values.contains(&cell.trim().to_lowercase());
            (matches == keep_matching).then_some(row)
        })
    }
}

/// Resolves a parameter for one row: `$n` reads a column, anything else is literal
fn value_for_row(value: &str, row: &[String]) -> String {
    match reference::column_reference(value) {
        Some(column) => SourceTable::cell(row, column).unwrap_or_default().to_string(),
        None => value.to_string(),
    }
}

fn map_rows(mut table: SourceTable, f: impl Fn(Vec<String>) -> Option<Vec<String>>) -> SourceTable {
    table.table = std::mem::take(&mut table.table)
        .into_iter()
        .filter_map(f)
        .collect();
    table
}

/// Rewrites one column; `None` from `f` keeps the cell, rows without the column are kept as is
fn map_cells(
    mut table: SourceTable,
    column: usize,
    f: impl Fn(&str, &[String]) -> Option<String>,
) -> SourceTable {
    let Some(index) = column.checked_sub(1) else {
        return table;
    };

    for row in table.table.iter_mut() {
        let Some(cell) = row.get(index) else {
            continue;
        };
        if let Some(new_value) = f(cell, row) {
            row[index] = new_value;
        }
    }
    table
}

fn translate(translation_table: &BTreeMap<String, String>, value: &str) -> String {
    translation_table
        .get(value)
        .or_else(|| {
            translation_table
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(value))
                .map(|(_, v)| v)
        })
        .or_else(|| {
            translation_table
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(DEFAULT_TRANSLATION))
                .map(|(_, v)| v)
        })
        .cloned()
        .unwrap_or_default()
}

fn per_bit_translation(
    cell: &str,
    bit_list: &str,
    translation_table: &BTreeMap<String, String>,
) -> Option<String> {
    let value = parse_integer(cell)?;
    let translated: Vec<String> = bit_list
        .split(',')
        .filter_map(|bit| bit.trim().parse::<u32>().ok())
        .filter(|bit| *bit < 64)
        .filter_map(|bit| {
            let state = (value >> bit) & 1;
            translation_table
                .get(&format!("{bit},{state}"))
                .filter(|t| !t.is_empty())
                .cloned()
        })
        .collect();
    Some(translated.join(" - "))
}

fn parse_integer(value: &str) -> Option<u64> {
    let value = value.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn arithmetic(
    table: SourceTable,
    column: usize,
    operand: &str,
    op: impl Fn(f64, f64) -> Option<f64>,
) -> SourceTable {
    map_cells(table, column, |cell, row| {
        let a = cell.trim().parse::<f64>().ok()?;
        let b = value_for_row(operand, row).trim().parse::<f64>().ok()?;
        op(a, b).filter(|r| r.is_finite()).map(format_number)
    })
}

fn hex_to_decimal(cell: &str) -> Option<String> {
    let cleaned: String = cell
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();
    u64::from_str_radix(&cleaned, 16).ok().map(|v| v.to_string())
}

fn array_to_simple_status(cell: &str) -> String {
    let rank = |status: &str| match status.trim().to_uppercase().as_str() {
        "OK" => Some(0),
        "WARN" | "WARNING" | "DEGRADED" => Some(1),
        "ALARM" | "FAILED" | "CRITICAL" => Some(2),
        _ => None,
    };
    match cell.split(['|', ',']).filter_map(rank).max() {
        Some(2) => "ALARM".to_string(),
        Some(1) => "WARN".to_string(),
        Some(_) => "OK".to_string(),
        None => String::new(),
    }
}

fn encode(encoding: Encoding, value: &str) -> String {
    match encoding {
        Encoding::Base64 => STANDARD.encode(value),
        Encoding::Hex => value.bytes().map(|b| format!("{b:02x}")).collect(),
        Encoding::Url => value
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect(),
    }
}

fn decode(encoding: Encoding, value: &str) -> Option<String> {
    let bytes = match encoding {
        Encoding::Base64 => STANDARD.decode(value.trim()).ok()?,
        Encoding::Hex => {
            let value = value.trim();
            if value.len() % 2 != 0 {
                return None;
            }
            (0..value.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(value.get(i..i + 2)?, 16).ok())
                .collect::<Option<Vec<u8>>>()?
        }
        Encoding::Url => {
            let raw = value.as_bytes();
            let mut bytes = Vec::with_capacity(raw.len());
            let mut i = 0;
            while i < raw.len() {
                match raw[i] {
                    b'%' => {
                        let hex = value.get(i + 1..i + 3)?;
                        bytes.push(u8::from_str_radix(hex, 16).ok()?);
                        i += 3;
                    }
                    b'+' => {
                        bytes.push(b' ');
                        i += 1;
                    }
                    b => {
                        bytes.push(b);
                        i += 1;
                    }
                }
            }
            bytes
        }
    };
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Joins `left` and `right` on key columns, keys compare case-insensitively
pub(crate) fn table_join(
    left: &SourceTable,
    right: &SourceTable,
    left_key_column: usize,
    right_key_column: usize,
    default_right_line: Option<&str>,
) -> SourceTable {
    let default_right = default_right_line
        .filter(|line| !line.is_empty())
        .map(|line| table::line_to_list(line, TABLE_SEP));

    let mut rows = Vec::new();
    for left_row in &left.table {
        let Some(key) = SourceTable::cell(left_row, left_key_column) else {
            continue;
        };

        let mut matched = false;
        for right_row in &right.table {
            if SourceTable::cell(right_row, right_key_column)
                .is_some_and(|k| k.eq_ignore_ascii_case(key))
            {
                matched = true;
                rows.push(left_row.iter().chain(right_row).cloned().collect());
            }
        }

        if !matched && let Some(default_right) = &default_right {
            rows.push(left_row.iter().chain(default_right).cloned().collect());
        }
    }

    SourceTable::from_rows(rows)
}

pub(crate) fn table_union<'t>(tables: impl Iterator<Item = &'t SourceTable>) -> SourceTable {
    SourceTable::from_rows(tables.flat_map(|t| t.table.iter().cloned()).collect())
}

fn json_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(segment),
        })
}

fn json_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn json_to_csv(
    table: &SourceTable,
    entry_key: &str,
    properties: &str,
    separator: &str,
) -> Option<SourceTable> {
    let input = match &table.raw_data {
        Some(raw) if !raw.trim().is_empty() => raw.clone(),
        _ => table
            .table
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or_default(),
    };
    let document: Value = serde_json::from_str(&input).ok()?;
    let entries = json_path(&document, entry_key)?;
    let records: Vec<&Value> = match entries {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let properties: Vec<&str> = properties
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let rows: Vec<Vec<String>> = records
        .into_iter()
        .map(|record| {
            properties
                .iter()
                .map(|property| json_cell(json_path(record, property)))
                .collect()
        })
        .collect();

    Some(SourceTable {
        raw_data: Some(table::table_to_csv(&rows, separator)),
        table: rows,
        headers: Some(properties.iter().map(|p| p.to_string()).collect()),
    })
}

fn xml_attributes(element: &BytesStart) -> BTreeMap<String, String> {
    element
        .attributes()
        .flatten()
        .filter_map(|attribute| {
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute.unescape_value().ok()?;
            Some((format!("@{key}"), value.into_owned()))
        })
        .collect()
}

fn record_row(values: &BTreeMap<String, String>, properties: &[&str]) -> Vec<String> {
    properties
        .iter()
        .map(|p| values.get(*p).cloned().unwrap_or_default())
        .collect()
}

fn xml_to_csv(table: &SourceTable, record_tag: &str, properties: &str) -> Option<SourceTable> {
    let input = table.raw_data.as_deref().filter(|raw| !raw.trim().is_empty())?;
    let properties: Vec<&str> = properties
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut record: Option<BTreeMap<String, String>> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                if record.is_none() && name == record_tag {
                    record = Some(xml_attributes(&element));
                    path.clear();
                } else if record.is_some() {
                    path.push(name);
                }
            }
            Ok(Event::Empty(element)) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                if record.is_none() && name == record_tag {
                    rows.push(record_row(&xml_attributes(&element), &properties));
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(values) = record.as_mut()
                    && !path.is_empty()
                    && let Ok(text) = text.unescape()
                {
                    values.insert(path.join("/"), text.into_owned());
                }
            }
            Ok(Event::End(element)) => {
                if record.is_some() {
                    if path.is_empty() {
                        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                        if name == record_tag {
                            let values = record.take().unwrap_or_default();
                            rows.push(record_row(&values, &properties));
                        }
                    } else {
                        path.pop();
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }

    Some(SourceTable {
        raw_data: Some(table::table_to_csv(&rows, TABLE_SEP)),
        table: rows,
        headers: Some(properties.iter().map(|p| p.to_string()).collect()),
    })
}
