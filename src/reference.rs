//! Placeholder grammar shared by connectors and the engine
//!
//! ## Tokens
//!
//! - `${source::<path>}` references the table computed by another source. Relative paths
//!   (`${source::disks}`) are qualified against the job that declares them.
//! - `${var::<name>}` references a connector variable from the host configuration.
//! - `%<attribute>%` references an attribute of the monitor being processed.
//! - `$<n>` references the 1-based column `n` of the current row in a mapping expression.
//!
//! Substitution is total: an unresolved token becomes an empty string and is logged, it never
//! produces an error.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::table::SourceTable;

static SOURCE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{source::([^}]+)\}").expect("valid source reference regex"));

static VARIABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{var::([^}]+)\}").expect("valid variable regex"));

static ATTRIBUTE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%([A-Za-z0-9_.\-]+)%").expect("valid attribute reference regex")
});

static COLUMN_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid column reference regex"));

const MONITORS_PREFIX: &str = "monitors.";
/// Prefix of connector level sources, also used to qualify their relative references
pub const BEFORE_ALL_PREFIX: &str = "beforeAll.";

/// Anything able to return a computed table by its canonical key
pub trait SourceTableLookup {
    fn source_table(&self, key: &str) -> Option<SourceTable>;
}

impl SourceTableLookup for HashMap<String, SourceTable> {
    fn source_table(&self, key: &str) -> Option<SourceTable> {
        self.get(key).cloned()
    }
}

/// Canonical key of a source declared by a monitor job
pub fn job_source_key(monitor_type: &str, job: &str, name: &str) -> String {
    format!("{}{}", job_prefix(monitor_type, job), name)
}

/// Prefix shared by all sources of a monitor job, including the trailing dot
pub fn job_prefix(monitor_type: &str, job: &str) -> String {
    format!("{MONITORS_PREFIX}{monitor_type}.{job}.sources.")
}

/// Canonical key of a connector level source executed before all jobs
pub fn before_all_key(name: &str) -> String {
    format!("{BEFORE_ALL_PREFIX}{name}")
}

/// Turns a path as written in a connector into a canonical key
pub fn qualify_path(path: &str, prefix: Option<&str>) -> String {
    let path = path.trim();
    if path.starts_with(MONITORS_PREFIX) || path.starts_with(BEFORE_ALL_PREFIX) {
        return path.to_string();
    }

    match prefix {
        Some(prefix) => format!("{prefix}{path}"),
        None => path.to_string(),
    }
}

/// Returns the qualified keys of every source referenced in `text`, in order of appearance
pub fn referenced_sources(text: &str, prefix: Option<&str>) -> Vec<String> {
    SOURCE_REF
        .captures_iter(text)
        .map(|caps| qualify_path(&caps[1], prefix))
        .collect()
}

/// Extracts the qualified key when `text` is exactly one source reference
pub fn as_source_reference(text: &str, prefix: Option<&str>) -> Option<String> {
    let text = text.trim();
    let caps = SOURCE_REF.captures(text)?;
    let whole = caps.get(0)?;
    (whole.start() == 0 && whole.end() == text.len()).then(|| qualify_path(&caps[1], prefix))
}

/// Inlines the content of every referenced source table
pub fn replace_source_references(
    text: &str,
    prefix: Option<&str>,
    tables: &dyn SourceTableLookup,
) -> String {
    if !text.contains("${source::") {
        return text.to_string();
    }

    SOURCE_REF
        .replace_all(text, |caps: &Captures| {
            let key = qualify_path(&caps[1], prefix);
            match tables.source_table(&key) {
                Some(table) => table.reference_content(),
                None => {
                    debug!("unresolved source reference {key}, substituting empty content");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Replaces `%attribute%` tokens when an attribute context exists
pub fn replace_attribute_references(
    text: &str,
    attributes: Option<&BTreeMap<String, String>>,
) -> String {
    let Some(attributes) = attributes else {
        return text.to_string();
    };

    ATTRIBUTE_REF
        .replace_all(text, |caps: &Captures| match attributes.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                debug!("unresolved attribute reference %{}%", &caps[1]);
                String::new()
            }
        })
        .into_owned()
}

/// Replaces `${var::name}` tokens with connector variables
pub fn replace_variables(text: &str, variables: Option<&BTreeMap<String, String>>) -> String {
    if !text.contains("${var::") {
        return text.to_string();
    }

    VARIABLE_REF
        .replace_all(text, |caps: &Captures| {
            match variables.and_then(|vars| vars.get(caps[1].trim())) {
                Some(value) => value.clone(),
                None => {
                    debug!("unresolved connector variable {}", &caps[1]);
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Parses an expression that is exactly one column reference, e.g. `$2`
pub fn column_reference(text: &str) -> Option<usize> {
    text.trim()
        .strip_prefix('$')
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

/// Replaces every `$n` column reference in `text` with the matching cell of `row`
pub fn interpolate_columns(text: &str, row: &[String]) -> String {
    if !text.contains('$') {
        return text.to_string();
    }

    COLUMN_REF
        .replace_all(text, |caps: &Captures| {
            let column = caps[1].parse::<usize>().unwrap_or(0);
            SourceTable::cell(row, column).unwrap_or_default().to_string()
        })
        .into_owned()
}

/// Substitution context for one source execution
///
/// Holds everything a source definition may refer to: sibling tables, the connector variables
/// and, for mono-instance collects, the attributes of the monitor being collected.
pub struct ReferenceResolver<'a> {
    prefix: Option<String>,
    tables: &'a dyn SourceTableLookup,
    attributes: Option<&'a BTreeMap<String, String>>,
    variables: Option<&'a BTreeMap<String, String>>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(prefix: Option<String>, tables: &'a dyn SourceTableLookup) -> Self {
        Self {
            prefix,
            tables,
            attributes: None,
            variables: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Option<&'a BTreeMap<String, String>>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_variables(mut self, variables: Option<&'a BTreeMap<String, String>>) -> Self {
        self.variables = variables;
        self
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Substitutes attribute and variable tokens only
    pub fn replace_attributes(&self, text: &str) -> String {
        let text = replace_attribute_references(text, self.attributes);
        replace_variables(&text, self.variables)
    }

    /// Full substitution: attributes and variables first, then source contents
    pub fn resolve(&self, text: &str) -> String {
        let text = self.replace_attributes(text);
        replace_source_references(&text, self.prefix(), self.tables)
    }

    /// Looks up the table behind a reference such as `${source::disks}`
    ///
    /// A bare name is accepted as well, since table combinators usually name their inputs.
    pub fn lookup_table(&self, reference: &str) -> Option<SourceTable> {
        let reference = self.replace_attributes(reference);
        let key = as_source_reference(&reference, self.prefix())
            .unwrap_or_else(|| qualify_path(&reference, self.prefix()));
        let table = self.tables.source_table(&key);
        if table.is_none() {
            debug!("source table {key} not found");
        }
        table
    }
}
