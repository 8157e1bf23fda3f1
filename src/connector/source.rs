//! Source definitions
//!
//! A [`Source`] is one acquisition step of a monitor job. The protocol specific part lives in
//! [`SourceKind`], the fields every source shares (key, serialization flag, computes) live on
//! [`Source`] itself.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::compute::Compute;
use crate::reference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Canonical reference path, filled in when the connector is loaded
    #[serde(default)]
    pub key: String,

    /// Only one execution of this source may run at a time per connector namespace
    #[serde(default)]
    pub force_serialization: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computes: Vec<Compute>,

    #[serde(flatten)]
    pub kind: SourceKind,
}

fn default_http_method() -> String {
    String::from("GET")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    Http {
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        result_content: Option<String>,
    },
    SnmpGet {
        oid: String,
    },
    SnmpTable {
        oid: String,
        #[serde(default)]
        select_columns: Option<String>,
    },
    Wmi {
        query: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    Wbem {
        query: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    Ipmi {},
    CommandLine {
        command_line: String,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        keep_only_regexp: Option<String>,
        #[serde(default)]
        remove_header: Option<usize>,
        #[serde(default)]
        remove_footer: Option<usize>,
        #[serde(default)]
        separators: Option<String>,
        #[serde(default)]
        select_columns: Option<String>,
    },
    Sql {
        query: String,
    },
    Jmx {
        object_name: String,
        #[serde(default)]
        attributes: Vec<String>,
        #[serde(default)]
        key_properties: Vec<String>,
    },
    Jawk {
        script: String,
        #[serde(default)]
        input: Option<String>,
        #[serde(default)]
        separators: Option<String>,
        #[serde(default)]
        select_columns: Option<String>,
    },
    Copy {
        from: String,
    },
    #[serde(rename = "static")]
    StaticValue {
        value: String,
    },
    TableJoin {
        left_table: String,
        right_table: String,
        left_key_column: usize,
        right_key_column: usize,
        #[serde(default)]
        default_right_line: Option<String>,
    },
    TableUnion {
        tables: Vec<String>,
    },
    InternalDbQuery {
        query: String,
    },
    File {
        paths: Vec<String>,
        #[serde(default)]
        max_size_per_poll: Option<u64>,
    },
    EventLog {
        log_name: String,
        #[serde(default)]
        event_ids: Vec<String>,
        #[serde(default)]
        sources: Vec<String>,
        #[serde(default)]
        max_events_per_poll: Option<u32>,
    },
}

/// Discriminant of [`SourceKind`], used by extensions to declare what they handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    Http,
    SnmpGet,
    SnmpTable,
    Wmi,
    Wbem,
    Ipmi,
    CommandLine,
    Sql,
    Jmx,
    Jawk,
    Copy,
    StaticValue,
    TableJoin,
    TableUnion,
    InternalDbQuery,
    File,
    EventLog,
}

impl SourceType {
    /// Variants evaluated by the engine itself, without a protocol extension
    pub fn is_builtin(self) -> bool {
        matches!(
            self,
            SourceType::Copy
                | SourceType::StaticValue
                | SourceType::TableJoin
                | SourceType::TableUnion
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl SourceKind {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceKind::Http { .. } => SourceType::Http,
            SourceKind::SnmpGet { .. } => SourceType::SnmpGet,
            SourceKind::SnmpTable { .. } => SourceType::SnmpTable,
            SourceKind::Wmi { .. } => SourceType::Wmi,
            SourceKind::Wbem { .. } => SourceType::Wbem,
            SourceKind::Ipmi {} => SourceType::Ipmi,
            SourceKind::CommandLine { .. } => SourceType::CommandLine,
            SourceKind::Sql { .. } => SourceType::Sql,
            SourceKind::Jmx { .. } => SourceType::Jmx,
            SourceKind::Jawk { .. } => SourceType::Jawk,
            SourceKind::Copy { .. } => SourceType::Copy,
            SourceKind::StaticValue { .. } => SourceType::StaticValue,
            SourceKind::TableJoin { .. } => SourceType::TableJoin,
            SourceKind::TableUnion { .. } => SourceType::TableUnion,
            SourceKind::InternalDbQuery { .. } => SourceType::InternalDbQuery,
            SourceKind::File { .. } => SourceType::File,
            SourceKind::EventLog { .. } => SourceType::EventLog,
        }
    }
}

impl Source {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            key: String::new(),
            force_serialization: false,
            computes: Vec::new(),
            kind,
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.kind.source_type()
    }

    /// Keys of every source referenced anywhere in this definition, computes included
    pub fn references(&self, prefix: Option<&str>) -> Vec<String> {
        // key holds this source's own path, leave it out of the scan
        let scanned = (&self.kind, &self.computes);
        match serde_json::to_string(&scanned) {
            Ok(text) => reference::referenced_sources(&text, prefix),
            Err(_) => Vec::new(),
        }
    }

    /// Rewrites every free-text field of the protocol part
    ///
    /// Table names of combinators (`from`, `left_table`, ...) are not content and stay as
    /// written; they are resolved as table lookups at execution time.
    pub fn update(&mut self, f: &dyn Fn(&str) -> String) {
        let apply = |s: &mut String| *s = f(s);
        let apply_opt = |s: &mut Option<String>| {
            if let Some(s) = s.as_mut() {
                *s = f(s);
            }
        };

        match &mut self.kind {
            SourceKind::Http {
                url,
                path,
                header,
                body,
                ..
            } => {
                apply_opt(url);
                apply_opt(path);
                apply_opt(header);
                apply_opt(body);
            }
            SourceKind::SnmpGet { oid } | SourceKind::SnmpTable { oid, .. } => apply(oid),
            SourceKind::Wmi { query, namespace } | SourceKind::Wbem { query, namespace } => {
                apply(query);
                apply_opt(namespace);
            }
            SourceKind::Ipmi {} => {}
            SourceKind::CommandLine {
                command_line,
                keep_only_regexp,
                ..
            } => {
                apply(command_line);
                apply_opt(keep_only_regexp);
            }
            SourceKind::Sql { query } | SourceKind::InternalDbQuery { query } => apply(query),
            SourceKind::Jmx { object_name, .. } => apply(object_name),
            SourceKind::Jawk { script, input, .. } => {
                apply(script);
                apply_opt(input);
            }
            SourceKind::StaticValue { value } => apply(value),
            SourceKind::TableJoin {
                default_right_line, ..
            } => apply_opt(default_right_line),
            SourceKind::Copy { .. } | SourceKind::TableUnion { .. } => {}
            SourceKind::File { paths, .. } => paths.iter_mut().for_each(apply),
            SourceKind::EventLog { log_name, .. } => apply(log_name),
        }
    }
}

/// Sources of a job, in the order they were declared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMap(Vec<(String, Source)>);

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a source, keeping the original position on replace
    pub fn insert(&mut self, name: impl Into<String>, source: Source) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = source,
            None => self.0.push((name, source)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Source)> {
        self.0.iter().map(|(n, s)| (n, s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Source)> {
        self.0.iter_mut().map(|(n, s)| (&*n, s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, Source)> for SourceMap {
    fn from_iter<T: IntoIterator<Item = (N, Source)>>(iter: T) -> Self {
        let mut map = SourceMap::new();
        for (name, source) in iter {
            map.insert(name, source);
        }
        map
    }
}

impl Serialize for SourceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, source) in &self.0 {
            map.serialize_entry(name, source)?;
        }
        map.end()
    }
}

struct SourceMapVisitor;

impl<'de> Visitor<'de> for SourceMapVisitor {
    type Value = SourceMap;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of source name to source definition")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = SourceMap::new();
        while let Some((name, source)) = access.next_entry::<String, Source>()? {
            map.insert(name, source);
        }
        Ok(map)
    }
}

impl<'de> Deserialize<'de> for SourceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SourceMapVisitor)
    }
}
