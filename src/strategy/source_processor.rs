//! Execution of a single source
//!
//! ```text
//! definition ──clone──▶ copy ──substitute──▶ dispatch ──▶ computes ──▶ namespace
//!                                   │
//!                     builtin (copy, static, join, union)
//!                     or protocol extension (optionally serialized)
//! ```

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::compute_processor::{self, ComputeProcessor};
use crate::connector::{Source, SourceKind};
use crate::extension::ExtensionManager;
use crate::reference::ReferenceResolver;
use crate::table::{SourceTable, TABLE_SEP};
use crate::telemetry::{ConnectorNamespace, TelemetryManager};

pub struct SourceProcessor<'a> {
    telemetry: &'a TelemetryManager,
    extensions: &'a ExtensionManager,
    namespace: &'a ConnectorNamespace,
    attributes: Option<&'a BTreeMap<String, String>>,
}

impl<'a> SourceProcessor<'a> {
    pub fn new(
        telemetry: &'a TelemetryManager,
        extensions: &'a ExtensionManager,
        namespace: &'a ConnectorNamespace,
    ) -> Self {
        Self {
            telemetry,
            extensions,
            namespace,
            attributes: None,
        }
    }

    /// Attribute context of the monitor a mono-instance collect runs for
    pub fn with_attributes(mut self, attributes: Option<&'a BTreeMap<String, String>>) -> Self {
        self.attributes = attributes;
        self
    }

    fn connector_id(&self) -> &str {
        self.namespace.connector_id()
    }

    fn resolver(&self, prefix: Option<&str>) -> ReferenceResolver<'a> {
        let variables = self
            .telemetry
            .host_configuration()
            .connector_variables
            .get(self.namespace.connector_id());
        ReferenceResolver::new(prefix.map(str::to_string), self.namespace)
            .with_attributes(self.attributes)
            .with_variables(variables)
    }

    /// Runs `source` and its computes, stores the result under the source key and returns it
    pub fn process(&self, source: &Source, prefix: Option<&str>) -> SourceTable {
        let resolver = self.resolver(prefix);

        let mut copy = source.clone();
        copy.update(&|text| resolver.resolve(text));

        debug!(
            "{}: begin of source {} ({})",
            self.connector_id(),
            copy.key,
            copy.source_type()
        );

        let mut table = self.execute(&copy, &resolver);
        let previous = self.namespace.get_source_table(&copy.key);
        if table.is_empty() && previous.as_ref().is_some_and(|p| !p.is_empty()) {
            let delay = self.telemetry.host_configuration().retry_delay();
            debug!(
                "{}: {} returned nothing this time, retrying in {delay:?}",
                self.connector_id(),
                copy.key
            );
            std::thread::sleep(delay);
            table = self.execute(&copy, &resolver);
        }

        debug!(
            "{}: end of source {}:\n{}",
            self.connector_id(),
            copy.key,
            table.to_text_table()
        );

        let mut table = ComputeProcessor::new(&resolver, self.connector_id())
            .process_all(&copy.computes, &copy.key, table);
        table.drop_malformed_rows();

        self.namespace.add_source_table(copy.key.clone(), table.clone());
        table
    }

    fn execute(&self, source: &Source, resolver: &ReferenceResolver) -> SourceTable {
        match &source.kind {
            SourceKind::Copy { from } => resolver.lookup_table(from).unwrap_or_else(|| {
                warn!("{}: {} copies an unknown table {from}", self.connector_id(), source.key);
                SourceTable::empty()
            }),
            SourceKind::StaticValue { value } => SourceTable::from_csv(value, TABLE_SEP),
            SourceKind::TableJoin {
                left_table,
                right_table,
                left_key_column,
                right_key_column,
                default_right_line,
            } => {
                let (Some(left), Some(right)) = (
                    resolver.lookup_table(left_table),
                    resolver.lookup_table(right_table),
                ) else {
                    warn!("{}: {} joins a missing table", self.connector_id(), source.key);
                    return SourceTable::empty();
                };
                compute_processor::table_join(
                    &left,
                    &right,
                    *left_key_column,
                    *right_key_column,
                    default_right_line.as_deref(),
                )
            }
            SourceKind::TableUnion { tables } => {
                let tables: Vec<SourceTable> = tables
                    .iter()
                    .filter_map(|name| resolver.lookup_table(name))
                    .collect();
                compute_processor::table_union(tables.iter())
            }
            _ => self.dispatch(source),
        }
    }

    fn dispatch(&self, source: &Source) -> SourceTable {
        let call = || {
            self.extensions
                .process_source(source, self.connector_id(), self.telemetry)
        };

        if source.force_serialization {
            self.telemetry
                .serialization()
                .execute(self.connector_id(), &source.key, call)
        } else {
            call()
        }
    }
}
