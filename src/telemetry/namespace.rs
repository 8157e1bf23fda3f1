use std::collections::HashMap;

use parking_lot::RwLock;

use crate::reference::SourceTableLookup;
use crate::table::SourceTable;

/// Per-connector runtime state for one target
///
/// Holds the tables computed by the connector's sources, keyed by canonical source key. Tables
/// outlive a pass so the next execution of a source can compare against its previous result.
#[derive(Debug, Default)]
pub struct ConnectorNamespace {
    connector_id: String,
    source_tables: RwLock<HashMap<String, SourceTable>>,
    status_ok: RwLock<Option<bool>>,
}

impl ConnectorNamespace {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            ..Default::default()
        }
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    pub fn add_source_table(&self, key: impl Into<String>, table: SourceTable) {
        self.source_tables.write().insert(key.into(), table);
    }

    pub fn get_source_table(&self, key: &str) -> Option<SourceTable> {
        self.source_tables.read().get(key).cloned()
    }

    /// Result of the last detection, `None` before the first one
    pub fn is_status_ok(&self) -> Option<bool> {
        *self.status_ok.read()
    }

    pub fn set_status_ok(&self, ok: bool) {
        *self.status_ok.write() = Some(ok);
    }
}

impl SourceTableLookup for ConnectorNamespace {
    fn source_table(&self, key: &str) -> Option<SourceTable> {
        self.get_source_table(key)
    }
}
