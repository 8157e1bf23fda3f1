//! In-memory telemetry store of one monitored host
//!
//! The [`TelemetryManager`] is the context object threaded through every strategy: it owns the
//! host configuration, the shared connector store, the monitors discovered on the host, the
//! per-connector namespaces and the force serialization lock table.
//!
//! ## Concurrency
//!
//! Workers of a pass share the manager. The monitor index is only write-locked to insert a new
//! monitor; each monitor sits behind its own mutex, taken by the single row-processing call
//! that updates it.

pub mod metric;
pub mod monitor;
pub mod namespace;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::HostConfiguration;
use crate::connector::ConnectorStore;
use crate::serialization::ForceSerializationCoordinator;

pub use metric::{Metric, MetricFactory, NumberMetric, StateSetMetric, present_metric_name};
pub use monitor::{
    CONNECTOR_ID_ATTRIBUTE, CONNECTOR_TYPE, HOST_TYPE, ID_ATTRIBUTE, Monitor,
    PARENT_ID_ATTRIBUTE, PARENT_TYPE_ATTRIBUTE,
};
pub use namespace::ConnectorNamespace;

pub type MonitorRef = Arc<Mutex<Monitor>>;

#[derive(Debug)]
pub struct TelemetryManager {
    host_configuration: HostConfiguration,
    connector_store: Arc<ConnectorStore>,
    /// monitor type -> monitor id -> monitor
    monitors: RwLock<BTreeMap<String, BTreeMap<String, MonitorRef>>>,
    namespaces: RwLock<HashMap<String, Arc<ConnectorNamespace>>>,
    serialization: ForceSerializationCoordinator,
}

impl TelemetryManager {
    pub fn new(host_configuration: HostConfiguration, connector_store: Arc<ConnectorStore>) -> Self {
        let serialization =
            ForceSerializationCoordinator::new(host_configuration.force_serialization_timeout());
        Self {
            host_configuration,
            connector_store,
            monitors: RwLock::new(BTreeMap::new()),
            namespaces: RwLock::new(HashMap::new()),
            serialization,
        }
    }

    pub fn host_configuration(&self) -> &HostConfiguration {
        &self.host_configuration
    }

    pub fn connector_store(&self) -> &ConnectorStore {
        &self.connector_store
    }

    pub fn serialization(&self) -> &ForceSerializationCoordinator {
        &self.serialization
    }

    /// Namespace of a connector on this host, created on first use
    pub fn connector_namespace(&self, connector_id: &str) -> Arc<ConnectorNamespace> {
        if let Some(namespace) = self.namespaces.read().get(connector_id) {
            return Arc::clone(namespace);
        }

        let mut namespaces = self.namespaces.write();
        Arc::clone(
            namespaces
                .entry(connector_id.to_string())
                .or_insert_with(|| Arc::new(ConnectorNamespace::new(connector_id))),
        )
    }

    /// Snapshot of every monitor of a type, keyed by id
    pub fn find_monitors_by_type(&self, monitor_type: &str) -> BTreeMap<String, Monitor> {
        self.monitors
            .read()
            .get(monitor_type)
            .map(|by_id| {
                by_id
                    .iter()
                    .map(|(id, monitor)| (id.clone(), monitor.lock().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn monitor_ref(&self, monitor_type: &str, id: &str) -> Option<MonitorRef> {
        self.monitors
            .read()
            .get(monitor_type)
            .and_then(|by_id| by_id.get(id))
            .cloned()
    }

    pub fn find_monitor(&self, monitor_type: &str, id: &str) -> Option<Monitor> {
        self.monitor_ref(monitor_type, id)
            .map(|monitor| monitor.lock().clone())
    }

    /// Handles to the monitors of a type, for in-place updates
    pub fn monitor_refs_by_type(&self, monitor_type: &str) -> Vec<MonitorRef> {
        self.monitors
            .read()
            .get(monitor_type)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_monitor_refs(&self) -> Vec<MonitorRef> {
        self.monitors
            .read()
            .values()
            .flat_map(|by_id| by_id.values().cloned())
            .collect()
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.read().values().map(BTreeMap::len).sum()
    }

    /// Copy of every monitor, grouped by type
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, Monitor>> {
        let types: Vec<String> = self.monitors.read().keys().cloned().collect();
        types
            .into_iter()
            .map(|monitor_type| {
                let monitors = self.find_monitors_by_type(&monitor_type);
                (monitor_type, monitors)
            })
            .collect()
    }

    /// Returns the monitor with this type and id, inserting `init()` when absent
    pub fn get_or_create_monitor(
        &self,
        monitor_type: &str,
        id: &str,
        init: impl FnOnce() -> Monitor,
    ) -> MonitorRef {
        if let Some(existing) = self.monitor_ref(monitor_type, id) {
            return existing;
        }

        let mut monitors = self.monitors.write();
        Arc::clone(
            monitors
                .entry(monitor_type.to_string())
                .or_default()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    pub fn endpoint_host_monitor(&self) -> Option<Monitor> {
        self.endpoint_host_monitor_ref()
            .map(|monitor| monitor.lock().clone())
    }

    pub fn endpoint_host_monitor_ref(&self) -> Option<MonitorRef> {
        self.monitor_refs_by_type(HOST_TYPE)
            .into_iter()
            .find(|monitor| monitor.lock().is_endpoint)
    }

    /// Resolves the weak parent link of a monitor
    ///
    /// Uses `parent_id` first, then the `hw.parent.type`/`hw.parent.id` attributes, and falls
    /// back to the endpoint host for anything that is not a host itself.
    pub fn find_parent_monitor(&self, monitor: &Monitor) -> Option<Monitor> {
        if let Some(parent_id) = &monitor.parent_id {
            let found = self
                .monitors
                .read()
                .values()
                .find_map(|by_id| by_id.get(parent_id).cloned());
            if let Some(parent) = found {
                return Some(parent.lock().clone());
            }
        }

        if let (Some(parent_type), Some(parent_id)) = (
            monitor.attribute(PARENT_TYPE_ATTRIBUTE),
            monitor.attribute(PARENT_ID_ATTRIBUTE),
        ) {
            let connector_id = monitor.connector_id();
            let found = self
                .find_monitors_by_type(parent_type)
                .into_values()
                .find(|candidate| {
                    candidate.attribute(ID_ATTRIBUTE) == Some(parent_id)
                        && (connector_id.is_none() || candidate.connector_id() == connector_id)
                });
            if found.is_some() {
                return found;
            }
        }

        if monitor.monitor_type == HOST_TYPE {
            return None;
        }
        self.endpoint_host_monitor()
    }
}
