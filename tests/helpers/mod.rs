//! Shared fixtures: a scriptable protocol extension and connector builders

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use guardia_engine::{
    EngineError, EngineResult, SourceTable,
    config::HostConfiguration,
    connector::{
        Connector, ConnectorStore, Criterion, CriterionKind, CriterionTestResult, CriterionType,
        Source, SourceKind, SourceType,
    },
    extension::{ExtensionManager, ProtocolExtension},
    strategy::StrategyContext,
    telemetry::TelemetryManager,
};
use parking_lot::Mutex;

/// SNMP-like extension answering from a table of canned responses
///
/// - an OID mapped in `responses` returns that table
/// - `fail` returns an error, `panic` panics
/// - any other OID returns an empty table
#[derive(Default)]
pub struct FakeSnmp {
    responses: Mutex<HashMap<String, SourceTable>>,
    /// OIDs in the order they were requested
    pub requests: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    /// Criterion OIDs answering successfully
    pub reachable: Mutex<HashSet<String>>,
}

impl FakeSnmp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn respond(&self, oid: &str, rows: &[&[&str]]) {
        self.responses
            .lock()
            .insert(oid.to_string(), SourceTable::from_rows(to_rows(rows)));
    }

    pub fn forget(&self, oid: &str) {
        self.responses.lock().remove(oid);
    }

    pub fn reach(&self, oid: &str) {
        self.reachable.lock().insert(oid.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl ProtocolExtension for FakeSnmp {
    fn identifier(&self) -> &str {
        "snmp"
    }

    fn is_valid_configuration(&self, configuration: &serde_json::Value) -> bool {
        configuration.get("community").is_some()
    }

    fn supported_sources(&self) -> HashSet<SourceType> {
        HashSet::from([SourceType::SnmpGet, SourceType::SnmpTable])
    }

    fn supported_criteria(&self) -> HashSet<CriterionType> {
        HashSet::from([CriterionType::SnmpGetNext])
    }

    fn process_source(
        &self,
        source: &Source,
        _connector_id: &str,
        _telemetry: &TelemetryManager,
    ) -> EngineResult<SourceTable> {
        let oid = match &source.kind {
            SourceKind::SnmpGet { oid } | SourceKind::SnmpTable { oid, .. } => oid.clone(),
            _ => return Err(EngineError::UnsupportedSource(source.source_type().to_string())),
        };
        self.requests.lock().push(oid.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match oid.as_str() {
            "fail" => Err(EngineError::Protocol("request timed out".to_string())),
            "panic" => panic!("snmp client crashed"),
            _ => Ok(self.responses.lock().get(&oid).cloned().unwrap_or_default()),
        }
    }

    fn process_criterion(
        &self,
        criterion: &Criterion,
        _connector_id: &str,
        _telemetry: &TelemetryManager,
    ) -> EngineResult<CriterionTestResult> {
        let CriterionKind::SnmpGetNext { oid, .. } = &criterion.kind else {
            return Ok(CriterionTestResult::failure("not an SNMP criterion"));
        };
        if self.reachable.lock().contains(oid) {
            Ok(CriterionTestResult::success(format!("{oid} answered")).with_result("1"))
        } else {
            Ok(CriterionTestResult::failure(format!("{oid} did not answer")))
        }
    }

    fn check_protocol(&self, _telemetry: &TelemetryManager) -> EngineResult<bool> {
        Ok(true)
    }
}

pub fn to_rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

pub fn host_configuration() -> HostConfiguration {
    let mut configuration = HostConfiguration::new("server-1");
    configuration.retry_delay_ms = 1;
    configuration.job_pool_timeout_secs = 10;
    configuration.force_serialization_timeout_secs = 10;
    configuration
}

/// Parses a connector from JSON and prepares it the way the loader does
pub fn connector(value: serde_json::Value) -> Connector {
    let mut connector: Connector = serde_json::from_value(value).unwrap();
    connector.prepare().unwrap();
    connector
}

pub fn telemetry(configuration: HostConfiguration, connectors: Vec<Connector>) -> Arc<TelemetryManager> {
    let mut store = ConnectorStore::new();
    for connector in connectors {
        store.add(connector);
    }
    Arc::new(TelemetryManager::new(configuration, Arc::new(store)))
}

pub fn context(
    telemetry: &Arc<TelemetryManager>,
    snmp: &Arc<FakeSnmp>,
    strategy_time: i64,
) -> StrategyContext {
    let extensions = ExtensionManager::new().with_extension(snmp.clone());
    StrategyContext::new(Arc::clone(telemetry), Arc::new(extensions)).with_strategy_time(strategy_time)
}

/// Enclosure and disk connector detected through an SNMP criterion
pub fn storage_connector() -> Connector {
    connector(serde_json::json!({
        "id": "StorageArray",
        "display_name": "Storage Array",
        "detection": {
            "criteria": [
                { "type": "deviceType", "keep": ["linux", "storage"] },
                { "type": "snmpGetNext", "oid": "1.3.6.1.4.1.674" }
            ]
        },
        "metrics": {
            "hw.status": { "type": { "stateSet": ["ok", "degraded", "failed"] } },
            "hw.disk.errors": { "type": "counter" }
        },
        "monitors": {
            "enclosure": {
                "discovery": {
                    "sources": {
                        "enclosures": { "type": "snmpTable", "oid": "enclosures" }
                    },
                    "mapping": {
                        "source": "${source::enclosures}",
                        "attributes": { "id": "$1", "name": "Enclosure $1" }
                    }
                },
                "collect": {
                    "sources": {
                        "status": {
                            "type": "snmpTable",
                            "oid": "enclosure-status",
                            "computes": [
                                {
                                    "type": "translate",
                                    "column": 2,
                                    "translation_table": { "1": "ok", "2": "degraded", "default": "failed" }
                                }
                            ]
                        }
                    },
                    "mapping": {
                        "source": "${source::status}",
                        "attributes": { "id": "$1" },
                        "metrics": { "hw.status": "$2" }
                    }
                }
            },
            "physical_disk": {
                "discovery": {
                    "sources": {
                        "disks": { "type": "snmpTable", "oid": "disks" },
                        "withEnclosure": {
                            "type": "tableJoin",
                            "left_table": "${source::disks}",
                            "right_table": "${source::monitors.enclosure.discovery.sources.enclosures}",
                            "left_key_column": 2,
                            "right_key_column": 1
                        }
                    },
                    "mapping": {
                        "source": "${source::withEnclosure}",
                        "attributes": {
                            "id": "$1",
                            "hw.parent.type": "enclosure",
                            "hw.parent.id": "$2",
                            "enclosure_name": "lookup(\"enclosure\", \"name\", \"id\", $2)"
                        },
                        "metrics": { "hw.disk.size": "mebiByte2Byte($3)" }
                    }
                },
                "collect": {
                    "collect_type": "monoInstance",
                    "sources": {
                        "errors": { "type": "snmpGet", "oid": "disk-errors.%id%" }
                    },
                    "mapping": {
                        "source": "${source::errors}",
                        "metrics": { "hw.disk.errors": "$1" }
                    }
                },
                "alert_rules": {
                    "hw.disk.errors": [
                        {
                            "conditions": [ { "operator": ">=", "threshold": 10 } ],
                            "period_secs": 60,
                            "severity": "alarm"
                        }
                    ]
                }
            }
        }
    }))
}

/// Canned answers matching [`storage_connector`]
pub fn storage_responses(snmp: &FakeSnmp) {
    snmp.reach("1.3.6.1.4.1.674");
    snmp.respond("enclosures", &[&["enc-1", "PowerVault"]]);
    snmp.respond("enclosure-status", &[&["enc-1", "2"]]);
    snmp.respond("disks", &[&["d1", "enc-1", "512"], &["d2", "enc-1", "1024"]]);
    snmp.respond("disk-errors.d1", &[&["3"]]);
    snmp.respond("disk-errors.d2", &[&["12"]]);
}

pub fn attributes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
