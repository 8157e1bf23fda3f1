//! Force serialization of sources within a connector namespace

use std::sync::Arc;
use std::time::Duration;

use guardia_engine::strategy::{DetectionStrategy, JobOrchestrator, Strategy};
use pretty_assertions::assert_eq;

use crate::helpers::{FakeSnmp, connector, context, host_configuration, telemetry};

const T0: i64 = 1_700_000_000_000;
const TYPES: [&str; 6] = ["battery", "fan", "gpu", "memory", "network", "voltage"];

fn serialized_connector(id: &str, force_serialization: bool) -> guardia_engine::connector::Connector {
    let monitors: serde_json::Map<String, serde_json::Value> = TYPES
        .iter()
        .map(|monitor_type| {
            let job = serde_json::json!({
                "discovery": {
                    "sources": {
                        "table": {
                            "type": "snmpTable",
                            "oid": format!("{id}.{monitor_type}"),
                            "force_serialization": force_serialization
                        }
                    },
                    "mapping": { "source": "${source::table}", "attributes": { "id": "$1" } }
                }
            });
            (monitor_type.to_string(), job)
        })
        .collect();
    connector(serde_json::json!({ "id": id, "monitors": monitors }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serialized_sources_never_overlap() {
    let snmp = Arc::new(FakeSnmp::with_delay(Duration::from_millis(20)));
    for monitor_type in TYPES {
        snmp.respond(&format!("Serial.{monitor_type}"), &[&["1"]]);
    }
    let telemetry = telemetry(host_configuration(), vec![serialized_connector("Serial", true)]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    let report = JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(report.jobs_completed, TYPES.len());
    assert_eq!(snmp.requests().len(), TYPES.len());
    assert_eq!(snmp.peak(), 1);
    assert!(telemetry.serialization().is_serialized("Serial"));
    for monitor_type in TYPES {
        assert_eq!(telemetry.find_monitors_by_type(monitor_type).len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serialization_is_scoped_to_the_namespace() {
    let snmp = Arc::new(FakeSnmp::new());
    let telemetry = telemetry(
        host_configuration(),
        vec![
            serialized_connector("Serial", true),
            serialized_connector("Free", false),
        ],
    );

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(snmp.requests().len(), 2 * TYPES.len());
    assert!(telemetry.serialization().is_serialized("Serial"));
    assert!(!telemetry.serialization().is_serialized("Free"));
}
