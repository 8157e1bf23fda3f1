//! Connector detection and connector monitors

use std::sync::Arc;

use guardia_engine::{
    strategy::{
        DetectionStrategy, JobOrchestrator, Strategy,
        detection::{CONNECTOR_STATUS_METRIC, STATUS_INFORMATION},
    },
    telemetry::Metric,
};
use pretty_assertions::assert_eq;

use crate::helpers::{FakeSnmp, connector, context, host_configuration, storage_connector, telemetry};

const T0: i64 = 1_700_000_000_000;

fn status_of(telemetry: &guardia_engine::telemetry::TelemetryManager, id: &str) -> Option<String> {
    match telemetry
        .find_monitor("connector", id)?
        .metric(CONNECTOR_STATUS_METRIC)
    {
        Some(Metric::StateSet(status)) => Some(status.value.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn test_detected_connector_gets_a_monitor() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.reach("1.3.6.1.4.1.674");
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    let report = DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(report.connectors, 1);
    assert_eq!(telemetry.connector_namespace("StorageArray").is_status_ok(), Some(true));
    assert_eq!(status_of(&telemetry, "server-1@StorageArray").as_deref(), Some("ok"));

    let monitor = telemetry
        .find_monitor("connector", "server-1@StorageArray")
        .unwrap();
    assert_eq!(monitor.attribute("name"), Some("Storage Array"));
    assert_eq!(monitor.parent_id.as_deref(), Some("server-1"));
    assert!(
        monitor.legacy_text_parameters[STATUS_INFORMATION].contains("1.3.6.1.4.1.674 answered")
    );

    let host = telemetry.endpoint_host_monitor().unwrap();
    assert_eq!(host.id, "server-1");
    assert_eq!(host.attribute("host.type"), Some("linux"));
}

#[tokio::test]
async fn test_failed_criterion_skips_the_connector() {
    let snmp = Arc::new(FakeSnmp::new());
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    let report = DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(report.connectors, 0);
    assert_eq!(telemetry.connector_namespace("StorageArray").is_status_ok(), Some(false));
    assert!(telemetry.find_monitors_by_type("connector").is_empty());

    // without a connector monitor there is nothing to discover
    let report = JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;
    assert!(report.aborted);
}

#[tokio::test]
async fn test_connector_that_stops_answering_is_reported_failed() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.reach("1.3.6.1.4.1.674");
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);
    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;

    snmp.reachable.lock().clear();
    DetectionStrategy::new(context(&telemetry, &snmp, T0 + 1)).run().await;

    assert_eq!(status_of(&telemetry, "server-1@StorageArray").as_deref(), Some("failed"));
    let monitor = telemetry
        .find_monitor("connector", "server-1@StorageArray")
        .unwrap();
    assert!(
        monitor.legacy_text_parameters[STATUS_INFORMATION].contains("did not answer")
    );

    // jobs of a failed connector do not run
    let report = JobOrchestrator::discovery(context(&telemetry, &snmp, T0 + 2)).run().await;
    assert_eq!(report.connectors, 0);
    assert!(!snmp.requests().contains(&"enclosures".to_string()));
}

#[tokio::test]
async fn test_device_type_criterion() {
    let snmp = Arc::new(FakeSnmp::new());
    let windows_only = connector(serde_json::json!({
        "id": "WindowsOnly",
        "detection": { "criteria": [ { "type": "deviceType", "keep": ["Windows"] } ] }
    }));
    let not_linux = connector(serde_json::json!({
        "id": "NotLinux",
        "detection": { "criteria": [ { "type": "deviceType", "exclude": ["LINUX"] } ] }
    }));
    let any_host = connector(serde_json::json!({
        "id": "AnyHost",
        "detection": { "criteria": [ { "type": "deviceType" } ] }
    }));
    let telemetry = telemetry(host_configuration(), vec![windows_only, not_linux, any_host]);

    let report = DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(report.connectors, 1);
    assert_eq!(report.jobs_completed, 3);
    assert_eq!(telemetry.connector_namespace("AnyHost").is_status_ok(), Some(true));
    assert_eq!(telemetry.connector_namespace("WindowsOnly").is_status_ok(), Some(false));
    assert_eq!(telemetry.connector_namespace("NotLinux").is_status_ok(), Some(false));
}

#[tokio::test]
async fn test_connector_selection_limits_detection() {
    let snmp = Arc::new(FakeSnmp::new());
    let first = connector(serde_json::json!({ "id": "First" }));
    let second = connector(serde_json::json!({ "id": "Second" }));
    let mut configuration = host_configuration();
    configuration.connectors = Some(["Second".to_string()].into());
    let telemetry = telemetry(configuration, vec![first, second]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(telemetry.connector_namespace("First").is_status_ok(), None);
    assert_eq!(status_of(&telemetry, "server-1@Second").as_deref(), Some("ok"));
}
