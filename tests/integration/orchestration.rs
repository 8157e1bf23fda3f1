//! Detection, discovery and collect passes working together

use std::sync::Arc;
use std::time::Duration;

use guardia_engine::{
    connector::JobKind,
    strategy::{DetectionStrategy, JobOrchestrator, Strategy, job::job_duration_metric},
    telemetry::{Metric, present_metric_name},
};
use pretty_assertions::assert_eq;

use crate::helpers::{
    FakeSnmp, connector, context, host_configuration, storage_connector, storage_responses,
    telemetry,
};

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

const ENCLOSURE: &str = "StorageArray_enclosure_enc-1";
const DISK_1: &str = "StorageArray_physical_disk_d1";
const DISK_2: &str = "StorageArray_physical_disk_d2";

#[tokio::test]
async fn test_passes_require_detection_first() {
    let snmp = Arc::new(FakeSnmp::new());
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    let report = JobOrchestrator::discovery(context(&telemetry, &snmp, T0))
        .run()
        .await;

    assert!(report.aborted);
    assert_eq!(telemetry.monitor_count(), 0);
    assert!(snmp.requests().is_empty());
}

#[tokio::test]
async fn test_discovery_builds_the_monitor_tree() {
    let snmp = Arc::new(FakeSnmp::new());
    storage_responses(&snmp);
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    let report = JobOrchestrator::discovery(context(&telemetry, &snmp, T0 + 1))
        .run()
        .await;

    assert!(!report.aborted);
    assert_eq!(report.connectors, 1);
    assert_eq!(report.jobs_completed, 2);
    assert_eq!(report.jobs_incomplete, 0);

    // enclosure is a priority job, so it is discovered before the disks look it up
    let enclosure = telemetry.find_monitor("enclosure", ENCLOSURE).unwrap();
    assert_eq!(enclosure.attribute("name"), Some("Enclosure enc-1"));
    assert_eq!(enclosure.parent_id.as_deref(), Some("server-1"));

    let disk = telemetry.find_monitor("physical_disk", DISK_1).unwrap();
    assert_eq!(disk.parent_id.as_deref(), Some(ENCLOSURE));
    assert_eq!(disk.attribute("enclosure_name"), Some("Enclosure enc-1"));
    assert_eq!(disk.metric_value("hw.disk.size"), Some(536_870_912.0));
    assert_eq!(disk.alert_rules["hw.disk.errors"].len(), 1);

    for (monitor_type, id) in [
        ("host", "server-1"),
        ("connector", "server-1@StorageArray"),
        ("enclosure", ENCLOSURE),
        ("physical_disk", DISK_1),
        ("physical_disk", DISK_2),
    ] {
        let monitor = telemetry.find_monitor(monitor_type, id).unwrap();
        assert_eq!(
            monitor.metric_value(&present_metric_name(monitor_type)),
            Some(1.0),
            "{id}"
        );
    }

    let host = telemetry.endpoint_host_monitor().unwrap();
    assert_eq!(host.metric_value("metricshub.host.configured"), Some(1.0));
    let duration = job_duration_metric(JobKind::Discovery, "physical_disk", "StorageArray");
    assert!(host.metric(&duration).is_some());
}

#[tokio::test]
async fn test_rediscovery_marks_vanished_monitors_missing() {
    let snmp = Arc::new(FakeSnmp::new());
    storage_responses(&snmp);
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0 + MINUTE))
        .run()
        .await;

    snmp.respond("disks", &[&["d1", "enc-1", "512"]]);
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0 + 2 * MINUTE))
        .run()
        .await;

    let present = present_metric_name("physical_disk");
    let d1 = telemetry.find_monitor("physical_disk", DISK_1).unwrap();
    let d2 = telemetry.find_monitor("physical_disk", DISK_2).unwrap();
    assert_eq!(d1.metric_value(&present), Some(1.0));
    assert_eq!(d2.metric_value(&present), Some(0.0));
    assert!(d2.is_missing());
    assert!(!telemetry.endpoint_host_monitor().unwrap().is_missing());
    assert!(
        !telemetry
            .find_monitor("connector", "server-1@StorageArray")
            .unwrap()
            .is_missing()
    );
}

#[tokio::test]
async fn test_pool_timeout_still_marks_missing_monitors() {
    let snmp = Arc::new(FakeSnmp::new());
    storage_responses(&snmp);
    let mut configuration = host_configuration();
    configuration.job_pool_timeout_secs = 1;
    configuration.sequential = false;
    let telemetry = telemetry(configuration, vec![storage_connector()]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0 + MINUTE))
        .run()
        .await;

    // every request now outlasts the pool timeout, the enclosure job runs outside the pool
    let slow = Arc::new(FakeSnmp::with_delay(Duration::from_secs(2)));
    storage_responses(&slow);
    let report = JobOrchestrator::discovery(context(&telemetry, &slow, T0 + 2 * MINUTE))
        .run()
        .await;
    let enclosure = telemetry.find_monitor("enclosure", ENCLOSURE).unwrap();
    let d1 = telemetry.find_monitor("physical_disk", DISK_1).unwrap();
    let d2 = telemetry.find_monitor("physical_disk", DISK_2).unwrap();
    let host = telemetry.endpoint_host_monitor().unwrap();

    assert!(!report.aborted);
    assert_eq!(report.jobs_completed, 1);
    assert_eq!(report.jobs_incomplete, 1);

    assert_eq!(enclosure.metric_value(&present_metric_name("enclosure")), Some(1.0));
    assert_eq!(host.metric_value(&present_metric_name("host")), Some(1.0));
    for disk in [d1, d2] {
        assert_eq!(
            disk.metric_value(&present_metric_name("physical_disk")),
            Some(0.0),
            "{}",
            disk.id
        );
        assert!(disk.is_missing());
    }
}

#[tokio::test]
async fn test_collect_updates_discovered_monitors() {
    let snmp = Arc::new(FakeSnmp::new());
    storage_responses(&snmp);
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;
    let report = JobOrchestrator::collect(context(&telemetry, &snmp, T0 + MINUTE))
        .run()
        .await;
    assert_eq!(report.jobs_completed, 2);

    // multi-instance: one request for every enclosure, translated to a state
    let enclosure = telemetry.find_monitor("enclosure", ENCLOSURE).unwrap();
    match enclosure.metric("hw.status") {
        Some(Metric::StateSet(status)) => {
            assert_eq!(status.value, "degraded");
            assert_eq!(status.collect_time, T0 + MINUTE);
        }
        other => panic!("unexpected hw.status: {other:?}"),
    }

    // mono-instance: one request per disk, with its id substituted
    let requests = snmp.requests();
    assert!(requests.contains(&"disk-errors.d1".to_string()));
    assert!(requests.contains(&"disk-errors.d2".to_string()));
    let d1 = telemetry.find_monitor("physical_disk", DISK_1).unwrap();
    let d2 = telemetry.find_monitor("physical_disk", DISK_2).unwrap();
    assert_eq!(d1.metric_value("hw.disk.errors"), Some(3.0));
    assert_eq!(d2.metric_value("hw.disk.errors"), Some(12.0));

    // collect never marks anything missing
    assert!(d1.metric_value(&present_metric_name("physical_disk")) == Some(1.0));
}

#[tokio::test]
async fn test_collect_keeps_previous_samples() {
    let snmp = Arc::new(FakeSnmp::new());
    storage_responses(&snmp);
    let telemetry = telemetry(host_configuration(), vec![storage_connector()]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::collect(context(&telemetry, &snmp, T0 + MINUTE)).run().await;
    snmp.respond("disk-errors.d1", &[&["5"]]);
    JobOrchestrator::collect(context(&telemetry, &snmp, T0 + 2 * MINUTE)).run().await;

    let d1 = telemetry.find_monitor("physical_disk", DISK_1).unwrap();
    match d1.metric("hw.disk.errors") {
        Some(Metric::Number(errors)) => {
            assert_eq!(errors.value, 5.0);
            assert_eq!(errors.previous_value, Some(3.0));
            assert_eq!(errors.previous_collect_time, Some(T0 + MINUTE));
        }
        other => panic!("unexpected hw.disk.errors: {other:?}"),
    }
}

#[tokio::test]
async fn test_excluded_monitor_types_are_skipped() {
    let snmp = Arc::new(FakeSnmp::new());
    storage_responses(&snmp);
    let mut configuration = host_configuration();
    configuration.excluded_monitors = Some(["physical_disk".to_string()].into());
    let telemetry = telemetry(configuration, vec![storage_connector()]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    let report = JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(report.jobs_completed, 1);
    assert!(telemetry.find_monitor("enclosure", ENCLOSURE).is_some());
    assert!(telemetry.find_monitors_by_type("physical_disk").is_empty());
    assert!(!snmp.requests().contains(&"disks".to_string()));
}

#[tokio::test]
async fn test_host_connector_enriches_the_endpoint() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.respond("system", &[&["srv-01", "PowerEdge R740", "2400"]]);
    let connector = connector(serde_json::json!({
        "id": "HostInfo",
        "monitors": {
            "host": {
                "discovery": {
                    "sources": { "system": { "type": "snmpGet", "oid": "system" } },
                    "mapping": {
                        "source": "${source::system}",
                        "attributes": { "id": "$1", "model": "$2" },
                        "metrics": { "hw.cpu.speed.limit": "megaHertz2Hertz($3)" }
                    }
                }
            }
        }
    }));
    let telemetry = telemetry(host_configuration(), vec![connector]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;

    let hosts = telemetry.find_monitors_by_type("host");
    assert_eq!(hosts.len(), 1);
    let host = &hosts["server-1"];
    assert_eq!(host.attribute("id"), Some("server-1"));
    assert_eq!(host.attribute("model"), Some("PowerEdge R740"));
    assert_eq!(host.metric_value("hw.cpu.speed.limit"), Some(2_400_000_000.0));
}

#[tokio::test]
async fn test_sequential_configuration_runs_jobs_in_priority_order() {
    let snmp = Arc::new(FakeSnmp::new());
    let connector = connector(serde_json::json!({
        "id": "Ordered",
        "monitors": {
            "fan": {
                "discovery": {
                    "sources": { "s": { "type": "snmpTable", "oid": "fan" } },
                    "mapping": { "source": "${source::s}", "attributes": { "id": "$1" } }
                }
            },
            "cpu": {
                "discovery": {
                    "sources": { "s": { "type": "snmpTable", "oid": "cpu" } },
                    "mapping": { "source": "${source::s}", "attributes": { "id": "$1" } }
                }
            },
            "enclosure": {
                "discovery": {
                    "sources": { "s": { "type": "snmpTable", "oid": "enclosure" } },
                    "mapping": { "source": "${source::s}", "attributes": { "id": "$1" } }
                }
            },
            "battery": {
                "discovery": {
                    "sources": { "s": { "type": "snmpTable", "oid": "battery" } },
                    "mapping": { "source": "${source::s}", "attributes": { "id": "$1" } }
                }
            }
        }
    }));
    let mut configuration = host_configuration();
    configuration.sequential = true;
    let telemetry = telemetry(configuration, vec![connector]);

    DetectionStrategy::new(context(&telemetry, &snmp, T0)).run().await;
    JobOrchestrator::discovery(context(&telemetry, &snmp, T0)).run().await;

    assert_eq!(snmp.requests(), vec!["enclosure", "cpu", "battery", "fan"]);
}
