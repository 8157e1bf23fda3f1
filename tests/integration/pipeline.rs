//! Source execution, computes and mapping of a single job

use std::sync::Arc;

use guardia_engine::{
    SourceTable,
    connector::JobKind,
    strategy::{DetectionStrategy, JobRunner, Strategy},
};
use pretty_assertions::assert_eq;

use crate::helpers::{FakeSnmp, connector, context, host_configuration, telemetry, to_rows};

const T0: i64 = 1_700_000_000_000;

fn copy_connector(oid: &str) -> guardia_engine::connector::Connector {
    connector(serde_json::json!({
        "id": "Pipeline",
        "monitors": {
            "fan": {
                "discovery": {
                    "sources": {
                        "copied": { "type": "copy", "from": "${source::raw}" },
                        "raw": { "type": "snmpTable", "oid": oid }
                    },
                    "mapping": {
                        "source": "${source::copied}",
                        "attributes": { "id": "$1", "name": "Fan $1" },
                        "metrics": { "hw.fan.speed": "$2" }
                    }
                }
            }
        }
    }))
}

#[tokio::test]
async fn test_copy_runs_after_the_source_it_references() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.respond("fans", &[&["f1", "3000"], &["f2", "4200"]]);
    let connector = copy_connector("fans");
    let telemetry = telemetry(host_configuration(), vec![connector.clone()]);
    let ctx = context(&telemetry, &snmp, T0);

    DetectionStrategy::new(ctx.clone()).run().await;
    let job = &connector.monitors["fan"];
    JobRunner::new(&ctx, &connector, JobKind::Discovery).run("fan", job);

    let namespace = telemetry.connector_namespace("Pipeline");
    let raw = namespace
        .get_source_table("monitors.fan.discovery.sources.raw")
        .unwrap();
    let copied = namespace
        .get_source_table("monitors.fan.discovery.sources.copied")
        .unwrap();
    assert_eq!(raw.table, to_rows(&[&["f1", "3000"], &["f2", "4200"]]));
    assert_eq!(copied, raw);

    let fan = telemetry.find_monitor("fan", "Pipeline_fan_f1").unwrap();
    assert_eq!(fan.attribute("name"), Some("Fan f1"));
    assert_eq!(fan.attribute("connector_id"), Some("Pipeline"));
    assert_eq!(fan.metric_value("hw.fan.speed"), Some(3000.0));
    assert_eq!(fan.discovery_time, Some(T0));
}

#[tokio::test]
async fn test_failing_extension_yields_an_empty_table() {
    for oid in ["fail", "panic"] {
        let snmp = Arc::new(FakeSnmp::new());
        let connector = copy_connector(oid);
        let telemetry = telemetry(host_configuration(), vec![connector.clone()]);
        let ctx = context(&telemetry, &snmp, T0);

        JobRunner::new(&ctx, &connector, JobKind::Discovery).run("fan", &connector.monitors["fan"]);

        let raw = telemetry
            .connector_namespace("Pipeline")
            .get_source_table("monitors.fan.discovery.sources.raw");
        assert_eq!(raw, Some(SourceTable::empty()), "oid {oid}");
        assert!(telemetry.find_monitors_by_type("fan").is_empty());
    }
}

#[tokio::test]
async fn test_source_that_stops_answering_is_retried_once() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.respond("fans", &[&["f1", "3000"]]);
    let connector = copy_connector("fans");
    let telemetry = telemetry(host_configuration(), vec![connector.clone()]);
    let job = &connector.monitors["fan"];

    let ctx = context(&telemetry, &snmp, T0);
    JobRunner::new(&ctx, &connector, JobKind::Discovery).run("fan", job);
    assert_eq!(snmp.requests().len(), 1);

    snmp.forget("fans");
    let ctx = context(&telemetry, &snmp, T0 + 1);
    JobRunner::new(&ctx, &connector, JobKind::Discovery).run("fan", job);
    assert_eq!(snmp.requests(), vec!["fans", "fans", "fans"]);
}

#[tokio::test]
async fn test_computes_and_variables_shape_the_mapped_values() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.respond("psu.public", &[&["p1", "0x1F", "ignored"], &["p2", "0x0A", "ignored"]]);
    let connector = connector(serde_json::json!({
        "id": "Power",
        "monitors": {
            "power_supply": {
                "discovery": {
                    "sources": {
                        "supplies": {
                            "type": "snmpTable",
                            "oid": "psu.${var::community}",
                            "computes": [
                                { "type": "convert", "column": 2, "conversion": "hex2Decimal" },
                                { "type": "keepColumns", "column_numbers": "1,2" },
                                { "type": "multiply", "column": 2, "value": "10" }
                            ]
                        }
                    },
                    "mapping": {
                        "source": "${source::supplies}",
                        "attributes": { "id": "$1" },
                        "metrics": { "hw.power_supply.limit": "$2" }
                    }
                }
            }
        }
    }));
    let mut configuration = host_configuration();
    configuration.connector_variables.insert(
        "Power".to_string(),
        [("community".to_string(), "public".to_string())].into(),
    );
    let telemetry = telemetry(configuration, vec![connector.clone()]);
    let ctx = context(&telemetry, &snmp, T0);

    JobRunner::new(&ctx, &connector, JobKind::Discovery)
        .run("power_supply", &connector.monitors["power_supply"]);

    assert_eq!(snmp.requests(), vec!["psu.public"]);
    let p1 = telemetry
        .find_monitor("power_supply", "Power_power_supply_p1")
        .unwrap();
    let p2 = telemetry
        .find_monitor("power_supply", "Power_power_supply_p2")
        .unwrap();
    assert_eq!(p1.metric_value("hw.power_supply.limit"), Some(310.0));
    assert_eq!(p2.metric_value("hw.power_supply.limit"), Some(100.0));
}

#[tokio::test]
async fn test_reference_inlines_the_computed_table() {
    let snmp = Arc::new(FakeSnmp::new());
    snmp.respond("a;c;", &[&["f1", "2500"]]);
    let connector = connector(serde_json::json!({
        "id": "Pipeline",
        "monitors": {
            "fan": {
                "discovery": {
                    "sources": {
                        "base": {
                            "type": "static",
                            "value": "a;b",
                            "computes": [
                                { "type": "replace", "column": 2, "existing_value": "b", "new_value": "c" }
                            ]
                        },
                        "fans": { "type": "snmpTable", "oid": "${source::base}" }
                    },
                    "mapping": {
                        "source": "${source::fans}",
                        "attributes": { "id": "$1" },
                        "metrics": { "hw.fan.speed": "$2" }
                    }
                }
            }
        }
    }));
    let telemetry = telemetry(host_configuration(), vec![connector.clone()]);
    let ctx = context(&telemetry, &snmp, T0);

    JobRunner::new(&ctx, &connector, JobKind::Discovery).run("fan", &connector.monitors["fan"]);

    assert_eq!(snmp.requests(), vec!["a;c;"]);
    let fan = telemetry.find_monitor("fan", "Pipeline_fan_f1").unwrap();
    assert_eq!(fan.metric_value("hw.fan.speed"), Some(2500.0));
}
