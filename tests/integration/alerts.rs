//! Alert rules firing through collect passes

use std::sync::Arc;

use guardia_engine::{
    alert::{AlertInfo, AlertRuleState, AlertTrigger, Severity},
    strategy::{DetectionStrategy, JobOrchestrator, Strategy, StrategyContext},
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use crate::helpers::{FakeSnmp, context, host_configuration, storage_connector, storage_responses, telemetry};

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;
const DISK_2: &str = "StorageArray_physical_disk_d2";

struct AlertHarness {
    snmp: Arc<FakeSnmp>,
    telemetry: Arc<guardia_engine::telemetry::TelemetryManager>,
    fired: Arc<Mutex<Vec<AlertInfo>>>,
}

impl AlertHarness {
    async fn discovered() -> Self {
        let snmp = Arc::new(FakeSnmp::new());
        storage_responses(&snmp);
        let telemetry = telemetry(host_configuration(), vec![storage_connector()]);
        let harness = Self {
            snmp,
            telemetry,
            fired: Arc::new(Mutex::new(Vec::new())),
        };

        DetectionStrategy::new(harness.ctx(T0)).run().await;
        JobOrchestrator::discovery(harness.ctx(T0)).run().await;
        harness
    }

    fn ctx(&self, time: i64) -> StrategyContext {
        let fired = Arc::clone(&self.fired);
        let trigger: AlertTrigger = Arc::new(move |info: &AlertInfo| fired.lock().push(info.clone()));
        context(&self.telemetry, &self.snmp, time).with_trigger(Some(trigger))
    }

    async fn collect(&self, time: i64) {
        JobOrchestrator::collect(self.ctx(time)).run().await;
    }

    fn fired(&self) -> Vec<AlertInfo> {
        self.fired.lock().clone()
    }
}

#[tokio::test]
async fn test_alert_fires_once_after_the_period() {
    let harness = AlertHarness::discovered().await;

    harness.collect(T0 + MINUTE).await;
    assert!(harness.fired().is_empty());

    harness.collect(T0 + 2 * MINUTE).await;
    let fired = harness.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].monitor_id, DISK_2);
    assert_eq!(fired[0].metric, "hw.disk.errors");
    assert_eq!(fired[0].value, Some(12.0));
    assert_eq!(fired[0].severity, Severity::Alarm);
    assert_eq!(fired[0].first_trigger_timestamp, Some(T0 + MINUTE));
    assert_eq!(fired[0].triggered_at, T0 + 2 * MINUTE);

    harness.collect(T0 + 3 * MINUTE).await;
    assert_eq!(harness.fired().len(), 1);

    let disk = harness
        .telemetry
        .find_monitor("physical_disk", DISK_2)
        .unwrap();
    assert_eq!(
        disk.alert_rule_states("hw.disk.errors", T0 + 3 * MINUTE),
        vec![AlertRuleState::Active]
    );
}

#[tokio::test]
async fn test_recovery_rearms_the_rule() {
    let harness = AlertHarness::discovered().await;

    harness.collect(T0 + MINUTE).await;
    harness.collect(T0 + 2 * MINUTE).await;
    assert_eq!(harness.fired().len(), 1);

    harness.snmp.respond("disk-errors.d2", &[&["2"]]);
    harness.collect(T0 + 3 * MINUTE).await;

    harness.snmp.respond("disk-errors.d2", &[&["15"]]);
    harness.collect(T0 + 4 * MINUTE).await;
    assert_eq!(harness.fired().len(), 1);

    harness.collect(T0 + 5 * MINUTE).await;
    let fired = harness.fired();
    assert_eq!(fired.len(), 2);
    assert_eq!(fired[1].value, Some(15.0));
    assert_eq!(fired[1].first_trigger_timestamp, Some(T0 + 4 * MINUTE));
}

#[tokio::test]
async fn test_rediscovery_keeps_the_debounce_state() {
    let harness = AlertHarness::discovered().await;

    harness.collect(T0 + MINUTE).await;
    harness.collect(T0 + 2 * MINUTE).await;
    assert_eq!(harness.fired().len(), 1);

    JobOrchestrator::discovery(harness.ctx(T0 + 2 * MINUTE + 1))
        .run()
        .await;
    harness.collect(T0 + 3 * MINUTE).await;

    assert_eq!(harness.fired().len(), 1);
    let disk = harness
        .telemetry
        .find_monitor("physical_disk", DISK_2)
        .unwrap();
    let rules = &disk.alert_rules["hw.disk.errors"];
    assert_eq!(rules.len(), 1);
    assert!(rules[0].triggered());
    assert_eq!(rules[0].first_trigger_timestamp(), Some(T0 + MINUTE));
}

#[tokio::test]
async fn test_healthy_metric_never_fires() {
    let harness = AlertHarness::discovered().await;

    for step in 1..=4 {
        harness.collect(T0 + step * MINUTE).await;
    }

    assert!(harness.fired().iter().all(|info| info.monitor_id == DISK_2));
    let disk_1 = harness
        .telemetry
        .find_monitor("physical_disk", "StorageArray_physical_disk_d1")
        .unwrap();
    assert!(!disk_1.alert_rules["hw.disk.errors"][0].triggered());
}
