//! Detection pass
//!
//! Decides which connectors apply to the host. A connector is detected when all of its
//! criteria succeed. Detected connectors get a connector monitor, whose status tells the
//! following passes whether to run the connector's jobs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use super::{BlockingJob, PassReport, Strategy, StrategyContext, run_blocking_pool};
use crate::connector::{Connector, Criterion, CriterionKind, CriterionTestResult};
use crate::telemetry::{
    CONNECTOR_ID_ATTRIBUTE, CONNECTOR_TYPE, HOST_TYPE, ID_ATTRIBUTE, MetricFactory, Monitor,
    MonitorRef,
};

pub const CONNECTOR_STATUS_METRIC: &str = "metricshub.connector.status";
pub const STATUS_INFORMATION: &str = "StatusInformation";
pub const HOST_CONFIGURED_METRIC: &str = "metricshub.host.configured";

const STATUS_OK: &str = "ok";
const STATUS_FAILED: &str = "failed";

/// Id of the monitor standing for `connector_id` on host `host_id`
pub fn connector_monitor_id(host_id: &str, connector_id: &str) -> String {
    format!("{host_id}@{connector_id}")
}

/// Returns the endpoint host monitor, creating it from the host configuration when absent
pub fn ensure_host_monitor(ctx: &StrategyContext) -> MonitorRef {
    if let Some(host) = ctx.telemetry.endpoint_host_monitor_ref() {
        return host;
    }

    let configuration = ctx.telemetry.host_configuration();
    let host_id = configuration.host_id().to_string();
    ctx.telemetry.get_or_create_monitor(HOST_TYPE, &host_id, || {
        debug!("creating host monitor {host_id}");
        let mut host = Monitor::new(host_id.clone(), HOST_TYPE);
        host.is_endpoint = true;
        host.add_attributes(&configuration.attributes);
        host.attributes
            .insert(ID_ATTRIBUTE.to_string(), host_id.clone());
        host.attributes
            .insert("host.name".to_string(), configuration.hostname.clone());
        host.attributes
            .insert("host.type".to_string(), configuration.host_type.clone());
        host
    })
}

/// Self-monitoring flag telling exporters the host is configured
pub fn record_host_configured(ctx: &StrategyContext, host: &MonitorRef) {
    if !ctx.telemetry.host_configuration().enable_self_monitoring {
        return;
    }
    let mut host = host.lock();
    MetricFactory::new(None).collect_number_metric(
        &mut host,
        HOST_CONFIGURED_METRIC,
        1.0,
        ctx.strategy_time,
        false,
    );
}

fn test_device_type(
    host_type: &str,
    keep: &BTreeSet<String>,
    exclude: &BTreeSet<String>,
) -> CriterionTestResult {
    let matches = |set: &BTreeSet<String>| {
        set.iter().any(|t| t.eq_ignore_ascii_case(host_type))
    };

    if matches(exclude) {
        CriterionTestResult::failure(format!("host type {host_type} is excluded"))
    } else if !keep.is_empty() && !matches(keep) {
        CriterionTestResult::failure(format!("host type {host_type} is not one of {keep:?}"))
    } else {
        CriterionTestResult::success(format!("host type {host_type} matches"))
    }
}

/// Evaluates one criterion, under the connector's serialization lock when flagged
pub fn test_criterion(
    ctx: &StrategyContext,
    connector_id: &str,
    criterion: &Criterion,
) -> CriterionTestResult {
    if let CriterionKind::DeviceType { keep, exclude } = &criterion.kind {
        return test_device_type(&ctx.telemetry.host_configuration().host_type, keep, exclude);
    }

    let call = || {
        ctx.extensions
            .process_criterion(criterion, connector_id, &ctx.telemetry)
    };
    if criterion.force_serialization {
        ctx.telemetry.serialization().execute(
            connector_id,
            &format!("{} criterion", criterion.criterion_type()),
            call,
        )
    } else {
        call()
    }
}

/// Runs every criterion of `connector`, stopping at the first failure
pub fn test_connector(ctx: &StrategyContext, connector: &Connector) -> (bool, Vec<String>) {
    let mut messages = Vec::new();
    for criterion in &connector.detection.criteria {
        let result = test_criterion(ctx, &connector.id, criterion);
        debug!(
            "{}: {} criterion {}: {}",
            connector.id,
            criterion.criterion_type(),
            if result.success { "succeeded" } else { "failed" },
            result.message
        );
        messages.push(result.message);
        if !result.success {
            return (false, messages);
        }
    }
    (true, messages)
}

fn record_connector_status(
    ctx: &StrategyContext,
    host_id: &str,
    connector: &Connector,
    ok: bool,
    messages: &[String],
) {
    ctx.telemetry
        .connector_namespace(&connector.id)
        .set_status_ok(ok);

    let monitor_id = connector_monitor_id(host_id, &connector.id);
    if !ok && ctx.telemetry.monitor_ref(CONNECTOR_TYPE, &monitor_id).is_none() {
        return;
    }

    let monitor_ref = ctx
        .telemetry
        .get_or_create_monitor(CONNECTOR_TYPE, &monitor_id, || {
            Monitor::new(monitor_id.clone(), CONNECTOR_TYPE)
        });

    let name = connector
        .display_name
        .clone()
        .unwrap_or_else(|| connector.id.clone());
    let attributes = BTreeMap::from([
        (ID_ATTRIBUTE.to_string(), connector.id.clone()),
        (CONNECTOR_ID_ATTRIBUTE.to_string(), connector.id.clone()),
        ("name".to_string(), name),
    ]);
    let states = [STATUS_OK.to_string(), STATUS_FAILED.to_string()];

    let mut monitor = monitor_ref.lock();
    monitor.add_attributes(&attributes);
    monitor.parent_id = Some(host_id.to_string());
    monitor.discovery_time = Some(ctx.strategy_time);
    MetricFactory::new(None).collect_state_set_metric(
        &mut monitor,
        CONNECTOR_STATUS_METRIC,
        if ok { STATUS_OK } else { STATUS_FAILED },
        &states,
        ctx.strategy_time,
    );
    monitor
        .legacy_text_parameters
        .insert(STATUS_INFORMATION.to_string(), messages.join("\n"));
}

pub struct DetectionStrategy {
    ctx: StrategyContext,
}

impl DetectionStrategy {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Strategy for DetectionStrategy {
    fn name(&self) -> &'static str {
        "detection"
    }

    #[instrument(skip_all, fields(host = %self.ctx.telemetry.host_configuration().host_id()))]
    async fn run(&self) -> PassReport {
        let host = ensure_host_monitor(&self.ctx);
        host.lock().discovery_time = Some(self.ctx.strategy_time);
        record_host_configured(&self.ctx, &host);

        let configuration = self.ctx.telemetry.host_configuration();
        let host_id = configuration.host_id().to_string();
        let connectors: Vec<Arc<Connector>> = self
            .ctx
            .telemetry
            .connector_store()
            .connectors()
            .filter(|c| configuration.is_connector_selected(&c.id))
            .cloned()
            .collect();

        let detected = Arc::new(Mutex::new(Vec::new()));
        let jobs: Vec<(String, BlockingJob)> = connectors
            .into_iter()
            .map(|connector| {
                let name = format!("{} detection", connector.id);
                let ctx = self.ctx.clone();
                let host_id = host_id.clone();
                let detected = Arc::clone(&detected);
                let job: BlockingJob = Box::new(move || {
                    let (ok, messages) = test_connector(&ctx, &connector);
                    record_connector_status(&ctx, &host_id, &connector, ok, &messages);
                    if ok {
                        detected.lock().push(connector.id.clone());
                    }
                });
                (name, job)
            })
            .collect();

        let (completed, incomplete) = run_blocking_pool(
            jobs,
            configuration.max_job_workers,
            configuration.job_pool_timeout(),
        )
        .await;

        let detected = detected.lock().clone();
        info!("detected connectors: {detected:?}");

        PassReport {
            connectors: detected.len(),
            jobs_completed: completed,
            jobs_incomplete: incomplete,
            aborted: false,
        }
    }
}
