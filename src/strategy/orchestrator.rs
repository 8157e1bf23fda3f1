//! Discovery, collect and simple passes
//!
//! ## Pass Layout
//!
//! ```text
//! precondition: endpoint host + at least one connector monitor, otherwise abort
//! for each detected connector (best job priority, then id):
//!     before_all sources
//!     priority jobs  host → enclosure → blade → disk_controller → cpu   (one at a time)
//!     other jobs     bounded worker pool, or one at a time when sequential
//! terminal step (discovery and simple): presence metric on every monitor
//! ```
//!
//! The terminal step runs whatever happened before it: failing or unfinished jobs only leave
//! their monitors untouched, which marks them missing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use super::detection::{ensure_host_monitor, record_host_configured};
use super::job::{JobRunner, is_stale};
use super::source_processor::SourceProcessor;
use super::{
    BlockingJob, PassReport, Strategy, StrategyContext, is_priority_job, job_priority,
    run_blocking_pool,
};
use crate::connector::{Connector, JobKind};
use crate::ordered_sources::OrderedSources;
use crate::reference::BEFORE_ALL_PREFIX;
use crate::telemetry::{CONNECTOR_TYPE, MetricFactory, present_metric_name};

pub struct JobOrchestrator {
    ctx: StrategyContext,
    kind: JobKind,
}

impl JobOrchestrator {
    pub fn new(ctx: StrategyContext, kind: JobKind) -> Self {
        Self { ctx, kind }
    }

    pub fn discovery(ctx: StrategyContext) -> Self {
        Self::new(ctx, JobKind::Discovery)
    }

    pub fn collect(ctx: StrategyContext) -> Self {
        Self::new(ctx, JobKind::Collect)
    }

    pub fn simple(ctx: StrategyContext) -> Self {
        Self::new(ctx, JobKind::Simple)
    }

    /// Connectors whose last detection succeeded, in processing order
    fn detected_connectors(&self) -> Vec<Arc<Connector>> {
        let telemetry = &self.ctx.telemetry;
        let mut connectors: Vec<Arc<Connector>> = telemetry
            .connector_store()
            .connectors()
            .filter(|c| telemetry.host_configuration().is_connector_selected(&c.id))
            .filter(|c| telemetry.connector_namespace(&c.id).is_status_ok() == Some(true))
            .cloned()
            .collect();

        connectors.sort_by_cached_key(|c| {
            let best = c.monitors.keys().map(|t| job_priority(t)).min().unwrap_or(usize::MAX);
            (best, c.id.clone())
        });
        connectors
    }

    /// Monitor types of `connector` this pass runs, split into priority and other types
    fn job_types(&self, connector: &Connector) -> (Vec<String>, Vec<String>) {
        let configuration = self.ctx.telemetry.host_configuration();
        let mut types: Vec<String> = connector
            .monitors
            .iter()
            .filter(|(_, job)| job.task(self.kind).is_some())
            .map(|(monitor_type, _)| monitor_type.clone())
            .filter(|monitor_type| {
                let filtered = configuration.is_monitor_filtered(monitor_type);
                if filtered {
                    debug!("{}: {monitor_type} is filtered out", connector.id);
                }
                !filtered
            })
            .collect();
        types.sort_by_key(|t| job_priority(t));

        types.into_iter().partition(|t| is_priority_job(t))
    }

    fn run_before_all(ctx: &StrategyContext, connector: &Connector) {
        if connector.before_all.is_empty() {
            return;
        }

        let namespace = ctx.telemetry.connector_namespace(&connector.id);
        let processor = SourceProcessor::new(&ctx.telemetry, &ctx.extensions, &namespace);
        let ordered = OrderedSources::new(
            &connector.before_all,
            &[],
            &Default::default(),
            Some(BEFORE_ALL_PREFIX),
        );
        for (_, source) in ordered.iter() {
            processor.process(source, Some(BEFORE_ALL_PREFIX));
        }
    }

    fn job(&self, connector: &Arc<Connector>, monitor_type: &str) -> BlockingJob {
        let ctx = self.ctx.clone();
        let connector = Arc::clone(connector);
        let monitor_type = monitor_type.to_string();
        let kind = self.kind;
        Box::new(move || {
            if let Some(job) = connector.monitors.get(&monitor_type) {
                JobRunner::new(&ctx, &connector, kind).run(&monitor_type, job);
            }
        })
    }

    /// Runs one blocking job to completion, a panic only costs the job itself
    async fn run_one(&self, name: String, job: BlockingJob) -> bool {
        match tokio::task::spawn_blocking(job).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{name} did not complete: {e}");
                false
            }
        }
    }

    async fn run_connector(&self, connector: &Arc<Connector>, report: &mut PassReport) {
        debug!("{}: starting {} jobs", connector.id, self.kind);

        let ctx = self.ctx.clone();
        let before_all = Arc::clone(connector);
        self.run_one(
            format!("{} before all", connector.id),
            Box::new(move || Self::run_before_all(&ctx, &before_all)),
        )
        .await;

        let (priority, others) = self.job_types(connector);

        for monitor_type in &priority {
            let name = format!("{}.{monitor_type}.{}", connector.id, self.kind);
            if self.run_one(name, self.job(connector, monitor_type)).await {
                report.jobs_completed += 1;
            } else {
                report.jobs_incomplete += 1;
            }
        }

        let configuration = self.ctx.telemetry.host_configuration();
        let jobs: Vec<(String, BlockingJob)> = others
            .iter()
            .map(|monitor_type| {
                (
                    format!("{}.{monitor_type}.{}", connector.id, self.kind),
                    self.job(connector, monitor_type),
                )
            })
            .collect();

        if configuration.sequential {
            for (name, job) in jobs {
                if self.run_one(name, job).await {
                    report.jobs_completed += 1;
                } else {
                    report.jobs_incomplete += 1;
                }
            }
        } else {
            let (completed, incomplete) = run_blocking_pool(
                jobs,
                configuration.max_job_workers,
                configuration.job_pool_timeout(),
            )
            .await;
            report.jobs_completed += completed;
            report.jobs_incomplete += incomplete;
        }
    }

    /// Stamps the monitors that stand for the pass itself, so they are never marked missing
    fn touch_structural_monitors(&self) {
        let host = ensure_host_monitor(&self.ctx);
        host.lock().discovery_time = Some(self.ctx.strategy_time);

        for monitor_ref in self.ctx.telemetry.monitor_refs_by_type(CONNECTOR_TYPE) {
            let mut monitor = monitor_ref.lock();
            let detected = monitor.connector_id().is_some_and(|id| {
                self.ctx.telemetry.connector_namespace(id).is_status_ok() == Some(true)
            });
            if detected {
                monitor.discovery_time = Some(self.ctx.strategy_time);
            }
        }
    }

    /// Terminal step: presence metric 1 on monitors touched by this pass, 0 on the others
    pub fn mark_missing_monitors(&self) -> usize {
        let factory = MetricFactory::new(None);
        let mut missing = 0;

        for monitor_ref in self.ctx.telemetry.all_monitor_refs() {
            let mut monitor = monitor_ref.lock();
            let stale = is_stale(&monitor, self.ctx.strategy_time);
            if stale {
                debug!("{} ({}) is missing", monitor.id, monitor.monitor_type);
                missing += 1;
            }
            let name = present_metric_name(&monitor.monitor_type);
            factory.collect_number_metric(
                &mut monitor,
                &name,
                if stale { 0.0 } else { 1.0 },
                self.ctx.strategy_time,
                false,
            );
        }

        missing
    }
}

#[async_trait]
impl Strategy for JobOrchestrator {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    #[instrument(skip_all, fields(job = %self.kind, host = %self.ctx.telemetry.host_configuration().host_id()))]
    async fn run(&self) -> PassReport {
        let telemetry = &self.ctx.telemetry;

        let Some(host) = telemetry.endpoint_host_monitor_ref() else {
            error!("no host monitor, run detection first");
            return PassReport::aborted();
        };
        if telemetry.monitor_refs_by_type(CONNECTOR_TYPE).is_empty() {
            error!("no connector monitor, run detection first");
            return PassReport::aborted();
        }

        if self.kind.discovers() {
            self.touch_structural_monitors();
        }
        record_host_configured(&self.ctx, &host);

        let connectors = self.detected_connectors();
        let mut report = PassReport {
            connectors: connectors.len(),
            ..Default::default()
        };

        for connector in &connectors {
            self.run_connector(connector, &mut report).await;
        }

        if self.kind.discovers() {
            let missing = self.mark_missing_monitors();
            debug!("{missing} monitor(s) marked missing");
        }

        info!(
            "{} pass done: {} connector(s), {} job(s) completed, {} incomplete",
            self.kind, report.connectors, report.jobs_completed, report.jobs_incomplete
        );
        report
    }
}
