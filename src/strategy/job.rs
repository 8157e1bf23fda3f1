//! One monitor job of one connector
//!
//! Runs the job's sources in dependency order, then hands the mapping table to the
//! [`MonitorMapper`]. Everything here is synchronous: protocol calls block the worker.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use tracing::{debug, warn};

use super::StrategyContext;
use super::mapping::{MappingProcessor, MonitorMapper, mapping_table};
use super::source_processor::SourceProcessor;
use crate::connector::{CollectType, Connector, JobKind, Mapping, MonitorJob, Task};
use crate::ordered_sources::OrderedSources;
use crate::reference;
use crate::table::SourceTable;
use crate::telemetry::{ConnectorNamespace, HOST_TYPE, MetricFactory, Monitor, MonitorRef};

/// Self-monitoring metric recording how long a job took, in seconds
pub fn job_duration_metric(kind: JobKind, monitor_type: &str, connector_id: &str) -> String {
    format!(
        "metricshub.job.duration{{job.type=\"{kind}\", monitor.type=\"{monitor_type}\", connector_id=\"{connector_id}\"}}"
    )
}

pub struct JobRunner<'a> {
    ctx: &'a StrategyContext,
    connector: &'a Connector,
    kind: JobKind,
}

impl<'a> JobRunner<'a> {
    pub fn new(ctx: &'a StrategyContext, connector: &'a Connector, kind: JobKind) -> Self {
        Self {
            ctx,
            connector,
            kind,
        }
    }

    /// Runs the job of `monitor_type` for this runner's kind, if the connector declares one
    pub fn run(&self, monitor_type: &str, job: &MonitorJob) {
        let started = Instant::now();
        let namespace = self.ctx.telemetry.connector_namespace(&self.connector.id);

        match self.kind {
            JobKind::Discovery | JobKind::Simple => {
                let Some(task) = job.task(self.kind) else {
                    return;
                };
                self.discover(monitor_type, job, task, &namespace);
            }
            JobKind::Collect => {
                let Some(collect) = &job.collect else {
                    return;
                };
                match collect.collect_type {
                    CollectType::MultiInstance => {
                        self.collect_multi_instance(monitor_type, &collect.task, &collect.keys, &namespace)
                    }
                    CollectType::MonoInstance => {
                        self.collect_mono_instance(monitor_type, &collect.task, &namespace)
                    }
                }
            }
        }

        self.record_duration(monitor_type, started);
    }

    fn prefix(&self, monitor_type: &str) -> String {
        reference::job_prefix(monitor_type, self.kind.as_str())
    }

    fn process_sources(
        &self,
        monitor_type: &str,
        task: &Task,
        namespace: &ConnectorNamespace,
        attributes: Option<&BTreeMap<String, String>>,
    ) {
        let prefix = self.prefix(monitor_type);
        let processor = SourceProcessor::new(&self.ctx.telemetry, &self.ctx.extensions, namespace)
            .with_attributes(attributes);
        let ordered = OrderedSources::new(
            &task.sources,
            &task.execution_order,
            &task.dependencies,
            Some(&prefix),
        );
        for (_, source) in ordered.iter() {
            processor.process(source, Some(&prefix));
        }
    }

    fn table_of(
        &self,
        monitor_type: &str,
        mapping: &Mapping,
        namespace: &ConnectorNamespace,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> Option<SourceTable> {
        let prefix = self.prefix(monitor_type);
        let table = mapping_table(mapping, namespace, Some(&prefix), attributes);
        if table.is_none() {
            warn!(
                "{}: mapping source {} of {monitor_type}.{} is not available, skipping",
                self.connector.id, mapping.source, self.kind
            );
        }
        table
    }

    fn mapper<'m>(&'m self, monitor_type: &'m str, mapping: &'m Mapping) -> MonitorMapper<'m> {
        MonitorMapper::new(
            &self.ctx.telemetry,
            self.connector,
            monitor_type,
            mapping,
            self.ctx.strategy_time,
        )
        .with_trigger(self.ctx.trigger.as_ref())
    }

    fn discover(&self, monitor_type: &str, job: &MonitorJob, task: &Task, namespace: &ConnectorNamespace) {
        self.process_sources(monitor_type, task, namespace, None);

        let Some(mapping) = &task.mapping else {
            warn!("{}: {monitor_type}.{} has no mapping", self.connector.id, self.kind);
            return;
        };
        let Some(table) = self.table_of(monitor_type, mapping, namespace, None) else {
            return;
        };

        let mapper = self.mapper(monitor_type, mapping);
        let discovered = table
            .table
            .iter()
            .filter_map(|row| mapper.discover(row, &job.alert_rules))
            .count();
        debug!(
            "{}: {} discovered {discovered} {monitor_type} monitor(s)",
            self.connector.id, self.kind
        );
    }

    /// Monitors of `monitor_type` created by this connector, the endpoint for hosts
    fn own_monitors(&self, monitor_type: &str) -> Vec<MonitorRef> {
        if monitor_type == HOST_TYPE {
            return self.ctx.telemetry.endpoint_host_monitor_ref().into_iter().collect();
        }

        self.ctx
            .telemetry
            .monitor_refs_by_type(monitor_type)
            .into_iter()
            .filter(|monitor| monitor.lock().connector_id() == Some(self.connector.id.as_str()))
            .collect()
    }

    fn collect_multi_instance(
        &self,
        monitor_type: &str,
        task: &Task,
        keys: &BTreeSet<String>,
        namespace: &ConnectorNamespace,
    ) {
        let monitors = self.own_monitors(monitor_type);
        if monitors.is_empty() {
            debug!("{}: no {monitor_type} monitor to collect", self.connector.id);
            return;
        }

        self.process_sources(monitor_type, task, namespace, None);

        let Some(mapping) = &task.mapping else {
            return;
        };
        let Some(table) = self.table_of(monitor_type, mapping, namespace, None) else {
            return;
        };

        if monitor_type == HOST_TYPE {
            if let (Some(host), Some(row)) = (monitors.first(), table.table.first()) {
                self.mapper(monitor_type, mapping).collect(host, row);
            }
            return;
        }

        let index: HashMap<Vec<String>, MonitorRef> = monitors
            .into_iter()
            .map(|monitor_ref| {
                let key = {
                    let monitor = monitor_ref.lock();
                    key_values(keys, |k| monitor.attribute(k).map(str::to_string))
                };
                (key, monitor_ref)
            })
            .collect();

        let mapper = self.mapper(monitor_type, mapping);
        for row in &table.table {
            let attributes = MappingProcessor::new(&self.ctx.telemetry, &self.connector.id, row)
                .interpret_non_context(&mapping.attributes);
            let key = key_values(keys, |k| attributes.get(k).cloned());
            match index.get(&key) {
                Some(monitor_ref) => mapper.collect(monitor_ref, row),
                None => debug!(
                    "{}: collected row {key:?} matches no {monitor_type} monitor",
                    self.connector.id
                ),
            }
        }
    }

    fn collect_mono_instance(&self, monitor_type: &str, task: &Task, namespace: &ConnectorNamespace) {
        let Some(mapping) = &task.mapping else {
            return;
        };
        let mapper = self.mapper(monitor_type, mapping);

        for monitor_ref in self.own_monitors(monitor_type) {
            let attributes = monitor_ref.lock().attributes.clone();
            self.process_sources(monitor_type, task, namespace, Some(&attributes));

            let Some(table) = self.table_of(monitor_type, mapping, namespace, Some(&attributes)) else {
                continue;
            };
            match table.table.first() {
                Some(row) => mapper.collect(&monitor_ref, row),
                None => debug!(
                    "{}: nothing collected for {}",
                    self.connector.id,
                    monitor_ref.lock().id
                ),
            }
        }
    }

    fn record_duration(&self, monitor_type: &str, started: Instant) {
        if !self.ctx.telemetry.host_configuration().enable_self_monitoring {
            return;
        }
        let Some(host) = self.ctx.telemetry.endpoint_host_monitor_ref() else {
            return;
        };

        let name = job_duration_metric(self.kind, monitor_type, &self.connector.id);
        let factory = MetricFactory::new(None);
        let mut host = host.lock();
        factory.collect_number_metric(
            &mut host,
            &name,
            started.elapsed().as_secs_f64(),
            self.ctx.strategy_time,
            false,
        );
    }
}

fn key_values(keys: &BTreeSet<String>, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    keys.iter().map(|k| lookup(k).unwrap_or_default()).collect()
}

/// Whether a monitor was left behind by the pass that ran at `strategy_time`
pub fn is_stale(monitor: &Monitor, strategy_time: i64) -> bool {
    monitor.discovery_time != Some(strategy_time)
}
