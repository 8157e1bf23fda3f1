//! Connector definitions
//!
//! A connector describes how to detect a device type and how to turn protocol answers into
//! monitors. Connectors are loaded once, validated, and then shared read-only (behind an
//! [`Arc`]) by every pass that uses them. Executions never edit a loaded connector: sources
//! and computes are cloned before any substitution.
//!
//! ## Layout
//!
//! ```text
//! Connector
//!  ├── detection.criteria        all must succeed for the connector to apply
//!  ├── before_all                sources run once per connector, before any job
//!  ├── metrics                   metric definitions (gauge, counter, state set)
//!  └── monitors[<type>]          MonitorJob
//!        ├── discovery           Task
//!        ├── collect             CollectTask (multi or mono instance)
//!        ├── simple              Task
//!        └── alert_rules         metric name -> rule definitions
//! ```

pub mod compute;
pub mod criterion;
pub mod source;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::alert::AlertRuleDefinition;
use crate::error::{EngineError, EngineResult};
use crate::reference;

pub use compute::Compute;
pub use criterion::{Criterion, CriterionKind, CriterionTestResult, CriterionType};
pub use source::{Source, SourceKind, SourceMap, SourceType};

/// The three kinds of monitor job a connector may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Discovery,
    Collect,
    Simple,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Discovery => "discovery",
            JobKind::Collect => "collect",
            JobKind::Simple => "simple",
        }
    }

    /// Whether this kind creates monitors and takes part in missing marking
    pub fn discovers(&self) -> bool {
        matches!(self, JobKind::Discovery | JobKind::Simple)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub detection: Detection,

    #[serde(default)]
    pub before_all: SourceMap,

    #[serde(default)]
    pub metrics: BTreeMap<String, MetricDefinition>,

    #[serde(default)]
    pub monitors: BTreeMap<String, MonitorJob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorJob {
    #[serde(default)]
    pub discovery: Option<Task>,

    #[serde(default)]
    pub collect: Option<CollectTask>,

    #[serde(default)]
    pub simple: Option<Task>,

    #[serde(default)]
    pub alert_rules: BTreeMap<String, Vec<AlertRuleDefinition>>,
}

impl MonitorJob {
    pub fn task(&self, kind: JobKind) -> Option<&Task> {
        match kind {
            JobKind::Discovery => self.discovery.as_ref(),
            JobKind::Collect => self.collect.as_ref().map(|c| &c.task),
            JobKind::Simple => self.simple.as_ref(),
        }
    }

    fn task_mut(&mut self, kind: JobKind) -> Option<&mut Task> {
        match kind {
            JobKind::Discovery => self.discovery.as_mut(),
            JobKind::Collect => self.collect.as_mut().map(|c| &mut c.task),
            JobKind::Simple => self.simple.as_mut(),
        }
    }
}

/// Sources, their ordering hints and the mapping of one job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub sources: SourceMap,

    /// Source names in the order the author wants them run
    #[serde(default)]
    pub execution_order: Vec<String>,

    /// Explicit dependencies: source name -> names it must run after
    #[serde(default)]
    pub dependencies: BTreeMap<String, BTreeSet<String>>,

    #[serde(default)]
    pub mapping: Option<Mapping>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectType {
    #[default]
    MultiInstance,
    MonoInstance,
}

fn default_keys() -> BTreeSet<String> {
    BTreeSet::from([String::from("id")])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectTask {
    #[serde(flatten)]
    pub task: Task,

    #[serde(default)]
    pub collect_type: CollectType,

    /// Attributes identifying the monitor a collected row belongs to
    #[serde(default = "default_keys")]
    pub keys: BTreeSet<String>,
}

/// Turns rows of a source table into monitors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// A `${source::...}` reference, or a literal `;` separated table
    pub source: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub metrics: BTreeMap<String, String>,

    #[serde(default)]
    pub conditional_collection: BTreeMap<String, String>,

    #[serde(default)]
    pub legacy_text_parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
    StateSet(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: MetricKind,
}

impl Connector {
    /// Assigns canonical keys to every source and checks the structure
    pub fn prepare(&mut self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidConnector(
                "connector id must not be empty".to_string(),
            ));
        }

        for (name, source) in self.before_all.iter_mut() {
            source.key = reference::before_all_key(name);
        }

        for (monitor_type, job) in self.monitors.iter_mut() {
            for kind in [JobKind::Discovery, JobKind::Collect, JobKind::Simple] {
                let Some(task) = job.task_mut(kind) else {
                    continue;
                };

                for (name, source) in task.sources.iter_mut() {
                    source.key = reference::job_source_key(monitor_type, kind.as_str(), name);
                }

                if kind.discovers() && task.mapping.is_none() {
                    return Err(EngineError::InvalidConnector(format!(
                        "{}: {monitor_type}.{kind} has no mapping",
                        self.id
                    )));
                }

                for name in task.execution_order.iter().chain(task.dependencies.keys()) {
                    if task.sources.get(name).is_none() {
                        return Err(EngineError::InvalidConnector(format!(
                            "{}: {monitor_type}.{kind} orders unknown source {name}",
                            self.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Definition of a metric, looked up by its name without attributes
    pub fn metric_definition(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.get(name)
    }
}

/// Loads a connector from a JSON file and prepares it
pub fn read_connector_file(path: &str) -> anyhow::Result<Connector> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("reading connector {path}"))?;
    let mut connector: Connector = serde_json::from_str(&file_content)
        .with_context(|| format!("parsing connector {path}"))?;
    connector.prepare()?;
    trace!("loaded connector: {}", connector.id);
    Ok(connector)
}

/// All connectors known to the engine, keyed by id
#[derive(Debug, Clone, Default)]
pub struct ConnectorStore {
    connectors: BTreeMap<String, Arc<Connector>>,
}

impl ConnectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connector: Connector) -> Arc<Connector> {
        let connector = Arc::new(connector);
        self.connectors
            .insert(connector.id.clone(), Arc::clone(&connector));
        connector
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connector>> {
        self.connectors.get(id).cloned()
    }

    pub fn connectors(&self) -> impl Iterator<Item = &Arc<Connector>> {
        self.connectors.values()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
