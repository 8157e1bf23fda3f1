use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::error::{EngineError, EngineResult};

/// Configuration of one monitored host
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct HostConfiguration {
    pub hostname: String,

    /// Identifier of the host monitor, defaults to the hostname
    #[serde(default)]
    pub host_id: Option<String>,

    #[serde(default = "default_host_type")]
    pub host_type: String,

    #[serde(default = "default_strategy_timeout_secs")]
    pub strategy_timeout_secs: u64,

    /// Restricts detection to these connector ids
    #[serde(default)]
    pub connectors: Option<BTreeSet<String>>,

    /// Run every monitor job sequentially instead of using the worker pool
    #[serde(default)]
    pub sequential: bool,

    #[serde(default = "default_true")]
    pub enable_self_monitoring: bool,

    /// Wait before the single retry of a source that unexpectedly returned nothing
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub included_monitors: Option<BTreeSet<String>>,

    #[serde(default)]
    pub excluded_monitors: Option<BTreeSet<String>>,

    /// Connector id -> variable name -> value
    #[serde(default)]
    pub connector_variables: BTreeMap<String, BTreeMap<String, String>>,

    /// Extra attributes of the host monitor
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Protocol name -> configuration understood by the matching extension
    #[serde(default)]
    pub configurations: BTreeMap<String, serde_json::Value>,

    /// Bounded wait when draining the job worker pool
    #[serde(default = "default_job_pool_timeout_secs")]
    pub job_pool_timeout_secs: u64,

    #[serde(default = "default_force_serialization_timeout_secs")]
    pub force_serialization_timeout_secs: u64,

    #[serde(default = "default_max_job_workers")]
    pub max_job_workers: usize,
}

fn default_host_type() -> String {
    String::from("linux")
}

fn default_strategy_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_retry_delay_ms() -> u64 {
    30
}

fn default_job_pool_timeout_secs() -> u64 {
    300
}

fn default_force_serialization_timeout_secs() -> u64 {
    120
}

fn default_max_job_workers() -> usize {
    20
}

impl HostConfiguration {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            host_id: None,
            host_type: default_host_type(),
            strategy_timeout_secs: default_strategy_timeout_secs(),
            connectors: None,
            sequential: false,
            enable_self_monitoring: true,
            retry_delay_ms: default_retry_delay_ms(),
            included_monitors: None,
            excluded_monitors: None,
            connector_variables: BTreeMap::new(),
            attributes: BTreeMap::new(),
            configurations: BTreeMap::new(),
            job_pool_timeout_secs: default_job_pool_timeout_secs(),
            force_serialization_timeout_secs: default_force_serialization_timeout_secs(),
            max_job_workers: default_max_job_workers(),
        }
    }

    pub fn host_id(&self) -> &str {
        self.host_id.as_deref().unwrap_or(&self.hostname)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn job_pool_timeout(&self) -> Duration {
        Duration::from_secs(self.job_pool_timeout_secs)
    }

    pub fn force_serialization_timeout(&self) -> Duration {
        Duration::from_secs(self.force_serialization_timeout_secs)
    }

    /// A monitor type is filtered out when an include set misses it or the exclude set has it
    pub fn is_monitor_filtered(&self, monitor_type: &str) -> bool {
        let not_included = self
            .included_monitors
            .as_ref()
            .is_some_and(|included| !included.contains(monitor_type));
        let excluded = self
            .excluded_monitors
            .as_ref()
            .is_some_and(|excluded| excluded.contains(monitor_type));
        not_included || excluded
    }

    pub fn is_connector_selected(&self, connector_id: &str) -> bool {
        self.connectors
            .as_ref()
            .is_none_or(|selected| selected.contains(connector_id))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.hostname.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "hostname must not be empty".to_string(),
            ));
        }
        if self.max_job_workers == 0 {
            return Err(EngineError::InvalidConfig(
                "max_job_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<HostConfiguration> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("reading host configuration {path}"))?;
    let config: HostConfiguration = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
