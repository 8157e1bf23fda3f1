//! Monitoring passes
//!
//! A pass is one execution of a [`Strategy`] against the host of a [`TelemetryManager`]:
//! detection decides which connectors apply, discovery creates monitors, collect refreshes
//! their metrics and simple does both in one step.
//!
//! ## Data Flow
//!
//! ```text
//! Strategy ──▶ JobRunner ──▶ OrderedSources ──▶ SourceProcessor ──▶ ComputeProcessor
//!                  │                                  │
//!                  │                         ExtensionManager (protocols)
//!                  ▼
//!            MonitorMapper ──▶ TelemetryManager (monitors, metrics, alert rules)
//! ```

pub mod compute_processor;
pub mod detection;
pub mod job;
pub mod mapping;
pub mod orchestrator;
pub mod source_processor;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::alert::AlertTrigger;
use crate::extension::ExtensionManager;
use crate::telemetry::TelemetryManager;

pub use detection::DetectionStrategy;
pub use job::JobRunner;
pub use orchestrator::JobOrchestrator;

/// Monitor types processed one by one, in this order, before any other type
pub const PRIORITY_MONITOR_TYPES: [&str; 5] = ["host", "enclosure", "blade", "disk_controller", "cpu"];

/// Rank of a monitor type, lower runs first
pub fn job_priority(monitor_type: &str) -> usize {
    PRIORITY_MONITOR_TYPES
        .iter()
        .position(|t| *t == monitor_type)
        .unwrap_or(PRIORITY_MONITOR_TYPES.len())
}

pub fn is_priority_job(monitor_type: &str) -> bool {
    job_priority(monitor_type) < PRIORITY_MONITOR_TYPES.len()
}

/// Everything a pass needs, shared by all its workers
#[derive(Clone)]
pub struct StrategyContext {
    pub telemetry: Arc<TelemetryManager>,
    pub extensions: Arc<ExtensionManager>,
    pub trigger: Option<AlertTrigger>,
    /// Pass timestamp in epoch milliseconds, shared by every monitor the pass touches
    pub strategy_time: i64,
}

impl StrategyContext {
    pub fn new(telemetry: Arc<TelemetryManager>, extensions: Arc<ExtensionManager>) -> Self {
        Self {
            telemetry,
            extensions,
            trigger: None,
            strategy_time: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_trigger(mut self, trigger: Option<AlertTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_strategy_time(mut self, strategy_time: i64) -> Self {
        self.strategy_time = strategy_time;
        self
    }
}

/// What a pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub connectors: usize,
    pub jobs_completed: usize,
    /// Jobs still running when the pool drain timed out, or that panicked
    pub jobs_incomplete: usize,
    /// The pass stopped at its precondition check
    pub aborted: bool,
}

impl PassReport {
    pub fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }
}

/// A unit of blocking work submitted to the job pool
pub type BlockingJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs `jobs` on the blocking thread pool, at most `workers` at a time
///
/// Waits up to `timeout` for all of them. Jobs still running afterwards are left to finish on
/// their own and are reported as incomplete, the same as jobs that panicked. Returns the number
/// of completed and incomplete jobs.
pub async fn run_blocking_pool(
    jobs: Vec<(String, BlockingJob)>,
    workers: usize,
    timeout: Duration,
) -> (usize, usize) {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut pending: BTreeSet<String> = jobs.iter().map(|(name, _)| name.clone()).collect();
    let total = jobs.len();

    let mut set = JoinSet::new();
    for (name, job) in jobs {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (name, false);
            };
            let finished = tokio::task::spawn_blocking(job).await.is_ok();
            (name, finished)
        });
    }

    let mut completed = 0;
    let drain = async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, true)) => {
                    pending.remove(&name);
                    completed += 1;
                }
                Ok((name, false)) => warn!("job {name} did not complete"),
                Err(e) => warn!("job task failed: {e}"),
            }
        }
    };

    if tokio::time::timeout(timeout, drain).await.is_err() {
        debug!("job pool drain timed out after {timeout:?}");
    }
    if !pending.is_empty() {
        debug!("incomplete jobs: {pending:?}");
    }

    (completed, total - completed)
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> PassReport;
}
