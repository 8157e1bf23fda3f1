//! Threshold alert rules attached to monitor metrics
//!
//! ## Debounce State Machine
//!
//! ```text
//! conditions do not match         → INACTIVE (first trigger time and triggered flag cleared)
//! match, now - first < period     → PENDING
//! match, now - first >= period    → ACTIVE  (trigger fires once per activation)
//! ```
//!
//! A single non-match resets the window, so a later match starts a fresh period and may fire
//! again. Rules are merged across discovery cycles with [`merge`], which keeps the debounce
//! state of rules whose conditions, period and severity did not change.

mod condition;
mod rule;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

pub use condition::{AlertCondition, AlertOperator, normalize_conditions};
pub use rule::{
    AlertEvaluation, AlertRule, AlertRuleDefinition, AlertRuleState, Severity, merge,
};

/// Payload handed to the trigger when a rule becomes active
#[derive(Debug, Clone, Serialize)]
pub struct AlertInfo {
    pub monitor_id: String,
    pub monitor_type: String,
    pub metric: String,
    pub value: Option<f64>,
    pub severity: Severity,
    pub rule: String,
    pub first_trigger_timestamp: Option<i64>,
    pub triggered_at: i64,
}

/// Callback invoked on every transition into ACTIVE
pub type AlertTrigger = Arc<dyn Fn(&AlertInfo) + Send + Sync>;

/// Trigger that reports activations through the log
pub fn log_trigger() -> AlertTrigger {
    Arc::new(|info: &AlertInfo| {
        warn!(
            "{} alert on {} ({}): {} = {:?}, rule {}",
            info.severity, info.monitor_id, info.monitor_type, info.metric, info.value, info.rule
        );
    })
}

/// Runs the trigger, a panicking trigger is logged and otherwise ignored
pub fn fire(trigger: &AlertTrigger, info: &AlertInfo) {
    if catch_unwind(AssertUnwindSafe(|| trigger(info))).is_err() {
        debug!(
            "alert trigger failed for {} on {}",
            info.metric, info.monitor_id
        );
    }
}
