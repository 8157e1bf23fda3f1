use std::fmt;

use serde::{Deserialize, Serialize};

use super::condition::{AlertCondition, normalize_conditions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Alarm,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warn => f.write_str("warn"),
            Severity::Alarm => f.write_str("alarm"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertRuleState {
    Inactive,
    Pending,
    Active,
}

/// Result of one evaluation of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvaluation {
    /// No condition matched, the debounce window is reset
    Inactive,
    /// Conditions match but the period has not elapsed yet
    Pending,
    /// The rule became active during this evaluation, the trigger must fire
    Activated,
    /// Still active, the trigger already fired for this activation
    Active,
}

impl AlertEvaluation {
    pub fn state(self) -> AlertRuleState {
        match self {
            AlertEvaluation::Inactive => AlertRuleState::Inactive,
            AlertEvaluation::Pending => AlertRuleState::Pending,
            AlertEvaluation::Activated | AlertEvaluation::Active => AlertRuleState::Active,
        }
    }
}

/// Declaration of a rule, as written in a connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleDefinition {
    pub conditions: Vec<AlertCondition>,

    #[serde(default)]
    pub period_secs: u64,

    pub severity: Severity,
}

/// A rule attached to one metric of one monitor
///
/// The rule keeps only what must survive between evaluations: when the conditions first
/// matched and whether the trigger already fired. The state itself is recomputed on every
/// evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    conditions: Vec<AlertCondition>,
    period_ms: i64,
    severity: Severity,
    first_trigger_timestamp: Option<i64>,
    triggered: bool,
}

impl AlertRule {
    pub fn new(conditions: Vec<AlertCondition>, period_ms: i64, severity: Severity) -> Self {
        Self {
            conditions: normalize_conditions(conditions),
            period_ms: period_ms.max(0),
            severity,
            first_trigger_timestamp: None,
            triggered: false,
        }
    }

    pub fn from_definition(definition: &AlertRuleDefinition) -> Self {
        let period_ms =
            i64::try_from(definition.period_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self::new(definition.conditions.clone(), period_ms, definition.severity)
    }

    pub fn conditions(&self) -> &[AlertCondition] {
        &self.conditions
    }

    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn first_trigger_timestamp(&self) -> Option<i64> {
        self.first_trigger_timestamp
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// Structural identity: same conditions, period and severity
    pub fn same(&self, other: &AlertRule) -> bool {
        self.conditions == other.conditions
            && self.period_ms == other.period_ms
            && self.severity == other.severity
    }

    /// A rule without conditions or without a value never matches
    pub fn all_conditions_matched(&self, value: Option<f64>) -> bool {
        let Some(value) = value else {
            return false;
        };
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(value))
    }

    /// State the rule is in for `value` at `now_ms`, without touching the debounce window
    pub fn state(&self, value: Option<f64>, now_ms: i64) -> AlertRuleState {
        if !self.all_conditions_matched(value) {
            return AlertRuleState::Inactive;
        }
        let first = self.first_trigger_timestamp.unwrap_or(now_ms);
        if now_ms.saturating_sub(first) < self.period_ms {
            AlertRuleState::Pending
        } else {
            AlertRuleState::Active
        }
    }

    /// Advances the debounce window with the current value
    pub fn evaluate(&mut self, value: Option<f64>, now_ms: i64) -> AlertEvaluation {
        if !self.all_conditions_matched(value) {
            self.first_trigger_timestamp = None;
            self.triggered = false;
            return AlertEvaluation::Inactive;
        }

        let first = *self.first_trigger_timestamp.get_or_insert(now_ms);
        if now_ms.saturating_sub(first) < self.period_ms {
            return AlertEvaluation::Pending;
        }

        if self.triggered {
            return AlertEvaluation::Active;
        }

        self.triggered = true;
        AlertEvaluation::Activated
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions = self
            .conditions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" and ");
        write!(
            f,
            "{} when value {conditions} for {}ms",
            self.severity, self.period_ms
        )
    }
}

/// Merges freshly computed rules into the rules already attached to a metric
///
/// Existing rules that are structurally identical to a new one stay in place with their
/// debounce state. New rules without an identical existing rule are appended. Existing rules
/// that are no longer declared are dropped.
pub fn merge(existing: Vec<AlertRule>, new_rules: Vec<AlertRule>) -> Vec<AlertRule> {
    let mut merged: Vec<AlertRule> = existing
        .into_iter()
        .filter(|rule| new_rules.iter().any(|n| n.same(rule)))
        .collect();

    for rule in new_rules {
        if !merged.iter().any(|m| m.same(&rule)) {
            merged.push(rule);
        }
    }

    merged
}
