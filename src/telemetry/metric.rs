//! Metric values and the factory writing them onto monitors
//!
//! Metric names may carry attributes in braces, e.g.
//! `hw.status{hw.type="enclosure", state="present"}`. The full name is the key on the monitor,
//! the part before the braces is the base name used to look up definitions.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::alert::{self, AlertInfo, AlertTrigger};
use crate::connector::{MetricDefinition, MetricKind};

use super::monitor::Monitor;

static METRIC_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s*([^=,{}\s]+)\s*=\s*"([^"]*)""#).expect("valid metric attribute regex")
});

/// Presence metric written at the end of a discovery pass
pub fn present_metric_name(monitor_type: &str) -> String {
    format!("hw.status{{hw.type=\"{monitor_type}\", state=\"present\"}}")
}

/// Base name of a metric, without its attribute block
pub fn extract_name(metric: &str) -> &str {
    metric.split('{').next().unwrap_or(metric).trim()
}

/// Attributes declared in the brace block of a metric name
pub fn extract_attributes(metric: &str) -> BTreeMap<String, String> {
    let Some(start) = metric.find('{') else {
        return BTreeMap::new();
    };
    let block = &metric[start..];

    METRIC_ATTRIBUTE
        .captures_iter(block)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    #[default]
    Gauge,
    Counter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberMetric {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub kind: NumberKind,
    pub value: f64,
    pub collect_time: i64,
    pub previous_value: Option<f64>,
    pub previous_collect_time: Option<i64>,
    /// Per second rate of a counter, available from the second collect on
    pub rate: Option<f64>,
    /// Set by discovery, tells exporters the series restarts
    pub reset_metric_time: bool,
}

impl NumberMetric {
    pub fn new(name: &str, kind: NumberKind, value: f64, collect_time: i64) -> Self {
        Self {
            name: extract_name(name).to_string(),
            attributes: extract_attributes(name),
            kind,
            value,
            collect_time,
            previous_value: None,
            previous_collect_time: None,
            rate: None,
            reset_metric_time: false,
        }
    }

    /// Records a new sample, keeping the previous one for rate computations
    pub fn update(&mut self, value: f64, collect_time: i64) {
        if collect_time != self.collect_time {
            self.previous_value = Some(self.value);
            self.previous_collect_time = Some(self.collect_time);
        }
        self.value = value;
        self.collect_time = collect_time;

        self.rate = match (self.kind, self.previous_value, self.previous_collect_time) {
            (NumberKind::Counter, Some(previous), Some(previous_time))
                if collect_time > previous_time =>
            {
                let seconds = (collect_time - previous_time) as f64 / 1000.0;
                Some((value - previous) / seconds)
            }
            _ => None,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSetMetric {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub state_set: Vec<String>,
    pub value: String,
    pub collect_time: i64,
    pub previous_value: Option<String>,
    pub previous_collect_time: Option<i64>,
}

impl StateSetMetric {
    pub fn update(&mut self, value: &str, collect_time: i64) {
        if collect_time != self.collect_time {
            self.previous_value = Some(std::mem::take(&mut self.value));
            self.previous_collect_time = Some(self.collect_time);
        }
        self.value = value.to_string();
        self.collect_time = collect_time;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Metric {
    Number(NumberMetric),
    StateSet(StateSetMetric),
}

impl Metric {
    pub fn collect_time(&self) -> i64 {
        match self {
            Metric::Number(m) => m.collect_time,
            Metric::StateSet(m) => m.collect_time,
        }
    }

    /// Numeric view: the number itself, or the index of the state of a state set
    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            Metric::Number(m) => Some(m.value),
            Metric::StateSet(m) => m
                .state_set
                .iter()
                .position(|s| s.eq_ignore_ascii_case(&m.value))
                .map(|i| i as f64),
        }
    }
}

/// Writes metric samples onto monitors
///
/// Stamps the collection time, keeps previous samples, honors metric definitions and
/// evaluates the alert rules attached to each collected metric.
pub struct MetricFactory<'a> {
    definitions: Option<&'a BTreeMap<String, MetricDefinition>>,
    trigger: Option<&'a AlertTrigger>,
}

impl<'a> MetricFactory<'a> {
    pub fn new(definitions: Option<&'a BTreeMap<String, MetricDefinition>>) -> Self {
        Self {
            definitions,
            trigger: None,
        }
    }

    pub fn with_trigger(mut self, trigger: Option<&'a AlertTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    fn kind_of(&self, name: &str) -> MetricKind {
        self.definitions
            .and_then(|defs| defs.get(extract_name(name)))
            .map(|def| def.kind.clone())
            .unwrap_or_default()
    }

    pub fn collect_number_metric(
        &self,
        monitor: &mut Monitor,
        name: &str,
        value: f64,
        collect_time: i64,
        reset_metric_time: bool,
    ) {
        let kind = match self.kind_of(name) {
            MetricKind::Counter => NumberKind::Counter,
            _ => NumberKind::Gauge,
        };

        match monitor.metrics.get_mut(name) {
            Some(Metric::Number(metric)) => {
                metric.kind = kind;
                metric.update(value, collect_time);
                metric.reset_metric_time = reset_metric_time;
            }
            _ => {
                let mut metric = NumberMetric::new(name, kind, value, collect_time);
                metric.reset_metric_time = reset_metric_time;
                monitor.metrics.insert(name.to_string(), Metric::Number(metric));
            }
        }

        self.evaluate_alert_rules(monitor, name, collect_time);
    }

    pub fn collect_state_set_metric(
        &self,
        monitor: &mut Monitor,
        name: &str,
        value: &str,
        state_set: &[String],
        collect_time: i64,
    ) {
        match monitor.metrics.get_mut(name) {
            Some(Metric::StateSet(metric)) => metric.update(value, collect_time),
            _ => {
                let metric = StateSetMetric {
                    name: extract_name(name).to_string(),
                    attributes: extract_attributes(name),
                    state_set: state_set.to_vec(),
                    value: value.to_string(),
                    collect_time,
                    previous_value: None,
                    previous_collect_time: None,
                };
                monitor
                    .metrics
                    .insert(name.to_string(), Metric::StateSet(metric));
            }
        }

        self.evaluate_alert_rules(monitor, name, collect_time);
    }

    /// Interprets a raw mapped value according to the metric definition
    ///
    /// Returns false when nothing could be collected.
    pub fn collect(
        &self,
        monitor: &mut Monitor,
        name: &str,
        raw_value: &str,
        collect_time: i64,
        reset_metric_time: bool,
    ) -> bool {
        let raw_value = raw_value.trim();
        if raw_value.is_empty() {
            trace!("{}: no value for {name}", monitor.id);
            return false;
        }

        if let MetricKind::StateSet(states) = self.kind_of(name) {
            if !states.iter().any(|s| s.eq_ignore_ascii_case(raw_value)) {
                warn!(
                    "{}: value {raw_value} of {name} is not one of {states:?}",
                    monitor.id
                );
                return false;
            }
            self.collect_state_set_metric(monitor, name, raw_value, &states, collect_time);
            return true;
        }

        match raw_value.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                self.collect_number_metric(monitor, name, value, collect_time, reset_metric_time);
                true
            }
            _ => {
                warn!(
                    "{}: cannot parse value {raw_value} of {name} as a number",
                    monitor.id
                );
                false
            }
        }
    }

    fn evaluate_alert_rules(&self, monitor: &mut Monitor, name: &str, now: i64) {
        let value = monitor.metrics.get(name).and_then(Metric::numeric_value);
        let Some(rules) = monitor.alert_rules.get_mut(name) else {
            return;
        };

        let mut activated = Vec::new();
        for rule in rules.iter_mut() {
            if rule.evaluate(value, now) == alert::AlertEvaluation::Activated {
                activated.push(AlertInfo {
                    monitor_id: monitor.id.clone(),
                    monitor_type: monitor.monitor_type.clone(),
                    metric: name.to_string(),
                    value,
                    severity: rule.severity(),
                    rule: rule.to_string(),
                    first_trigger_timestamp: rule.first_trigger_timestamp(),
                    triggered_at: now,
                });
            }
        }

        if let Some(trigger) = self.trigger {
            for info in &activated {
                alert::fire(trigger, info);
            }
        }
    }
}
