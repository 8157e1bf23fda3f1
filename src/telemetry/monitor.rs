use std::collections::BTreeMap;

use serde::Serialize;

use crate::alert::{self, AlertRule, AlertRuleState};

use super::metric::{Metric, present_metric_name};

/// Attribute holding the id the connector gave to a monitor
pub const ID_ATTRIBUTE: &str = "id";
/// Attribute holding the connector that discovered a monitor
pub const CONNECTOR_ID_ATTRIBUTE: &str = "connector_id";
pub const PARENT_ID_ATTRIBUTE: &str = "hw.parent.id";
pub const PARENT_TYPE_ATTRIBUTE: &str = "hw.parent.type";

pub const HOST_TYPE: &str = "host";
pub const CONNECTOR_TYPE: &str = "connector";

/// A tracked entity, persisted in the telemetry store across passes
#[derive(Debug, Clone, Default, Serialize)]
pub struct Monitor {
    pub id: String,
    pub monitor_type: String,

    /// Weak link to the parent, resolved through the store when needed
    pub parent_id: Option<String>,

    pub is_endpoint: bool,

    pub attributes: BTreeMap<String, String>,

    /// Keyed by full metric name, attribute block included
    pub metrics: BTreeMap<String, Metric>,

    pub legacy_text_parameters: BTreeMap<String, String>,

    pub conditional_collection: BTreeMap<String, String>,

    /// Time of the last discovery pass that visited this monitor
    pub discovery_time: Option<i64>,

    pub alert_rules: BTreeMap<String, Vec<AlertRule>>,
}

impl Monitor {
    pub fn new(id: impl Into<String>, monitor_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            monitor_type: monitor_type.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn add_attributes(&mut self, attributes: &BTreeMap<String, String>) {
        self.attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn connector_id(&self) -> Option<&str> {
        self.attribute(CONNECTOR_ID_ATTRIBUTE)
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metric(name).and_then(Metric::numeric_value)
    }

    /// Missing monitors carry a presence metric equal to 0
    pub fn is_missing(&self) -> bool {
        self.metric_value(&present_metric_name(&self.monitor_type)) == Some(0.0)
    }

    /// Whether collection of `metric` was switched off by the mapping
    pub fn is_collection_disabled(&self, metric: &str) -> bool {
        self.conditional_collection
            .get(metric)
            .map(|v| {
                let v = v.trim();
                v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false")
            })
            .unwrap_or(false)
    }

    /// Merges freshly declared rules with the ones already attached to `metric`
    pub fn add_alert_rules(&mut self, metric: &str, rules: Vec<AlertRule>) {
        let existing = self.alert_rules.remove(metric).unwrap_or_default();
        let merged = alert::merge(existing, rules);
        if !merged.is_empty() {
            self.alert_rules.insert(metric.to_string(), merged);
        }
    }

    /// Current state of every rule attached to `metric`, recomputed from its value
    ///
    /// Querying never advances a rule: activation and its trigger belong to metric collection.
    pub fn alert_rule_states(&self, metric: &str, now: i64) -> Vec<AlertRuleState> {
        let value = self.metric_value(metric);
        self.alert_rules
            .get(metric)
            .map(|rules| rules.iter().map(|rule| rule.state(value, now)).collect())
            .unwrap_or_default()
    }
}
