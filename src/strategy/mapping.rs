//! Turning mapped rows into monitors
//!
//! Mapping expressions come in two flavours:
//!
//! - context free: literals, `$n` column references and unit helpers such as
//!   `megaHertz2Hertz($2)`. They only need the current row.
//! - context dependent: `%attr%` references and `lookup(...)`. They need the monitor created
//!   from the row, so they are interpreted in a second pass once the monitor exists.
//!
//! Monitors are never locked while other monitors are looked up, interpretation works on
//! snapshots and the results are written back in short critical sections.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::alert::{AlertRule, AlertRuleDefinition, AlertTrigger};
use crate::connector::{Connector, Mapping};
use crate::reference::{self, ReferenceResolver, SourceTableLookup};
use crate::table::{SourceTable, TABLE_SEP};
use crate::telemetry::{
    CONNECTOR_ID_ATTRIBUTE, HOST_TYPE, ID_ATTRIBUTE, MetricFactory, Monitor, MonitorRef,
    TelemetryManager,
};

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(megaHertz2Hertz|mebiByte2Byte|percent2Ratio|boolean)\((.*)\)\s*$")
        .expect("valid mapping function regex")
});

static LOOKUP_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*lookup\(\s*"([^"]*)"\s*,\s*"([^"]*)"\s*,\s*"([^"]*)"\s*,\s*(.+?)\s*\)\s*$"#,
    )
    .expect("valid lookup regex")
});

static ATTRIBUTE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%[A-Za-z0-9_.\-]+%").expect("valid attribute token regex"));

/// Whether an expression needs the monitor created from the row
pub fn is_context_dependent(expression: &str) -> bool {
    LOOKUP_CALL.is_match(expression) || ATTRIBUTE_TOKEN.is_match(expression)
}

/// Monitor id unique across connectors: `<connector>_<type>_<id>`
pub fn build_monitor_id(connector_id: &str, monitor_type: &str, id: &str) -> String {
    format!("{connector_id}_{monitor_type}_{id}")
}

/// Table a mapping iterates over, `None` when its reference does not resolve
pub fn mapping_table(
    mapping: &Mapping,
    tables: &dyn SourceTableLookup,
    prefix: Option<&str>,
    attributes: Option<&BTreeMap<String, String>>,
) -> Option<SourceTable> {
    if mapping.source.contains("${source::") {
        return ReferenceResolver::new(prefix.map(str::to_string), tables)
            .with_attributes(attributes)
            .lookup_table(&mapping.source);
    }
    Some(SourceTable::from_csv(&mapping.source, TABLE_SEP))
}

fn number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn apply_function(function: &str, argument: &str) -> String {
    match function {
        "megaHertz2Hertz" => number(argument)
            .map(|v| format_number(v * 1_000_000.0))
            .unwrap_or_default(),
        "mebiByte2Byte" => number(argument)
            .map(|v| format_number(v * 1_048_576.0))
            .unwrap_or_default(),
        "percent2Ratio" => number(argument)
            .map(|v| format_number(v / 100.0))
            .unwrap_or_default(),
        "boolean" => match argument.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => "1".to_string(),
            "0" | "false" | "no" => "0".to_string(),
            other => number(other)
                .map(|v| if v != 0.0 { "1" } else { "0" }.to_string())
                .unwrap_or_default(),
        },
        _ => String::new(),
    }
}

/// Interprets the mapping expressions of one row
pub struct MappingProcessor<'a> {
    telemetry: &'a TelemetryManager,
    connector_id: &'a str,
    row: &'a [String],
}

impl<'a> MappingProcessor<'a> {
    pub fn new(telemetry: &'a TelemetryManager, connector_id: &'a str, row: &'a [String]) -> Self {
        Self {
            telemetry,
            connector_id,
            row,
        }
    }

    /// Context free expressions of `expressions`
    pub fn interpret_non_context(&self, expressions: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        expressions
            .iter()
            .filter(|(_, expression)| !is_context_dependent(expression))
            .map(|(name, expression)| (name.clone(), self.evaluate(expression, None)))
            .collect()
    }

    /// Context dependent expressions of `expressions`, evaluated against `monitor`
    pub fn interpret_context(
        &self,
        expressions: &BTreeMap<String, String>,
        monitor: &Monitor,
    ) -> BTreeMap<String, String> {
        expressions
            .iter()
            .filter(|(_, expression)| is_context_dependent(expression))
            .map(|(name, expression)| (name.clone(), self.evaluate(expression, Some(monitor))))
            .collect()
    }

    /// Both passes at once, for monitors that already exist
    pub fn interpret_all(
        &self,
        expressions: &BTreeMap<String, String>,
        monitor: &Monitor,
    ) -> BTreeMap<String, String> {
        expressions
            .iter()
            .map(|(name, expression)| (name.clone(), self.evaluate(expression, Some(monitor))))
            .collect()
    }

    fn evaluate(&self, expression: &str, monitor: Option<&Monitor>) -> String {
        if let Some(caps) = LOOKUP_CALL.captures(expression) {
            let value = self.evaluate(caps[4].trim_matches('"'), monitor);
            return self.lookup(&caps[1], &caps[2], &caps[3], &value);
        }

        if let Some(caps) = FUNCTION_CALL.captures(expression) {
            let argument = self.evaluate(&caps[2], monitor);
            return apply_function(&caps[1], &argument);
        }

        let text = reference::interpolate_columns(expression, self.row);
        match monitor {
            Some(monitor) => reference::replace_attribute_references(&text, Some(&monitor.attributes)),
            None => text,
        }
    }

    /// Attribute `result_attribute` of the monitor of `monitor_type` whose `match_attribute`
    /// equals `value`, within the same connector
    fn lookup(
        &self,
        monitor_type: &str,
        result_attribute: &str,
        match_attribute: &str,
        value: &str,
    ) -> String {
        self.telemetry
            .find_monitors_by_type(monitor_type)
            .into_values()
            .find(|candidate| {
                candidate.connector_id().is_none_or(|c| c == self.connector_id)
                    && candidate.attribute(match_attribute) == Some(value)
            })
            .and_then(|found| found.attribute(result_attribute).map(str::to_string))
            .unwrap_or_else(|| {
                debug!(
                    "{}: lookup of {monitor_type}.{result_attribute} where {match_attribute}={value} found nothing",
                    self.connector_id
                );
                String::new()
            })
    }
}

/// Writes the mapping of one job onto monitors
pub struct MonitorMapper<'a> {
    telemetry: &'a TelemetryManager,
    connector: &'a Connector,
    monitor_type: &'a str,
    mapping: &'a Mapping,
    strategy_time: i64,
    trigger: Option<&'a AlertTrigger>,
}

impl<'a> MonitorMapper<'a> {
    pub fn new(
        telemetry: &'a TelemetryManager,
        connector: &'a Connector,
        monitor_type: &'a str,
        mapping: &'a Mapping,
        strategy_time: i64,
    ) -> Self {
        Self {
            telemetry,
            connector,
            monitor_type,
            mapping,
            strategy_time,
            trigger: None,
        }
    }

    pub fn with_trigger(mut self, trigger: Option<&'a AlertTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    fn processor<'r>(&self, row: &'r [String]) -> MappingProcessor<'r>
    where
        'a: 'r,
    {
        let connector: &'a Connector = self.connector;
        MappingProcessor::new(self.telemetry, &connector.id, row)
    }

    /// Creates or refreshes the monitor described by `row`
    ///
    /// Returns `None` when the row does not produce a usable `id`.
    pub fn discover(
        &self,
        row: &[String],
        alert_rules: &BTreeMap<String, Vec<AlertRuleDefinition>>,
    ) -> Option<MonitorRef> {
        let processor = self.processor(row);
        let mut attributes = processor.interpret_non_context(&self.mapping.attributes);

        let Some(id) = attributes
            .get(ID_ATTRIBUTE)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
        else {
            warn!(
                "{}: {} row {row:?} has no id, skipping it",
                self.connector.id, self.monitor_type
            );
            return None;
        };

        let monitor_ref = self.monitor_for(&id, &mut attributes);

        let snapshot = {
            let mut monitor = monitor_ref.lock();
            monitor.add_attributes(&attributes);
            monitor.discovery_time = Some(self.strategy_time);
            monitor.clone()
        };

        let context_attributes = processor.interpret_context(&self.mapping.attributes, &snapshot);
        let snapshot = {
            let mut monitor = monitor_ref.lock();
            monitor.add_attributes(&context_attributes);
            monitor.clone()
        };

        let parent_id = self.telemetry.find_parent_monitor(&snapshot).map(|p| p.id);
        {
            let mut monitor = monitor_ref.lock();
            monitor.parent_id = parent_id;
            for (metric, definitions) in alert_rules {
                let rules = definitions.iter().map(AlertRule::from_definition).collect();
                monitor.add_alert_rules(metric, rules);
            }
        }

        self.update_values(&monitor_ref, &processor, &snapshot, true);
        Some(monitor_ref)
    }

    /// Refreshes metrics and parameters of an existing monitor from `row`
    pub fn collect(&self, monitor_ref: &MonitorRef, row: &[String]) {
        let processor = self.processor(row);
        let snapshot = monitor_ref.lock().clone();
        self.update_values(monitor_ref, &processor, &snapshot, false);
    }

    fn monitor_for(&self, id: &str, attributes: &mut BTreeMap<String, String>) -> MonitorRef {
        // connectors describing the host enrich the endpoint instead of adding a host
        if self.monitor_type == HOST_TYPE
            && let Some(host) = self.telemetry.endpoint_host_monitor_ref()
        {
            attributes.remove(ID_ATTRIBUTE);
            return host;
        }

        attributes.insert(CONNECTOR_ID_ATTRIBUTE.to_string(), self.connector.id.clone());
        let monitor_id = build_monitor_id(&self.connector.id, self.monitor_type, id);
        self.telemetry
            .get_or_create_monitor(self.monitor_type, &monitor_id, || {
                debug!("{}: new {} monitor {monitor_id}", self.connector.id, self.monitor_type);
                Monitor::new(monitor_id.clone(), self.monitor_type)
            })
    }

    fn update_values(
        &self,
        monitor_ref: &MonitorRef,
        processor: &MappingProcessor,
        snapshot: &Monitor,
        reset_metric_time: bool,
    ) {
        let conditional_collection =
            processor.interpret_all(&self.mapping.conditional_collection, snapshot);
        let metrics = processor.interpret_all(&self.mapping.metrics, snapshot);
        let legacy_text_parameters =
            processor.interpret_all(&self.mapping.legacy_text_parameters, snapshot);

        let factory = MetricFactory::new(Some(&self.connector.metrics)).with_trigger(self.trigger);
        let mut monitor = monitor_ref.lock();
        monitor.conditional_collection.extend(conditional_collection);

        for (name, value) in &metrics {
            if monitor.is_collection_disabled(name) {
                debug!("{}: collection of {name} is disabled", monitor.id);
                continue;
            }
            factory.collect(
                &mut monitor,
                name,
                value,
                self.strategy_time,
                reset_metric_time,
            );
        }

        monitor.legacy_text_parameters.extend(legacy_text_parameters);
    }
}
