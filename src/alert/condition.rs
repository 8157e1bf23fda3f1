use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl AlertOperator {
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            AlertOperator::Eq => value == threshold,
            AlertOperator::Ne => value != threshold,
            AlertOperator::Lt => value < threshold,
            AlertOperator::Le => value <= threshold,
            AlertOperator::Gt => value > threshold,
            AlertOperator::Ge => value >= threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            AlertOperator::Eq => "==",
            AlertOperator::Ne => "!=",
            AlertOperator::Lt => "<",
            AlertOperator::Le => "<=",
            AlertOperator::Gt => ">",
            AlertOperator::Ge => ">=",
        }
    }
}

/// `value <operator> threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub operator: AlertOperator,
    pub threshold: f64,
}

impl AlertCondition {
    pub fn new(operator: AlertOperator, threshold: f64) -> Self {
        Self {
            operator,
            threshold,
        }
    }

    pub fn matches(&self, value: f64) -> bool {
        self.operator.apply(value, self.threshold)
    }

    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.operator
            .cmp(&other.operator)
            .then(self.threshold.total_cmp(&other.threshold))
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator.symbol(), self.threshold)
    }
}

/// Sorts and deduplicates conditions so that two rules with the same set compare equal
pub fn normalize_conditions(mut conditions: Vec<AlertCondition>) -> Vec<AlertCondition> {
    conditions.sort_by(AlertCondition::total_cmp);
    conditions.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
    conditions
}
