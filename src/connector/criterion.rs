//! Detection criteria

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(default)]
    pub force_serialization: bool,

    #[serde(flatten)]
    pub kind: CriterionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CriterionKind {
    /// Matches the configured host type, evaluated by the engine
    DeviceType {
        #[serde(default)]
        keep: BTreeSet<String>,
        #[serde(default)]
        exclude: BTreeSet<String>,
    },
    Http {
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        expected_result: Option<String>,
    },
    SnmpGet {
        oid: String,
        #[serde(default)]
        expected_result: Option<String>,
    },
    SnmpGetNext {
        oid: String,
        #[serde(default)]
        expected_result: Option<String>,
    },
    Wmi {
        query: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        expected_result: Option<String>,
    },
    Wbem {
        query: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        expected_result: Option<String>,
    },
    Ipmi {},
    CommandLine {
        command_line: String,
        #[serde(default)]
        expected_result: Option<String>,
    },
    Service {
        name: String,
    },
    Process {
        command_line: String,
    },
    Sql {
        query: String,
        #[serde(default)]
        expected_result: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CriterionType {
    DeviceType,
    Http,
    SnmpGet,
    SnmpGetNext,
    Wmi,
    Wbem,
    Ipmi,
    CommandLine,
    Service,
    Process,
    Sql,
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl CriterionKind {
    pub fn criterion_type(&self) -> CriterionType {
        match self {
            CriterionKind::DeviceType { .. } => CriterionType::DeviceType,
            CriterionKind::Http { .. } => CriterionType::Http,
            CriterionKind::SnmpGet { .. } => CriterionType::SnmpGet,
            CriterionKind::SnmpGetNext { .. } => CriterionType::SnmpGetNext,
            CriterionKind::Wmi { .. } => CriterionType::Wmi,
            CriterionKind::Wbem { .. } => CriterionType::Wbem,
            CriterionKind::Ipmi {} => CriterionType::Ipmi,
            CriterionKind::CommandLine { .. } => CriterionType::CommandLine,
            CriterionKind::Service { .. } => CriterionType::Service,
            CriterionKind::Process { .. } => CriterionType::Process,
            CriterionKind::Sql { .. } => CriterionType::Sql,
        }
    }
}

impl Criterion {
    pub fn new(kind: CriterionKind) -> Self {
        Self {
            force_serialization: false,
            kind,
        }
    }

    pub fn criterion_type(&self) -> CriterionType {
        self.kind.criterion_type()
    }
}

/// Outcome of one criterion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionTestResult {
    pub success: bool,
    pub message: String,
    /// Raw value returned by the probe, when any
    #[serde(default)]
    pub result: Option<String>,
}

impl CriterionTestResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            result: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}
