//! Protocol extension boundary
//!
//! The engine never talks to devices itself. Every protocol (SNMP, WMI, HTTP, ...) is provided
//! by a [`ProtocolExtension`] registered in the [`ExtensionManager`], which dispatches each
//! source or criterion to the extension declaring its variant.
//!
//! Extensions are called synchronously and may block. Whatever goes wrong inside an extension,
//! an error or a panic, is turned into "no result" at this boundary: an empty table for a source,
//! a failed test for a criterion.

use std::collections::{BTreeMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connector::{Criterion, CriterionTestResult, CriterionType, Source, SourceType};
use crate::error::{EngineError, EngineResult};
use crate::table::SourceTable;
use crate::telemetry::TelemetryManager;

pub trait ProtocolExtension: Send + Sync {
    /// Name of the protocol, also the key of its entry in the host configurations
    fn identifier(&self) -> &str;

    fn is_valid_configuration(&self, configuration: &serde_json::Value) -> bool;

    fn supported_sources(&self) -> HashSet<SourceType>;

    fn supported_criteria(&self) -> HashSet<CriterionType>;

    fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> EngineResult<SourceTable>;

    fn process_criterion(
        &self,
        criterion: &Criterion,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> EngineResult<CriterionTestResult>;

    /// Liveness probe of the protocol against the host
    fn check_protocol(&self, telemetry: &TelemetryManager) -> EngineResult<bool>;
}

#[derive(Clone, Default)]
pub struct ExtensionManager {
    extensions: Vec<Arc<dyn ProtocolExtension>>,
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extensions.iter().map(|e| e.identifier().to_string()))
            .finish()
    }
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extension: Arc<dyn ProtocolExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn add(&mut self, extension: Arc<dyn ProtocolExtension>) {
        self.extensions.push(extension);
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// An extension is usable when the host either has no configuration for it or a valid one
    fn is_usable(&self, extension: &dyn ProtocolExtension, telemetry: &TelemetryManager) -> bool {
        telemetry
            .host_configuration()
            .configurations
            .get(extension.identifier())
            .is_none_or(|configuration| extension.is_valid_configuration(configuration))
    }

    pub fn find_source_extension(
        &self,
        source_type: SourceType,
        telemetry: &TelemetryManager,
    ) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions
            .iter()
            .find(|e| {
                e.supported_sources().contains(&source_type) && self.is_usable(e.as_ref(), telemetry)
            })
            .cloned()
    }

    pub fn find_criterion_extension(
        &self,
        criterion_type: CriterionType,
        telemetry: &TelemetryManager,
    ) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions
            .iter()
            .find(|e| {
                e.supported_criteria().contains(&criterion_type)
                    && self.is_usable(e.as_ref(), telemetry)
            })
            .cloned()
    }

    /// Runs a source through its extension, never failing
    pub fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> SourceTable {
        match self.try_process_source(source, connector_id, telemetry) {
            Ok(table) => table,
            Err(e) => {
                warn!("{connector_id}: source {} failed: {e}", source.key);
                SourceTable::empty()
            }
        }
    }

    fn try_process_source(
        &self,
        source: &Source,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> EngineResult<SourceTable> {
        let source_type = source.source_type();
        let extension = self
            .find_source_extension(source_type, telemetry)
            .ok_or_else(|| EngineError::UnsupportedSource(source_type.to_string()))?;

        debug!(
            "{connector_id}: dispatching {} to {}",
            source.key,
            extension.identifier()
        );
        catch_unwind(AssertUnwindSafe(|| {
            extension.process_source(source, connector_id, telemetry)
        }))
        .unwrap_or_else(|_| {
            Err(EngineError::Protocol(format!(
                "{} panicked while processing the source",
                extension.identifier()
            )))
        })
    }

    /// Runs a criterion through its extension, never failing
    pub fn process_criterion(
        &self,
        criterion: &Criterion,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> CriterionTestResult {
        let criterion_type = criterion.criterion_type();
        let Some(extension) = self.find_criterion_extension(criterion_type, telemetry) else {
            return CriterionTestResult::failure(format!(
                "no protocol extension supports {criterion_type} criteria"
            ));
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            extension.process_criterion(criterion, connector_id, telemetry)
        }));
        match result {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CriterionTestResult::failure(e.to_string()),
            Err(_) => CriterionTestResult::failure(format!(
                "{} panicked while testing the criterion",
                extension.identifier()
            )),
        }
    }

    /// Probes every extension configured for the host
    pub fn check_protocols(&self, telemetry: &TelemetryManager) -> BTreeMap<String, bool> {
        self.extensions
            .iter()
            .filter(|e| {
                telemetry
                    .host_configuration()
                    .configurations
                    .contains_key(e.identifier())
                    && self.is_usable(e.as_ref(), telemetry)
            })
            .map(|e| {
                let up = catch_unwind(AssertUnwindSafe(|| e.check_protocol(telemetry)))
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or(false);
                (e.identifier().to_string(), up)
            })
            .collect()
    }
}
