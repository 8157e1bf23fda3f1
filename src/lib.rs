pub mod alert;
pub mod config;
pub mod connector;
pub mod error;
pub mod extension;
pub mod logging;
pub mod ordered_sources;
pub mod reference;
pub mod serialization;
pub mod strategy;
pub mod table;
pub mod telemetry;

pub use error::{EngineError, EngineResult};
pub use table::SourceTable;
