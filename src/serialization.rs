//! Force serialization of sources that must not run concurrently
//!
//! Some protocol clients keep a session per endpoint and break when two requests share it.
//! Sources and criteria flagged `force_serialization` therefore run under an exclusive lock
//! scoped to their connector namespace. Other sources of the same target, and the same
//! connector on other targets, are not affected.
//!
//! Acquisition is bounded: when the lock cannot be taken in time the call is abandoned with a
//! warning and the caller receives the default value (an empty table for sources).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{trace, warn};

/// Lock table keyed by connector namespace
#[derive(Debug)]
pub struct ForceSerializationCoordinator {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl ForceSerializationCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(namespace.to_string()).or_default())
    }

    /// Runs `call` while holding the namespace lock
    ///
    /// Returns `T::default()` when the lock was not acquired within the timeout.
    pub fn execute<T, F>(&self, namespace: &str, description: &str, call: F) -> T
    where
        T: Default,
        F: FnOnce() -> T,
    {
        let lock = self.namespace_lock(namespace);

        let Some(_guard) = lock.try_lock_for(self.timeout) else {
            warn!(
                "{namespace}: could not acquire the serialization lock for {description} within {:?}",
                self.timeout
            );
            return T::default();
        };

        trace!("{namespace}: running {description} under serialization lock");
        call()
    }

    /// Whether a serialized call ever went through `namespace`
    pub fn is_serialized(&self, namespace: &str) -> bool {
        self.locks.lock().contains_key(namespace)
    }
}
