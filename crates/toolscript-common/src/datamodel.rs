//! Shared host data model.
//!
//! The [`DataModel`] is the blackboard every tool in a chain reads and writes.
//! The host owns it and lends it to each script through the data-model
//! capability; scripts never receive its address.

use parking_lot::RwLock;

use crate::logger::Logger;
use crate::store::Store;

/// Data shared between the host and all tools in a chain.
#[derive(Debug, Default)]
pub struct DataModel {
    vars: RwLock<Store>,
    log: Logger,
}

impl DataModel {
    /// Create an empty data model with the given logger.
    pub fn new(log: Logger) -> Self {
        Self {
            vars: RwLock::new(Store::new()),
            log,
        }
    }

    /// The chain-wide logger.
    pub fn logger(&self) -> &Logger {
        &self.log
    }

    /// Read a value.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.vars.read().get_str(key).map(str::to_string)
    }

    /// Read and convert a value.
    pub fn get<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.vars.read().get(key).ok()
    }

    /// Write a value.
    pub fn set(&self, key: impl Into<String>, value: impl ToString) {
        self.vars.write().set(key, value);
    }

    /// Snapshot of all values.
    pub fn snapshot(&self) -> Store {
        self.vars.read().clone()
    }
}
