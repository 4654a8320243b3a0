//! Capability handles for host services.
//!
//! Scripts never see host addresses. At bootstrap each script instance is
//! granted three opaque handles, one per host service, and passes them back
//! to host functions which look them up in that instance's [`HandleTable`].
//! A handle from one instance means nothing in another.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use toolscript_common::{DataModel, HostFunctionError, Logger, SharedStore};

/// A host service reachable from script code.
#[derive(Debug, Clone)]
pub enum Capability {
    /// The shared host data model.
    DataModel(Arc<DataModel>),
    /// The tool's own configuration store.
    Config(SharedStore),
    /// The chain logger.
    Logger(Logger),
}

impl Capability {
    /// Service name used in diagnostics.
    pub fn service(&self) -> &'static str {
        match self {
            Capability::DataModel(_) => "data model",
            Capability::Config(_) => "config store",
            Capability::Logger(_) => "logger",
        }
    }
}

/// Per-instance table of granted capabilities.
#[derive(Debug)]
pub struct HandleTable {
    entries: HashMap<u64, Capability>,
    next: u64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Create a table whose handles start at a random offset.
    pub fn new() -> Self {
        // Keep two bits of headroom so sequential grants stay below i64::MAX.
        let base = (Uuid::new_v4().as_u64_pair().0 >> 2).max(1);
        Self::with_base(base)
    }

    /// Create a table whose first handle is `base`.
    pub fn with_base(base: u64) -> Self {
        Self {
            entries: HashMap::new(),
            next: base,
        }
    }

    /// Grant a capability and return its handle.
    pub fn grant(&mut self, capability: Capability) -> u64 {
        let handle = self.next;
        self.next = self.next.wrapping_add(1);
        self.entries.insert(handle, capability);
        handle
    }

    /// Look up a handle passed by the guest.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::InvalidHandle`] if the handle was never granted.
    pub fn get(&self, raw: i64) -> Result<&Capability, HostFunctionError> {
        u64::try_from(raw)
            .ok()
            .and_then(|handle| self.entries.get(&handle))
            .ok_or(HostFunctionError::InvalidHandle { handle: raw })
    }

    /// Resolve a data-model handle.
    pub fn data_model(&self, raw: i64) -> Result<&Arc<DataModel>, HostFunctionError> {
        match self.get(raw)? {
            Capability::DataModel(data) => Ok(data),
            other => Err(wrong_service(raw, "data model", other)),
        }
    }

    /// Resolve a config-store handle.
    pub fn config(&self, raw: i64) -> Result<&SharedStore, HostFunctionError> {
        match self.get(raw)? {
            Capability::Config(store) => Ok(store),
            other => Err(wrong_service(raw, "config store", other)),
        }
    }

    /// Resolve a logger handle.
    pub fn logger(&self, raw: i64) -> Result<&Logger, HostFunctionError> {
        match self.get(raw)? {
            Capability::Logger(logger) => Ok(logger),
            other => Err(wrong_service(raw, "logger", other)),
        }
    }

    /// Drop every granted capability.
    pub fn revoke_all(&mut self) {
        self.entries.clear();
    }

    /// Number of live grants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn wrong_service(raw: i64, expected: &'static str, actual: &Capability) -> HostFunctionError {
    HostFunctionError::WrongService {
        handle: raw,
        expected,
        actual: actual.service(),
    }
}

/// Encode a handle as the guest's 64-bit integer without loss.
///
/// # Errors
///
/// Returns the handle back if it does not fit in an `i64`.
pub fn encode_handle(handle: u64) -> Result<i64, u64> {
    i64::try_from(handle).map_err(|_| handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolscript_common::Store;

    #[test]
    fn test_grant_and_resolve() {
        let mut table = HandleTable::with_base(10);
        let data = table.grant(Capability::DataModel(Arc::new(DataModel::default())));
        let config = table.grant(Capability::Config(Store::new().into_shared()));
        let log = table.grant(Capability::Logger(Logger::new("test")));

        assert_eq!((data, config, log), (10, 11, 12));
        assert!(table.data_model(10).is_ok());
        assert!(table.config(11).is_ok());
        assert_eq!(table.logger(12).unwrap().name(), "test");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_wrong_service() {
        let mut table = HandleTable::with_base(1);
        let log = table.grant(Capability::Logger(Logger::default()));

        let err = table.config(i64::try_from(log).unwrap()).unwrap_err();
        assert_eq!(
            err,
            HostFunctionError::WrongService {
                handle: 1,
                expected: "config store",
                actual: "logger",
            }
        );
    }

    #[test]
    fn test_invalid_handles() {
        let mut table = HandleTable::new();
        table.grant(Capability::Logger(Logger::default()));

        assert!(matches!(
            table.get(-5),
            Err(HostFunctionError::InvalidHandle { handle: -5 })
        ));
        assert!(table.get(0).is_err());
    }

    #[test]
    fn test_random_base_fits_guest_integer() {
        let mut table = HandleTable::new();
        for _ in 0..3 {
            let handle = table.grant(Capability::Logger(Logger::default()));
            assert!(encode_handle(handle).is_ok());
        }
    }

    #[test]
    fn test_encode_handle_overflow() {
        assert_eq!(encode_handle(42), Ok(42));
        assert_eq!(encode_handle(u64::MAX), Err(u64::MAX));
    }

    #[test]
    fn test_revoke_all() {
        let mut table = HandleTable::with_base(1);
        table.grant(Capability::Logger(Logger::default()));
        table.revoke_all();
        assert!(table.is_empty());
        assert!(table.logger(1).is_err());
    }
}
