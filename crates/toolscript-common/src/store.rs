//! Key/value configuration store.
//!
//! [`Store`] holds string values keyed by name and converts them on lookup.
//! Tool configuration files use a line-oriented format:
//!
//! ```text
//! # comment
//! PythonScript DummyTool
//! verbosity    2        # trailing comments are stripped
//! ```
//!
//! The first whitespace-separated token is the key, the rest of the line
//! (trimmed) is the value.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::StoreError;

/// A store shared between a tool and the script it drives.
pub type SharedStore = Arc<RwLock<Store>>;

/// String key/value store with typed lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Store {
    values: BTreeMap<String, String>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Ok(Self::parse(&content))
    }

    /// Parse a store from configuration text.
    ///
    /// Lines without a value are skipped with a warning.
    pub fn parse(content: &str) -> Self {
        let mut store = Self::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                warn!(line = lineno + 1, key = line, "Config entry has no value, skipping");
                continue;
            };

            store.set(key, value.trim());
        }

        store
    }

    /// Copy every entry of `other` into this store, overwriting duplicates.
    pub fn merge(&mut self, other: Store) {
        self.values.extend(other.values);
    }

    /// Look up a key and convert its value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingKey`] if the key is absent and
    /// [`StoreError::Conversion`] if the value does not parse as `T`.
    pub fn get<T: FromStr>(&self, key: &str) -> Result<T, StoreError> {
        let value = self.values.get(key).ok_or_else(|| StoreError::MissingKey {
            key: key.to_string(),
        })?;

        value.parse().map_err(|_| StoreError::Conversion {
            key: key.to_string(),
            value: value.clone(),
            target: std::any::type_name::<T>(),
        })
    }

    /// Look up a key, falling back to `default` if it is absent or unparseable.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Raw string value of a key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Remove a key, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Returns `true` if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Wrap the store for sharing with a script instance.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }
}

/// Strip a `#` comment that starts the line or follows whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}
