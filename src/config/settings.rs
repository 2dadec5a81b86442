//! String-keyed property bags.
//!
//! Both the host's ambient configuration and a table's properties are plain
//! string maps; typed access happens at the point of use.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{ConfigError, InvalidSettingSnafu};

/// Setting and property names understood by the connector.
pub mod keys {
    /// Store host (table property or ambient default).
    pub const HOST: &str = "store.host";
    /// Store port (table property or ambient default).
    pub const PORT: &str = "store.port";
    /// Resource path and optional query, e.g. `my_index/my_type?q=user:kimchy`.
    pub const LOCATION: &str = "store.location";

    /// Resolved `host:port` written into the job configuration.
    pub const ADDRESS: &str = "store.address";
    /// Write target.
    pub const RESOURCE: &str = "store.resource";
    /// Read query; identical to the resource.
    pub const QUERY: &str = "store.query";
    /// Output committer implementation name.
    pub const OUTPUT_COMMITTER: &str = "store.output.committer";

    /// Maximum records per flushed batch.
    pub const BATCH_SIZE_ENTRIES: &str = "store.batch.size.entries";
    /// Maximum encoded bytes per flushed batch.
    pub const BATCH_SIZE_BYTES: &str = "store.batch.size.bytes";
    /// Maximum records decoded per fetch on the read path.
    pub const SCROLL_SIZE: &str = "store.scroll.size";
    /// Attempts per task before the task is declared failed.
    pub const TASK_MAX_ATTEMPTS: &str = "store.task.max.attempts";
}

/// Ambient configuration supplied by the host framework.
pub type Settings = PropertyBag;

/// Properties attached to a table definition.
pub type TableProperties = PropertyBag;

/// An ordered string-to-string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(BTreeMap<String, String>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value for `key` with surrounding whitespace removed, treating blank as absent.
    pub fn get_trimmed(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Parse `key` as `T`, falling back to `default` when unset or blank.
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get_trimmed(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                InvalidSettingSnafu {
                    key: key.to_string(),
                    value: raw.to_string(),
                }
                .build()
            }),
        }
    }

    /// Like [`get_parsed`](Self::get_parsed) but rejects zero.
    pub fn get_positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.get_parsed(key, default)?;
        ensure_positive(key, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn ensure_positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return InvalidSettingSnafu {
            key: key.to_string(),
            value: "0".to_string(),
        }
        .fail();
    }
    Ok(value)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values_are_absent() {
        let bag = PropertyBag::new().with("a", "  ").with("b", " x ");
        assert_eq!(bag.get_trimmed("a"), None);
        assert_eq!(bag.get_trimmed("b"), Some("x"));
        assert_eq!(bag.get("a"), Some("  "));
    }

    #[test]
    fn test_get_parsed_default_and_error() {
        let bag = PropertyBag::new().with(keys::BATCH_SIZE_ENTRIES, "many");
        assert_eq!(bag.get_parsed(keys::SCROLL_SIZE, 7usize).unwrap(), 7);

        let err = bag.get_parsed(keys::BATCH_SIZE_ENTRIES, 1usize).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == keys::BATCH_SIZE_ENTRIES));
    }

    #[test]
    fn test_get_positive_rejects_zero() {
        let bag = PropertyBag::new().with(keys::BATCH_SIZE_ENTRIES, "0");
        assert!(bag.get_positive(keys::BATCH_SIZE_ENTRIES, 10).is_err());
        assert_eq!(bag.get_positive(keys::BATCH_SIZE_BYTES, 10).unwrap(), 10);
    }

    #[test]
    fn test_yaml_map_deserializes() {
        let bag: PropertyBag = serde_yaml::from_str("store.host: es0\nstore.port: '9201'\n").unwrap();
        assert_eq!(bag.get(keys::HOST), Some("es0"));
        assert_eq!(bag.get(keys::PORT), Some("9201"));
    }
}
