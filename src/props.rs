//! Property store: the bounded key→value table guests query by name.
//!
//! Mirrors the classic Android property service surface: string keys and
//! values with hard length limits, get/set only, no deletion, no watch
//! notifications. New guests are pre-seeded with a handful of `ro.*`
//! identity properties.

use crate::constants::{
    validate_property_key, MAX_PROPERTIES, MAX_PROPERTY_VALUE_LEN,
};
use crate::error::{Error, Result};
use tracing::debug;

/// Bounded string key→value table.
#[derive(Debug)]
pub struct PropertyStore {
    entries: Vec<(String, String)>,
}

impl PropertyStore {
    /// Empty store with no seed properties.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Store pre-seeded with the identity properties guests expect.
    pub fn new() -> Self {
        let mut store = Self::empty();
        for (key, value) in [
            ("ro.build.version.sdk", "33"),
            ("ro.product.board", "guestkit"),
            ("ro.hardware", "emulated"),
            ("ro.serialno", "GUESTKIT0000"),
        ] {
            // Seed values are static and within bounds.
            let _ = store.set(key, value);
        }
        store
    }

    /// Inserts or overwrites a property.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidProperty`] for bad keys or oversized values
    /// - [`Error::PropertyTableFull`] when inserting past [`MAX_PROPERTIES`]
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if let Err(reason) = validate_property_key(key) {
            return Err(Error::InvalidProperty {
                key: key.to_string(),
                reason,
            });
        }
        if value.len() > MAX_PROPERTY_VALUE_LEN {
            return Err(Error::InvalidProperty {
                key: key.to_string(),
                reason: "property value exceeds maximum length",
            });
        }

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
            return Ok(());
        }
        if self.entries.len() >= MAX_PROPERTIES {
            return Err(Error::PropertyTableFull {
                capacity: MAX_PROPERTIES,
            });
        }
        debug!("property set: {}={}", key, value);
        self.entries.push((key.to_string(), value.to_string()));
        Ok(())
    }

    /// Looks up a property by exact key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut props = PropertyStore::empty();
        props.set("persist.sys.locale", "en-US").unwrap();
        assert_eq!(props.get("persist.sys.locale"), Some("en-US"));
        assert_eq!(props.get("missing"), None);
    }

    #[test]
    fn set_overwrites_existing_key() {
        let mut props = PropertyStore::empty();
        props.set("a.b", "1").unwrap();
        props.set("a.b", "2").unwrap();
        assert_eq!(props.get("a.b"), Some("2"));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn rejects_invalid_keys_and_long_values() {
        let mut props = PropertyStore::empty();
        assert!(props.set("", "x").is_err());
        assert!(props.set("bad key", "x").is_err());
        assert!(props
            .set("ok.key", &"v".repeat(MAX_PROPERTY_VALUE_LEN + 1))
            .is_err());
    }

    #[test]
    fn table_full_is_recoverable_by_overwrite() {
        let mut props = PropertyStore::empty();
        for i in 0..MAX_PROPERTIES {
            props.set(&format!("k.{i}"), "v").unwrap();
        }
        assert!(matches!(
            props.set("one.more", "v"),
            Err(Error::PropertyTableFull { .. })
        ));
        // Overwrites still work at capacity.
        props.set("k.0", "updated").unwrap();
        assert_eq!(props.get("k.0"), Some("updated"));
    }

    #[test]
    fn seeded_store_has_identity_properties() {
        let props = PropertyStore::new();
        assert!(props.get("ro.hardware").is_some());
    }
}
