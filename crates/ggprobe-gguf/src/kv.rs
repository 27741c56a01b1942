use crate::error::{GgufError, Result};
use crate::value::{GgufArray, GgufValue};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A key-value pair from the GGUF metadata section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GgufKv {
    pub key: String,
    pub value: GgufValue,
}

/// Metadata key-values in file order, indexed by exact key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataKv {
    entries: Vec<GgufKv>,
    index: HashMap<String, usize>,
}

impl MetadataKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from pairs, rejecting duplicate keys.
    pub fn from_entries(entries: impl IntoIterator<Item = GgufKv>) -> Result<Self> {
        let mut kv = Self::new();
        for entry in entries {
            kv.insert(entry)?;
        }
        Ok(kv)
    }

    pub(crate) fn insert(&mut self, entry: GgufKv) -> Result<()> {
        if self.index.contains_key(&entry.key) {
            return Err(GgufError::malformed(format!("duplicate metadata key {:?}", entry.key)));
        }
        self.index.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.index.get(key).map(|&i| &self.entries[i].value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GgufKv> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Numeric value at `key` converted to `T`; `None` when absent,
    /// non-numeric, or out of range for `T`.
    pub fn get_numeric<T: NumCast>(&self, key: &str) -> Option<T> {
        self.get(key)?.to_numeric()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    pub fn get_array(&self, key: &str) -> Option<&GgufArray> {
        self.get(key)?.as_array()
    }
}

impl<'a> IntoIterator for &'a MetadataKv {
    type Item = &'a GgufKv;
    type IntoIter = std::slice::Iter<'a, GgufKv>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: GgufValue) -> GgufKv {
        GgufKv { key: key.to_owned(), value }
    }

    #[test]
    fn keeps_file_order_and_exact_lookup() {
        let store = MetadataKv::from_entries([
            kv("general.architecture", GgufValue::String("llama".into())),
            kv("llama.block_count", GgufValue::Uint32(32)),
        ])
        .unwrap();
        assert_eq!(store.keys().collect::<Vec<_>>(), ["general.architecture", "llama.block_count"]);
        assert_eq!(store.get_string("general.architecture"), Some("llama"));
        assert_eq!(store.get_numeric::<u64>("llama.block_count"), Some(32));
        assert!(store.get("llama.block").is_none());
    }

    #[test]
    fn duplicate_key_is_malformed() {
        let err = MetadataKv::from_entries([
            kv("a", GgufValue::Uint8(1)),
            kv("a", GgufValue::Uint8(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, GgufError::Malformed(_)));
    }

    #[test]
    fn typed_getters_return_none_on_type_mismatch() {
        let store = MetadataKv::from_entries([kv("x", GgufValue::Bool(true))]).unwrap();
        assert_eq!(store.get_bool("x"), Some(true));
        assert_eq!(store.get_string("x"), None);
        assert_eq!(store.get_numeric::<u32>("x"), None);
        assert!(store.get_array("x").is_none());
    }
}
