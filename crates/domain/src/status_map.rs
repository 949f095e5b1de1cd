//! Status map — translation between external payload fields and capabilities.
//!
//! A [`StatusMap`] is plain configuration. [`StatusMapper`] compiles it once
//! (including the reverse field index) and is immutable afterwards.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::value::CapabilityValue;

/// Field and value translation table for one adapter/device pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusMap {
    /// External field name to internal capability name.
    pub field_rename: HashMap<String, String>,
    /// Per capability: external value (rendered as text) to internal value.
    pub value_map: HashMap<String, HashMap<String, serde_json::Value>>,
}

/// Compiled, read-only form of a [`StatusMap`].
#[derive(Debug, Clone, Default)]
pub struct StatusMapper {
    map: StatusMap,
    reverse_fields: HashMap<String, String>,
}

impl StatusMapper {
    #[must_use]
    pub fn new(map: StatusMap) -> Self {
        let mut renames: Vec<_> = map.field_rename.iter().collect();
        // several external fields may map to one capability; the
        // lexicographically first one is used outbound
        renames.sort();
        let mut reverse_fields = HashMap::new();
        for (external, internal) in renames {
            reverse_fields
                .entry(internal.clone())
                .or_insert_with(|| external.clone());
        }
        Self {
            map,
            reverse_fields,
        }
    }

    /// Translate raw inbound fields to capability values.
    ///
    /// Fields are renamed first, then their value is looked up in the
    /// capability's value map; values without an entry pass through.
    /// Non-scalar values are dropped.
    #[must_use]
    pub fn to_internal(
        &self,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> BTreeMap<String, CapabilityValue> {
        raw.iter()
            .filter_map(|(field, value)| {
                let name = self.map.field_rename.get(field).unwrap_or(field);
                let translated = self
                    .map
                    .value_map
                    .get(name)
                    .and_then(|values| values.get(&scalar_key(value)?))
                    .unwrap_or(value);
                CapabilityValue::from_json(translated).map(|v| (name.clone(), v))
            })
            .collect()
    }

    /// Translate one capability assignment to its external field and value.
    #[must_use]
    pub fn to_external(
        &self,
        capability: &str,
        value: &CapabilityValue,
    ) -> (String, serde_json::Value) {
        let field = self
            .reverse_fields
            .get(capability)
            .cloned()
            .unwrap_or_else(|| capability.to_string());
        let internal = value.to_json();
        let external = self
            .map
            .value_map
            .get(capability)
            .and_then(|values| {
                let wanted = scalar_key(&internal)?;
                let mut keys: Vec<_> = values
                    .iter()
                    .filter(|(_, mapped)| scalar_key(mapped).as_deref() == Some(wanted.as_str()))
                    .map(|(external, _)| external)
                    .collect();
                keys.sort();
                keys.first().map(|k| serde_json::Value::String((*k).clone()))
            })
            .unwrap_or(internal);
        (field, external)
    }
}

/// Render a JSON scalar the way value map keys are written.
fn scalar_key(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
