//! Config patching: merging job settings into the workflow's config files.
//!
//! A patch is shallow: each top-level key in the patch replaces the key of
//! the same name in the destination, and every other destination key is
//! left as it was. Nested objects are replaced whole, not merged.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// Payload section name → config file name inside the workflow directory.
pub const DEFAULT_CONFIG_FILES: &[(&str, &str)] = &[
    ("input", "TRC_Source.conf"),
    ("generation", "llgen1.conf"),
    ("geometry", "geom_cust.conf"),
    ("muscle", "musc_cust.conf"),
];

/// The default section → file mapping as an owned map.
pub fn default_config_files() -> BTreeMap<String, String> {
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|(section, file)| (section.to_string(), file.to_string()))
        .collect()
}

/// A set of top-level key overrides for a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    entries: Map<String, Value>,
}

impl ConfigPatch {
    /// Build a patch from a JSON value; only objects are patches.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|entries| Self {
            entries: entries.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite the patched keys in `target`.
    pub fn apply(&self, target: &mut Map<String, Value>) {
        for (key, value) in &self.entries {
            target.insert(key.clone(), value.clone());
        }
    }

    /// Patch the JSON object stored in `path`, rewriting it in place.
    pub fn apply_to_file(&self, path: &Path) -> Result<(), WorkflowError> {
        let patch_err = |reason: String| WorkflowError::ConfigPatch {
            path: path.to_path_buf(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| patch_err(e.to_string()))?;
        let mut current = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(patch_err("config is not a JSON object".to_string())),
            Err(e) => return Err(patch_err(format!("invalid JSON: {e}"))),
        };

        self.apply(&mut current);

        let rendered =
            serde_json::to_string(&Value::Object(current)).map_err(|e| patch_err(e.to_string()))?;
        std::fs::write(path, rendered).map_err(|e| patch_err(e.to_string()))
    }
}
