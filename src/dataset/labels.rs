//! Label Registry
//!
//! Dense zero-based mapping between class names and output indices. Index order
//! is the sorted order of the class sub-directory names, which is the order the
//! trainer discovers classes in. Persisted as a JSON object `{"name": index}`.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::utils::error::{Error, Result};

/// Bidirectional class name <-> index mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRegistry {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelRegistry {
    /// Build a registry from class names in index order.
    ///
    /// Fails on duplicate names.
    pub fn new(names: Vec<String>) -> Result<Self> {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::Labels(format!("Duplicate class name '{}'", name)));
            }
        }
        Ok(Self { names, index })
    }

    /// Build a registry from the sorted sub-directory names of `dir`
    pub fn discover(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::PathNotFound(dir.to_path_buf()));
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        if names.is_empty() {
            return Err(Error::Dataset(format!(
                "No class sub-directories found in {:?}",
                dir
            )));
        }

        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Class names in index order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), Value::from(i)))
            .collect();
        Value::Object(map)
    }

    /// Parse `{"name": index}`; indices must be exactly `0..n` with no repeats
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::Labels("Expected a JSON object of name -> index".to_string()))?;

        let mut slots: Vec<Option<String>> = vec![None; map.len()];
        for (name, idx) in map {
            let idx = idx
                .as_u64()
                .ok_or_else(|| Error::Labels(format!("Index for '{}' is not an integer", name)))?
                as usize;

            let slot = slots.get_mut(idx).ok_or_else(|| {
                Error::Labels(format!("Index {} for '{}' is out of range", idx, name))
            })?;
            if let Some(existing) = slot {
                return Err(Error::Labels(format!(
                    "Index {} assigned to both '{}' and '{}'",
                    idx, existing, name
                )));
            }
            *slot = Some(name.clone());
        }

        // Length matches and no slot is taken twice, so every slot is filled
        let names = slots.into_iter().flatten().collect();
        Self::new(names)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.to_json())?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&json)?;
        Self::from_json(&value)
    }

    /// Fail unless the registry matches a model's output width
    pub fn ensure_width(&self, num_classes: usize) -> Result<()> {
        if self.len() != num_classes {
            return Err(Error::Labels(format!(
                "Label registry has {} classes but the model outputs {}",
                self.len(),
                num_classes
            )));
        }
        Ok(())
    }
}
