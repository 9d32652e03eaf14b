use crate::error::StoreError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableOption {
    pub value: String,
    pub label: String,
}

/// One core option, normalized from whichever negotiation style the core used.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoreVariable {
    pub key: String,
    pub label: String,
    pub info: String,
    pub options: Vec<VariableOption>,
    pub current: usize,
    pub default: usize,
    pub visible: bool,
}

impl CoreVariable {
    /// Parses the `"Label; first|second|third"` form; the first value is the default.
    pub fn from_legacy(key: &str, raw: &str) -> Option<Self> {
        let (label, values) = raw.split_once("; ")?;
        let options = values
            .split('|')
            .filter(|value| !value.is_empty())
            .map(|value| VariableOption {
                value: value.to_string(),
                label: String::new(),
            })
            .collect();
        Some(Self {
            key: key.to_string(),
            label: label.to_string(),
            options,
            visible: true,
            ..Self::default()
        })
    }

    /// Builds a variable from a definition table entry, selecting the option
    /// whose value matches `default_value`, or the first one.
    pub fn from_definition(
        key: &str,
        desc: &str,
        info: &str,
        options: Vec<VariableOption>,
        default_value: Option<&str>,
    ) -> Self {
        let default = default_value
            .and_then(|d| options.iter().position(|o| o.value == d))
            .unwrap_or(0);
        Self {
            key: key.to_string(),
            label: desc.to_string(),
            info: info.to_string(),
            options,
            current: default,
            default,
            visible: true,
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.options.get(self.current).map(|o| o.value.as_str())
    }

    fn select_value(&mut self, value: &str) -> Option<bool> {
        let index = self.options.iter().position(|o| o.value == value)?;
        let changed = index != self.current;
        self.current = index;
        Some(changed)
    }
}

/// Ordered core options plus the "changed since last consumed" flag.
#[derive(Clone, Debug, Default)]
pub struct VariableSet {
    variables: Vec<CoreVariable>,
    index: HashMap<String, usize>,
    updated: bool,
    /// Values restored from disk, reapplied whenever the core redefines its options.
    stored: BTreeMap<String, String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a complete new option list and marks the set updated.
    /// Later duplicates of a key overwrite earlier ones in place.
    pub fn replace(&mut self, variables: Vec<CoreVariable>) {
        self.variables.clear();
        self.index.clear();
        for var in variables {
            match self.index.get(&var.key) {
                Some(&i) => self.variables[i] = var,
                None => {
                    self.index.insert(var.key.clone(), self.variables.len());
                    self.variables.push(var);
                }
            }
        }
        let stored = std::mem::take(&mut self.stored);
        for (key, value) in &stored {
            if let Some(&i) = self.index.get(key) {
                self.variables[i].select_value(value);
            }
        }
        self.stored = stored;
        self.updated = true;
        debug!("Core defined {} option(s)", self.variables.len());
    }

    /// Forgets the options and stored values of the previous core.
    pub fn clear(&mut self) {
        self.variables.clear();
        self.index.clear();
        self.stored.clear();
        self.updated = false;
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreVariable> {
        self.variables.iter()
    }

    pub fn get(&self, key: &str) -> Option<&CoreVariable> {
        self.index.get(key).map(|&i| &self.variables[i])
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(CoreVariable::value)
    }

    /// Selects the option of `key` whose value is `value`.
    pub fn set_value(&mut self, key: &str, value: &str) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        match self.variables[i].select_value(value) {
            Some(changed) => {
                self.updated |= changed;
                true
            }
            None => false,
        }
    }

    pub fn set_visible(&mut self, key: &str, visible: bool) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        self.variables[i].visible = visible;
        true
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Reads and clears the update flag.
    pub fn take_updated(&mut self) -> bool {
        std::mem::replace(&mut self.updated, false)
    }

    /// Loads stored option values from a JSON object of `key: value` strings.
    /// A missing file is not an error.
    pub fn load_overrides(&mut self, path: &Path) -> Result<(), StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let stored: BTreeMap<String, String> =
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        for (key, value) in &stored {
            if self.index.contains_key(key) && !self.set_value(key, value) {
                warn!("Ignoring stored value {value:?} for core option {key}");
            }
        }
        self.stored.extend(stored);
        Ok(())
    }

    /// Writes current values, merged over previously stored ones, as JSON.
    pub fn save(&mut self, path: &Path) -> Result<(), StoreError> {
        for var in &self.variables {
            if let Some(value) = var.value() {
                self.stored.insert(var.key.clone(), value.to_string());
            }
        }
        let json = serde_json::to_string_pretty(&self.stored).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
