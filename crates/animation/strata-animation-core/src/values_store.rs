//! Named float parameters (blend weights and similar) shared by one manager.

use hashbrown::HashMap;
use log::{debug, warn};

/// String → f64 store. Reading a missing key logs a warning and yields the default.
#[derive(Clone, Debug)]
pub struct ValuesStore {
    values: HashMap<String, f64>,
    default_value: f64,
    log_on_replace: bool,
}

impl Default for ValuesStore {
    fn default() -> Self {
        Self::new(0.0, false)
    }
}

impl ValuesStore {
    pub fn new(default_value: f64, log_on_replace: bool) -> Self {
        Self {
            values: HashMap::new(),
            default_value,
            log_on_replace,
        }
    }

    pub fn get(&self, key: &str) -> f64 {
        match self.values.get(key) {
            Some(v) => *v,
            None => {
                warn!(
                    "values store has no key '{}'; using default {}",
                    key, self.default_value
                );
                self.default_value
            }
        }
    }

    /// Lookup without the missing-key warning.
    pub fn try_get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: f64) -> Option<f64> {
        let key = key.into();
        let previous = self.values.insert(key.clone(), value);
        if let (Some(old), true) = (previous, self.log_on_replace) {
            debug!("values store '{}' replaced {} with {}", key, old, value);
        }
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<f64> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    pub fn set_default_value(&mut self, default_value: f64) {
        self.default_value = default_value;
    }

    pub fn log_on_replace(&self) -> bool {
        self.log_on_replace
    }

    pub fn set_log_on_replace(&mut self, enabled: bool) {
        self.log_on_replace = enabled;
    }
}
