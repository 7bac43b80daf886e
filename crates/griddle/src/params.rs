use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Generation options that travel with a prompt, e.g. `max_tokens` or `top_k`.
///
/// The scheduler never interprets these; they are handed to the backend as-is
/// after the configured defaults have been merged underneath.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationParams(Map<String, Value>);

impl GenerationParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Adds an option, replacing any previous value for `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fills in every key of `defaults` this map does not already set.
    pub fn with_defaults(mut self, defaults: &GenerationParams) -> Self {
        for (key, value) in defaults.0.iter() {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
        self
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for GenerationParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<GenerationParams> for Map<String, Value> {
    fn from(params: GenerationParams) -> Self {
        params.0
    }
}
