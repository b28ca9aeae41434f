//! Model registry and provider configuration
//!
//! Both load from JSON files at startup; mutations are in-memory only.

use crate::error::AgentError;
use crate::types::Model;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A model entry from models.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String,
    pub name: String,
    pub context_window: u32,
    pub max_output: u32,
    #[serde(rename = "input_cost_per_million")]
    pub input_cost_per_1m: f64,
    #[serde(rename = "output_cost_per_million")]
    pub output_cost_per_1m: f64,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_tools: bool,
    #[serde(default)]
    pub supports_thinking: bool,
}

#[derive(Debug, Deserialize)]
struct ModelsFile {
    models: Vec<ModelConfig>,
}

/// Registry of known models, keyed by id. Preserves file order for
/// `cycle`-style iteration.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load models from a JSON file, extending the registry.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), AgentError> {
        let data = std::fs::read(path.as_ref()).map_err(|err| {
            AgentError::Config(format!(
                "failed to read models file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let file: ModelsFile = serde_json::from_slice(&data)
            .map_err(|err| AgentError::Config(format!("failed to parse models file: {err}")))?;
        for model in file.models {
            self.register(model);
        }
        Ok(())
    }

    pub fn register(&mut self, config: ModelConfig) {
        if !self.models.contains_key(&config.id) {
            self.order.push(config.id.clone());
        }
        self.models.insert(config.id.clone(), config);
    }

    pub fn get(&self, id: &str) -> Result<&ModelConfig, AgentError> {
        self.models
            .get(id)
            .ok_or_else(|| AgentError::Config(format!("model not found: {id}")))
    }

    /// All models, in registration order.
    pub fn list(&self) -> Vec<&ModelConfig> {
        self.order
            .iter()
            .filter_map(|id| self.models.get(id))
            .collect()
    }

    pub fn list_by_provider(&self, provider: &str) -> Vec<&ModelConfig> {
        self.list()
            .into_iter()
            .filter(|m| m.provider == provider)
            .collect()
    }

    /// The registered model after `current_id`, wrapping around.
    pub fn next_after(&self, current_id: &str) -> Option<&ModelConfig> {
        if self.order.is_empty() {
            return None;
        }
        let pos = self.order.iter().position(|id| id == current_id);
        let next = match pos {
            Some(i) => (i + 1) % self.order.len(),
            None => 0,
        };
        self.models.get(&self.order[next])
    }

    /// Resolve a registry entry into a runtime [`Model`].
    pub fn to_model(&self, id: &str) -> Result<Model, AgentError> {
        let config = self.get(id)?;
        Ok(Model {
            id: config.id.clone(),
            provider: config.provider.clone(),
            name: config.name.clone(),
            context_window: config.context_window,
            max_output: config.max_output,
            input_cost_per_1m: config.input_cost_per_1m,
            output_cost_per_1m: config.output_cost_per_1m,
            supports_vision: config.supports_vision,
            supports_tools: config.supports_tools,
            supports_thinking: config.supports_thinking,
        })
    }
}

/// Configuration for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// The providers.json file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
}

impl ProvidersConfig {
    /// Load from a JSON file, expanding `${ENV_VAR}` references in API keys
    /// against the process environment (missing variables become empty).
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let data = std::fs::read(path.as_ref()).map_err(|err| {
            AgentError::Config(format!(
                "failed to read providers config {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let mut config: Self = serde_json::from_slice(&data)
            .map_err(|err| AgentError::Config(format!("failed to parse providers config: {err}")))?;
        for provider in config.providers.values_mut() {
            provider.api_key = expand_env_vars(&provider.api_key);
        }
        Ok(config)
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

/// Expand `${VAR}` references against the environment.
fn expand_env_vars(input: &str) -> String {
    if !input.contains("${") {
        return input.to_string();
    }
    let mut result = input.to_string();
    loop {
        let Some(start) = result.find("${") else {
            break;
        };
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let end = start + end;
        let name = &result[start + 2..end];
        let value = std::env::var(name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[end + 1..]);
    }
    result
}
