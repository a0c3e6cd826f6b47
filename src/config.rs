use crate::auth::AuthLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid model registry: {}", .0.join("; "))]
    InvalidModels(Vec<String>),

    #[error("authorization level {0:?} requires at least one key")]
    NoKeys(AuthLevel),
}

/// Strings placed around a prompt before it is queued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptWrappers {
    #[serde(default)]
    pub pre: String,
    #[serde(default)]
    pub post: String,
}

impl PromptWrappers {
    pub fn wrap(&self, prompt: &str) -> String {
        format!("{}{}{}", self.pre, prompt, self.post)
    }
}

/// A model entry from `models.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub prompt_wrappers: Option<PromptWrappers>,
    /// Default sampling mode when the request does not set one.
    pub mirostat: Option<u32>,
    pub notes: Option<String>,
}

impl ModelProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_wrappers: None,
            mirostat: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRegistryConfig {
    #[serde(default)]
    pub models: Vec<ModelProfile>,
}

impl ModelRegistryConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();
        for profile in &self.models {
            if profile.name.trim().is_empty() {
                errors.push("model with empty name".to_string());
                continue;
            }
            if !names.insert(profile.name.clone()) {
                errors.push(format!("duplicate model name '{}'", profile.name));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidModels(errors))
        }
    }
}

/// Read-only lookup of model profiles.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelProfile>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            models: vec![ModelProfile::named("default")],
        }
    }
}

impl ModelRegistry {
    pub fn from_config(cfg: ModelRegistryConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        if cfg.models.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self { models: cfg.models })
    }

    pub fn find(&self, name: &str) -> Option<&ModelProfile> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn list(&self) -> &[ModelProfile] {
        &self.models
    }
}

/// Resolves the registry file: explicit path, then the environment, then
/// `models.yaml` / `models.yml` in the working directory.
pub fn load_model_registry(explicit: Option<&str>) -> Result<ModelRegistry, ConfigError> {
    let from_env = std::env::var("PROMPT_GATEWAY_MODELS_CONFIG").ok();
    let candidates: Vec<String> = match explicit.map(str::to_string).or(from_env) {
        Some(path) => vec![path],
        None => vec!["models.yaml".to_string(), "models.yml".to_string()],
    };
    let required = candidates.len() == 1;

    for candidate in candidates {
        if required || Path::new(&candidate).exists() {
            let cfg = ModelRegistryConfig::load(&candidate)?;
            tracing::info!("Loaded {} model(s) from {candidate}", cfg.models.len());
            return ModelRegistry::from_config(cfg);
        }
    }
    tracing::info!("No models config found, serving the 'default' model only");
    Ok(ModelRegistry::default())
}

/// One key per line; blank lines and `#` comments are skipped.
pub fn load_keys(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_keys(&content))
}

pub fn parse_keys(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
