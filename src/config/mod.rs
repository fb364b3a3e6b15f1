use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One configured model backend. Loaded once, never mutated by the core;
/// sessions reference it by index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Display name for the panel.
    pub name: String,
    /// Base URL of the OpenAI-compatible endpoint (e.g. `https://api.x.ai/v1`).
    pub url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Optional bearer API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A reusable system-prompt template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub prompt: String,
}

/// Externally supplied proxy record (e.g. from an OS settings collaborator).
/// Discovery is not the core's business; it only honors the result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    pub enabled: bool,
    pub server: Option<String>,
}

impl ProxySettings {
    /// The `host:port` to route through, when proxying is actually on.
    pub fn server_if_enabled(&self) -> Option<&str> {
        if self.enabled {
            self.server.as_deref().filter(|s| !s.is_empty())
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    models: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize)]
struct PromptsFile {
    #[serde(default)]
    templates: Vec<PromptTemplate>,
}

/// Load the model list from a config file. A missing or malformed file is a
/// hard error: without models there is nothing to fan out to.
pub async fn load_models(path: impl AsRef<Path>) -> Result<Vec<ModelConfig>, ConfigError> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let config: ConfigFile =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(config.models)
}

/// Load prompt templates. A missing or unreadable templates file just means
/// no templates; the chat works without them.
pub async fn load_templates(path: impl AsRef<Path>) -> Vec<PromptTemplate> {
    let path = path.as_ref();
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str::<PromptsFile>(&contents) {
        Ok(file) => file.templates,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed templates file");
            Vec::new()
        }
    }
}
