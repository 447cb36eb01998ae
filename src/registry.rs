//! Model registry — read-only resolution of model shortnames.
//!
//! The registry file is the surrounding tool's `config.json` (under
//! `$MQ_HOME`, defaulting to `~/.mq`): a keyed map of shortname to provider,
//! full model identifier, saved system prompt, and default sampling
//! parameters. The batch engine only ever reads it; registration and removal
//! belong to the surrounding tool.

use crate::error::{Error, Result};
use crate::types::SamplingParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// One registered model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Provider name (e.g. "openai", "openrouter")
    pub provider: String,

    /// Full model identifier passed to the provider
    pub model: String,

    /// Saved system prompt for this model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysprompt: Option<String>,

    /// Default sampling parameters, stored inline on the entry
    #[serde(flatten)]
    pub sampling: SamplingParams,

    /// Explicit API base URL; when absent, derived from the provider name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key; when absent, derived from
    /// the provider name (`<PROVIDER>_API_KEY`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// When the entry was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the entry was last updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModelEntry {
    /// API base URL for this entry: the explicit `base_url`, or a well-known
    /// default derived from the provider name.
    pub fn resolved_base_url(&self) -> Result<Url> {
        let raw = match &self.base_url {
            Some(explicit) => explicit.clone(),
            None => match self.provider.as_str() {
                "openai" => "https://api.openai.com/v1".to_string(),
                "openrouter" => "https://openrouter.ai/api/v1".to_string(),
                other => {
                    return Err(Error::Config {
                        message: format!(
                            "provider {other:?} has no default endpoint; set base_url on the entry"
                        ),
                        key: Some("base_url".to_string()),
                    });
                }
            },
        };
        Url::parse(&raw).map_err(|e| Error::Config {
            message: format!("invalid base_url {raw:?}: {e}"),
            key: Some("base_url".to_string()),
        })
    }

    /// Name of the environment variable holding the API key: the explicit
    /// `api_key_env`, or `<PROVIDER>_API_KEY`.
    pub fn resolved_api_key_env(&self) -> String {
        match &self.api_key_env {
            Some(explicit) => explicit.clone(),
            None => format!("{}_API_KEY", self.provider.to_uppercase()),
        }
    }
}

/// On-disk registry file layout.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<u32>,
    #[serde(default)]
    models: BTreeMap<String, ModelEntry>,
}

/// Read-only model-shortname registry.
#[derive(Debug)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelEntry>,
}

impl ModelRegistry {
    /// Load the registry from a specific file.
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Registry {
            message: format!("failed to read registry: {e}"),
            path: display.clone(),
        })?;
        let file: RegistryFile = serde_json::from_str(&raw).map_err(|e| Error::Registry {
            message: format!("failed to parse registry: {e}"),
            path: display.clone(),
        })?;

        for (shortname, entry) in &file.models {
            if entry.provider.trim().is_empty() || entry.model.trim().is_empty() {
                return Err(Error::Registry {
                    message: format!("entry {shortname:?} is missing provider or model"),
                    path: display,
                });
            }
        }

        Ok(Self {
            models: file.models,
        })
    }

    /// Load the registry from the surrounding tool's home directory:
    /// `$MQ_HOME/config.json`, defaulting to `~/.mq/config.json`.
    pub fn load_default() -> Result<Self> {
        Self::load(&default_registry_path())
    }

    /// Build a registry directly from entries (embedders and tests).
    pub fn from_entries(entries: impl IntoIterator<Item = (String, ModelEntry)>) -> Self {
        Self {
            models: entries.into_iter().collect(),
        }
    }

    /// Resolve a shortname to its entry.
    pub fn resolve(&self, shortname: &str) -> Result<&ModelEntry> {
        self.models
            .get(shortname)
            .ok_or_else(|| Error::UnknownModel(shortname.to_string()))
    }

    /// All registered shortnames, sorted.
    pub fn shortnames(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

fn default_registry_path() -> PathBuf {
    let home = std::env::var_os("MQ_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::home_dir().map(|h| h.join(".mq")))
        .unwrap_or_else(|| PathBuf::from(".mq"));
    home.join("config.json")
}
