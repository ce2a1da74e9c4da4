//! A registry of serializable LLM configurations.
//!
//! An LLM is described by a small document whose `_type` field names the
//! provider, e.g. in YAML:
//!
//! ```yaml
//! _type: openai
//! model_name: gpt-4o-mini
//! temperature: 0.7
//! ```
//!
//! The Hugging Face Hub inference API is available as `huggingface_hub`:
//!
//! ```yaml
//! _type: huggingface_hub
//! repo_id: google/flan-t5-xl
//! task: text2text-generation
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chainlet_cache::{Cache, CachedProvider};
use chainlet_core::ModelClient;
use chainlet_huggingface_model::{
    HuggingFaceConfig, HuggingFaceConfigBuilder, HuggingFaceProvider, Task,
};
use chainlet_model::ModelProvider;
use chainlet_openai_model::{OpenAIConfig, OpenAIConfigBuilder, OpenAIProvider};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// The `_type` names that [`LlmConfig`] understands.
pub const LLM_TYPES: &[&str] = &["openai", "huggingface_hub"];

const API_KEY_ENV: &str = "OPENAI_API_KEY";
const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
const MODEL_ENV: &str = "OPENAI_MODEL";
const HF_TOKEN_ENV: &str = "HUGGINGFACEHUB_API_TOKEN";

/// A serializable LLM configuration, tagged by `_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum LlmConfig {
    /// An OpenAI-compatible chat completions endpoint.
    #[serde(rename = "openai")]
    OpenAI(OpenAISettings),
    /// A model served by the Hugging Face Hub inference API.
    #[serde(rename = "huggingface_hub")]
    HuggingFaceHub(HuggingFaceSettings),
}

/// Settings for [`LlmConfig::OpenAI`].
///
/// Unset `api_key`, `base_url` and `model` fall back to the `OPENAI_API_KEY`,
/// `OPENAI_BASE_URL` and `OPENAI_MODEL` environment variables, then to the
/// provider defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAISettings {
    /// The model name.
    #[serde(alias = "model_name", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// The sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// The cap on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// The API key. Never written back by [`LlmConfig::save`].
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl OpenAISettings {
    /// Resolves the settings into a provider config.
    pub fn to_config(&self) -> Result<OpenAIConfig, ConfigError> {
        let api_key = match &self.api_key {
            Some(api_key) => api_key.clone(),
            None => env::var(API_KEY_ENV).map_err(|_| ConfigError::MissingApiKey)?,
        };
        let mut builder = OpenAIConfigBuilder::with_api_key(api_key);
        if let Some(model) = self.model.clone().or_else(|| env::var(MODEL_ENV).ok()) {
            builder = builder.with_model(model);
        }
        if let Some(base_url) = self.base_url.clone().or_else(|| env::var(BASE_URL_ENV).ok()) {
            builder = builder.with_base_url(base_url);
        }
        if let Some(temperature) = self.temperature {
            builder = builder.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            builder = builder.with_max_tokens(max_tokens);
        }
        Ok(builder.build())
    }
}

/// Settings for [`LlmConfig::HuggingFaceHub`].
///
/// An unset `api_token` falls back to the `HUGGINGFACEHUB_API_TOKEN`
/// environment variable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceSettings {
    /// The model repository, `gpt2` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    /// The pipeline task.
    pub task: Task,
    /// The inference API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// The sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// The cap on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    /// The API token. Never written back by [`LlmConfig::save`].
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl HuggingFaceSettings {
    /// Resolves the settings into a provider config.
    pub fn to_config(&self) -> Result<HuggingFaceConfig, ConfigError> {
        let api_token = match &self.api_token {
            Some(api_token) => api_token.clone(),
            None => env::var(HF_TOKEN_ENV).map_err(|_| ConfigError::MissingApiKey)?,
        };
        let mut builder =
            HuggingFaceConfigBuilder::with_api_token(api_token).with_task(self.task);
        if let Some(repo_id) = &self.repo_id {
            builder = builder.with_repo_id(repo_id);
        }
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(temperature) = self.temperature {
            builder = builder.with_temperature(temperature);
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            builder = builder.with_max_new_tokens(max_new_tokens);
        }
        Ok(builder.build())
    }
}

impl LlmConfig {
    /// Returns the `_type` name of this config.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            LlmConfig::OpenAI(_) => "openai",
            LlmConfig::HuggingFaceHub(_) => "huggingface_hub",
        }
    }

    /// Creates a model client for this LLM, answering from `cache` when one
    /// is given.
    pub fn build_client(
        &self,
        cache: Option<Arc<dyn Cache>>,
    ) -> Result<ModelClient, ConfigError> {
        debug!("building a model client for {}", self.type_name());
        Ok(match self {
            LlmConfig::OpenAI(settings) => {
                client_for(OpenAIProvider::new(settings.to_config()?), cache)
            }
            LlmConfig::HuggingFaceHub(settings) => {
                client_for(HuggingFaceProvider::new(settings.to_config()?), cache)
            }
        })
    }

    /// Writes this config to `path`, in the format its extension names.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self).map_err(serialize_err)?,
            Format::Yaml => serde_yaml::to_string(self).map_err(serialize_err)?,
            Format::Toml => toml::to_string(self).map_err(serialize_err)?,
        };
        fs::write(path, data).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })
    }
}

/// Loads an LLM config from a `.json`, `.yaml`/`.yml` or `.toml` file.
pub fn load_llm<P: AsRef<Path>>(path: P) -> Result<LlmConfig, ConfigError> {
    let path = path.as_ref();
    let format = Format::of(path)?;
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.to_owned(),
        reason,
    };
    match format {
        Format::Json => serde_json::from_str(&data).map_err(|err| parse_err(err.to_string())),
        Format::Yaml => serde_yaml::from_str(&data).map_err(|err| parse_err(err.to_string())),
        Format::Toml => toml::from_str(&data).map_err(|err| parse_err(err.to_string())),
    }
}

fn client_for<P: ModelProvider + 'static>(
    provider: P,
    cache: Option<Arc<dyn Cache>>,
) -> ModelClient {
    match cache {
        Some(cache) => ModelClient::new(CachedProvider::new(provider, cache)),
        None => ModelClient::new(provider),
    }
}

enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("yaml" | "yml") => Ok(Format::Yaml),
            Some("toml") => Ok(Format::Toml),
            _ => Err(ConfigError::UnsupportedFormat(PathBuf::from(path))),
        }
    }
}

fn serialize_err(err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Serialize(err.to_string())
}
