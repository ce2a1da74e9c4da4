//! The TOML configuration file.
//!
//! ```toml
//! [llm]
//! _type = "openai"
//! model = "gpt-4o-mini"
//!
//! [cache]
//! backend = "file"
//! ttl_secs = 86400
//!
//! [agent]
//! kind = "zero_shot_react"
//! max_iterations = 10
//! ```
//!
//! Every section is optional.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chainlet_cache::{Cache, DEFAULT_MAX_ENTRIES, FileCache, InMemoryCache};
use chainlet_core::{AgentKind, DEFAULT_MAX_ITERATIONS, EarlyStopping};
use serde::{Deserialize, Serialize};

use crate::llms::LlmConfig;

/// The error type for loading configs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("cannot access `{}`: {source}", .path.display())]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The file extension is not one of the supported formats.
    #[error(
        "unsupported file format `{}`, expected .json, .yaml, .yml or .toml",
        .0.display()
    )]
    UnsupportedFormat(PathBuf),
    /// The file content is malformed.
    #[error("invalid config `{}`: {reason}", .path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// The config could not be serialized.
    #[error("cannot serialize config: {0}")]
    Serialize(String),
    /// No API key was configured.
    #[error("no API key, set `api_key` or the OPENAI_API_KEY environment variable")]
    MissingApiKey,
}

/// The top-level config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The LLM to talk to.
    pub llm: Option<LlmConfig>,
    /// The response cache.
    pub cache: CacheConfig,
    /// Agent settings.
    pub agent: AgentConfig,
}

impl Config {
    /// Loads the config from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config = toml::from_str(&data).map_err(|err| ConfigError::Parse {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

/// Where cached responses live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// No caching.
    #[default]
    None,
    /// A process-local cache.
    Memory,
    /// A JSON file on disk.
    File,
}

/// The `[cache]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The backend.
    pub backend: CacheBackend,
    /// The file of the `file` backend. Defaults to the user cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// How long file entries stay valid. Entries never expire if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// The capacity of the `file` backend.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::None,
            path: None,
            ttl_secs: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    /// Creates the configured cache, or `None` if caching is off.
    pub fn build(&self) -> Option<Arc<dyn Cache>> {
        match self.backend {
            CacheBackend::None => None,
            CacheBackend::Memory => Some(Arc::new(InMemoryCache::new())),
            CacheBackend::File => {
                let path = self.path.clone().unwrap_or_else(FileCache::default_path);
                let mut cache = FileCache::open(path).with_max_entries(self.max_entries);
                if let Some(ttl_secs) = self.ttl_secs {
                    cache = cache.with_ttl(Duration::from_secs(ttl_secs));
                }
                Some(Arc::new(cache))
            }
        }
    }
}

/// The `[agent]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// The agent kind.
    pub kind: AgentKind,
    /// The iteration budget of a run. `0` means unbounded.
    pub max_iterations: usize,
    /// What happens when the budget runs out.
    pub early_stopping: EarlyStopping,
    /// Whether malformed ReAct output is fed back to the model.
    pub handle_parsing_errors: bool,
    /// The system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            early_stopping: EarlyStopping::default(),
            handle_parsing_errors: false,
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    /// Returns the iteration budget, `None` when unbounded.
    #[inline]
    pub fn iteration_limit(&self) -> Option<usize> {
        (self.max_iterations > 0).then_some(self.max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use chainlet_cache::CacheKey;
    use chainlet_model::ModelRequest;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(config.agent.iteration_limit(), Some(15));
        assert!(config.cache.build().is_none());
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chainlet.toml");
        fs::write(
            &path,
            r#"
[llm]
_type = "openai"
model_name = "gpt-4o"

[cache]
backend = "memory"

[agent]
kind = "zero_shot_react"
max_iterations = 0
early_stopping = "generate"
handle_parsing_errors = true
"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        let Some(LlmConfig::OpenAI(settings)) = &config.llm else {
            panic!("expected an openai llm");
        };
        assert_eq!(settings.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.agent.kind, AgentKind::ZeroShotReact);
        assert_eq!(config.agent.iteration_limit(), None);
        assert_eq!(config.agent.early_stopping, EarlyStopping::Generate);
        assert!(config.agent.handle_parsing_errors);
    }

    #[test]
    fn test_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chainlet.toml");
        fs::write(&path, "[cache]\nbackend = \"redis\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_build_file_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let config = CacheConfig {
            backend: CacheBackend::File,
            path: Some(path.clone()),
            ttl_secs: Some(60),
            ..Default::default()
        };
        let cache = config.build().unwrap();
        let key = CacheKey::new(&ModelRequest::with_user_input("hi"), "test-model:a");
        cache.update(&key, Default::default()).unwrap();
        assert!(path.exists());
    }
}
