use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};

const DEFAULT_REPO_ID: &str = "gpt2";
const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// The pipeline a Hub model is served with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    /// Causal generation. The API echoes the prompt unless told otherwise.
    #[default]
    #[serde(rename = "text-generation")]
    TextGeneration,
    /// Sequence-to-sequence generation, e.g. T5 or BART.
    #[serde(rename = "text2text-generation")]
    Text2TextGeneration,
}

impl Task {
    /// Returns the task name the Hub uses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::TextGeneration => "text-generation",
            Task::Text2TextGeneration => "text2text-generation",
        }
    }
}

/// Builder for [`HuggingFaceConfig`].
#[derive(Clone, PartialEq)]
pub struct HuggingFaceConfigBuilder {
    api_token: String,
    repo_id: Option<String>,
    task: Task,
    base_url: Option<String>,
    temperature: Option<f32>,
    max_new_tokens: Option<u32>,
}

impl HuggingFaceConfigBuilder {
    /// Creates a builder with the given API token.
    #[inline]
    pub fn with_api_token<S: Into<String>>(api_token: S) -> Self {
        Self {
            api_token: api_token.into(),
            repo_id: None,
            task: Task::default(),
            base_url: None,
            temperature: None,
            max_new_tokens: None,
        }
    }

    /// Sets the model repository, e.g. `google/flan-t5-xl`.
    #[inline]
    pub fn with_repo_id<S: Into<String>>(mut self, repo_id: S) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    /// Sets the pipeline task.
    #[inline]
    pub fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    /// Sets a custom base URL, e.g. for a dedicated inference endpoint.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Caps the number of generated tokens.
    #[inline]
    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = Some(max_new_tokens);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> HuggingFaceConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        HuggingFaceConfig {
            api_token: self.api_token,
            repo_id: self.repo_id.unwrap_or_else(|| DEFAULT_REPO_ID.to_owned()),
            task: self.task,
            base_url: base_url.trim_end_matches('/').to_owned(),
            temperature: self.temperature,
            max_new_tokens: self.max_new_tokens,
        }
    }
}

impl Debug for HuggingFaceConfigBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuggingFaceConfigBuilder")
            .field("api_token", &"<redacted>")
            .field("repo_id", &self.repo_id)
            .field("task", &self.task)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_new_tokens", &self.max_new_tokens)
            .finish()
    }
}

/// Configuration for the Hugging Face Hub inference provider.
#[derive(Clone, PartialEq)]
pub struct HuggingFaceConfig {
    pub(crate) api_token: String,
    pub(crate) repo_id: String,
    pub(crate) task: Task,
    pub(crate) base_url: String,
    pub(crate) temperature: Option<f32>,
    pub(crate) max_new_tokens: Option<u32>,
}

impl HuggingFaceConfig {
    /// Returns the model repository.
    #[inline]
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Returns the pipeline task.
    #[inline]
    pub fn task(&self) -> Task {
        self.task
    }

    /// Returns the base URL, without a trailing slash.
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, self.repo_id)
    }

    pub(crate) fn fingerprint(&self) -> String {
        let mut fingerprint = format!(
            "huggingface_hub:{}@{};task={}",
            self.repo_id,
            self.base_url,
            self.task.as_str()
        );
        if let Some(temperature) = self.temperature {
            fingerprint.push_str(&format!(";temperature={temperature}"));
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            fingerprint.push_str(&format!(";max_new_tokens={max_new_tokens}"));
        }
        fingerprint
    }
}

impl Debug for HuggingFaceConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuggingFaceConfig")
            .field("api_token", &"<redacted>")
            .field("repo_id", &self.repo_id)
            .field("task", &self.task)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_new_tokens", &self.max_new_tokens)
            .finish()
    }
}
