use chainlet_core::tool::Approval as ToolApproval;
use chainlet_core::{
    Agent, AgentBuilder, AgentError, AgentOutput, AgentStep, ModelClient, TranscriptSource,
};
use chainlet_model::ModelProvider;

use crate::config::{AgentConfig, Config, ConfigError};
use crate::llms::{LlmConfig, OpenAISettings};
use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(provider: M) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self { agent_builder }
    }

    /// Creates a session builder around a prepared model client.
    pub fn with_model_client(model_client: ModelClient) -> Self {
        let agent_builder = AgentBuilder::with_model_client(model_client);
        Self { agent_builder }
    }

    /// Creates a session builder from a loaded config: its LLM (OpenAI with
    /// environment defaults when absent), its cache and its agent settings.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let llm = config
            .llm
            .clone()
            .unwrap_or_else(|| LlmConfig::OpenAI(OpenAISettings::default()));
        let model_client = llm.build_client(config.cache.build())?;
        Ok(Self::with_model_client(model_client).with_agent_config(&config.agent))
    }

    /// Applies the `[agent]` settings of a config.
    pub fn with_agent_config(mut self, config: &AgentConfig) -> Self {
        self.agent_builder = self
            .agent_builder
            .with_kind(config.kind)
            .with_max_iterations(config.iteration_limit())
            .with_early_stopping(config.early_stopping)
            .with_handle_parsing_errors(config.handle_parsing_errors);
        if let Some(system_prompt) = &config.system_prompt {
            self.agent_builder = self.agent_builder.with_system_prompt(system_prompt);
        }
        self
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Attaches a callback to be invoked when a transcript is generated.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_transcript(on_transcript);
        self
    }

    /// Attaches a callback to be invoked after each tool step.
    #[inline]
    pub fn on_step(mut self, on_step: impl Fn(&AgentStep) + Send + Sync + 'static) -> Self {
        self.agent_builder = self.agent_builder.on_step(on_step);
        self
    }

    /// Attaches a callback to be invoked for streamed model output.
    #[inline]
    pub fn on_message_delta(
        mut self,
        on_message_delta: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_message_delta(on_message_delta);
        self
    }

    /// Attaches a callback to be invoked when a tool call request is received.
    #[inline]
    pub fn on_tool_call_request(
        mut self,
        on_tool_call_request: impl Fn(ToolApproval) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self
            .agent_builder
            .on_tool_call_request(on_tool_call_request);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        let agent = self
            .agent_builder
            .with_tool(CalculatorTool::new())
            .with_tool(ShellTool::new())
            .build();

        Session { agent }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
#[derive(Clone)]
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a message to the session and waits for the agent's answer.
    #[inline]
    pub async fn send_message(&self, message: &str) -> Result<AgentOutput, AgentError> {
        self.agent.run(message).await
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}
