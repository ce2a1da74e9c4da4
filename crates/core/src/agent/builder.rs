use chainlet_model::ModelProvider;

use super::{Agent, AgentKind, AgentStep, Callbacks, EarlyStopping, Settings, TranscriptSource};
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{self, Approval, Tool};

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    retry_policy: Option<RetryPolicy>,
    tools: tool::Manager,
    settings: Settings,
    callbacks: Callbacks,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(provider: P) -> Self {
        Self::with_model_client(ModelClient::new(provider))
    }

    /// Creates a new builder around an existing model client.
    #[inline]
    pub fn with_model_client(model_client: ModelClient) -> Self {
        Self {
            model_client,
            retry_policy: None,
            tools: Default::default(),
            settings: Default::default(),
            callbacks: Default::default(),
        }
    }

    /// Sets the system prompt, sent ahead of every request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.settings.system_prompt = Some(system_prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.add_tool(tool);
        self
    }

    /// Chooses how the agent talks to the model about tools.
    #[inline]
    pub fn with_kind(mut self, kind: AgentKind) -> Self {
        self.settings.kind = kind;
        self
    }

    /// Bounds the model calls per run. `None` means unbounded.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: Option<usize>) -> Self {
        self.settings.max_iterations = max_iterations;
        self
    }

    /// Chooses what happens when the iteration budget runs out.
    #[inline]
    pub fn with_early_stopping(mut self, early_stopping: EarlyStopping) -> Self {
        self.settings.early_stopping = early_stopping;
        self
    }

    /// Feeds unparsable ReAct output back to the model instead of failing.
    #[inline]
    pub fn with_handle_parsing_errors(mut self, handle_parsing_errors: bool) -> Self {
        self.settings.handle_parsing_errors = handle_parsing_errors;
        self
    }

    /// Overrides the retry policy of the model client.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Attaches a callback invoked for every new piece of transcript.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_transcript = Some(Box::new(on_transcript));
        self
    }

    /// Attaches a callback invoked after every tool step.
    #[inline]
    pub fn on_step(mut self, on_step: impl Fn(&AgentStep) + Send + Sync + 'static) -> Self {
        self.callbacks.on_step = Some(Box::new(on_step));
        self
    }

    /// Attaches a callback invoked for every streamed message delta.
    #[inline]
    pub fn on_message_delta(
        mut self,
        on_message_delta: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_message_delta = Some(std::sync::Arc::new(on_message_delta));
        self
    }

    /// Attaches the handler asked to approve tool calls. Without one, every
    /// call is approved.
    #[inline]
    pub fn on_tool_call_request(
        mut self,
        on_request: impl Fn(Approval) + Send + Sync + 'static,
    ) -> Self {
        self.tools.on_request(on_request);
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Agent {
        let Self {
            mut model_client,
            retry_policy,
            tools,
            settings,
            callbacks,
        } = self;
        if let Some(retry_policy) = retry_policy {
            model_client = model_client.with_retry_policy(retry_policy);
        }
        debug!(
            "building a {:?} agent with tools {:?}",
            settings.kind,
            tools.names()
        );
        Agent::from_parts(model_client, tools, settings, callbacks)
    }
}
