use serde_json::Value;

use crate::{OpaqueMessage, ToolCallRequest};

/// A request to be sent to the model provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
    /// Sequences where the model should stop generating.
    ///
    /// Providers that cannot honor this may ignore it, so callers that
    /// depend on it should also truncate the output themselves.
    pub stop: Vec<String>,
}

impl ModelRequest {
    /// Creates a request holding a single user message.
    #[inline]
    pub fn with_user_input<S: Into<String>>(input: S) -> Self {
        Self {
            messages: vec![ModelMessage::User(input.into())],
            ..Default::default()
        }
    }
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant text.
    Assistant(String),
    /// An assistant turn that requested tool calls.
    ///
    /// This is the provider-neutral fallback for an assistant turn whose
    /// opaque message is unavailable, e.g. when it was replayed from a
    /// cache.
    AssistantToolCalls {
        /// Text the assistant produced alongside the calls.
        content: String,
        /// The requested calls.
        tool_calls: Vec<ToolCallRequest>,
    },
    /// A tool call result.
    Tool(ToolCallResult),
    /// An opaque message (usually the history message from the model)
    Opaque(OpaqueMessage),
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolCallResult {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The result of the tool call.
    pub content: String,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool, typically a
    /// [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}
