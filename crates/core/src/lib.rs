//! Core logic including agent loop, tool execution, conversations, and the
//! type-erased model client.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
pub mod model_client;
pub mod tool;

pub use agent::{
    Agent, AgentAction, AgentBuilder, AgentError, AgentKind, AgentOutput,
    AgentStage, AgentStep, DEFAULT_MAX_ITERATIONS, EarlyStopping, STOPPED_OUTPUT,
    TranscriptSource,
};
pub use model_client::{ModelClient, RetryPolicy};
pub use tool::Tool;
