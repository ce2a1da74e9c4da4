mod builder;
mod react;
mod state;
#[cfg(test)]
mod tests;

use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};

use chainlet_model::{ModelMessage, ModelRequest, ToolCallRequest, ToolCallResult};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::conversation::{Conversation, Item as ConversationItem};
use crate::model_client::{ModelClient, ModelClientError, ModelClientResponse};
use crate::tool::{self, ToolResult};
pub use builder::AgentBuilder;
use react::Parsed;
pub use state::AgentStage;
use state::{StageGuard, lock};

/// The answer returned when the iteration budget runs out
/// under [`EarlyStopping::Force`].
pub const STOPPED_OUTPUT: &str = "Agent stopped due to max iterations.";

/// The default iteration budget of a run.
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// Who produced a piece of transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// The user input.
    User,
    /// The model.
    Assistant,
    /// A tool result.
    Tool,
}

impl Display for TranscriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptSource::User => write!(f, "user"),
            TranscriptSource::Assistant => write!(f, "assistant"),
            TranscriptSource::Tool => write!(f, "tool"),
        }
    }
}

/// How the agent talks to the model about tools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Native tool calls, with the conversation kept across runs.
    #[default]
    ToolCalling,
    /// The zero-shot ReAct text protocol (`Thought` / `Action` /
    /// `Action Input` / `Observation`). Each run starts a fresh scratchpad.
    ZeroShotReact,
}

/// What to do when a run exhausts its iteration budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStopping {
    /// Return [`STOPPED_OUTPUT`].
    #[default]
    Force,
    /// Ask the model once more, without tools, for a final answer.
    Generate,
}

/// A tool invocation chosen by the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentAction {
    /// The tool name.
    pub tool: String,
    /// The arguments passed to the tool.
    pub tool_input: Value,
    /// The model output that led to this action.
    pub log: String,
}

/// An action together with what came back from it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentStep {
    /// The action taken.
    pub action: AgentAction,
    /// The tool output, or the error it reported.
    pub observation: String,
}

/// The result of [`Agent::run`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentOutput {
    /// The final answer.
    pub output: String,
    /// Every step taken, in order.
    pub intermediate_steps: Vec<AgentStep>,
}

/// The error type for [`Agent::run`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model request failed, after retries.
    #[error("model request failed: {0}")]
    Model(ModelClientError),
    /// The model output could not be parsed into an action or an answer.
    #[error("could not parse LLM output: `{0}`")]
    OutputParse(String),
    /// Another run is in progress on this agent.
    #[error("agent is busy")]
    Busy,
}

pub(crate) struct Settings {
    pub kind: AgentKind,
    pub system_prompt: Option<String>,
    pub max_iterations: Option<usize>,
    pub early_stopping: EarlyStopping,
    pub handle_parsing_errors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kind: Default::default(),
            system_prompt: None,
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            early_stopping: Default::default(),
            handle_parsing_errors: false,
        }
    }
}

type TranscriptFn = Box<dyn Fn(&str, TranscriptSource) + Send + Sync>;
type StepFn = Box<dyn Fn(&AgentStep) + Send + Sync>;
type DeltaFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_transcript: Option<TranscriptFn>,
    pub on_step: Option<StepFn>,
    pub on_message_delta: Option<DeltaFn>,
}

struct Inner {
    model_client: ModelClient,
    tools: tool::Manager,
    settings: Settings,
    callbacks: Callbacks,
    stage: Mutex<AgentStage>,
    conversation: Mutex<Conversation>,
}

/// An agent instance, which maintains a conversation, a model client, the
/// registered tools, and the current stage.
///
/// Clones share the same agent, so one clone can observe
/// [`Agent::stage`] while another is running. Only one run may be in
/// progress at a time.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    /// Answers `input`, calling tools as the model asks for them.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future stops the run and returns the agent to
    /// idle. Conversation items recorded so far are kept; a tool round is
    /// recorded together with its results, so a round cut short by
    /// cancellation leaves no trace in the conversation.
    pub async fn run<S: Into<String>>(&self, input: S) -> Result<AgentOutput, AgentError> {
        let input = input.into();
        let guard = StageGuard::enter(&self.inner.stage)?;
        let kind = self.inner.settings.kind;
        let span = debug_span!("agent run", ?kind);
        let result = match kind {
            AgentKind::ToolCalling => {
                self.run_tool_calling(input, &guard).instrument(span).await
            }
            AgentKind::ZeroShotReact => {
                self.run_react(input, &guard).instrument(span).await
            }
        };
        if let Err(err) = &result {
            warn!("agent run failed: {err}");
        }
        result
    }

    /// Returns what the agent is doing right now.
    #[inline]
    pub fn stage(&self) -> AgentStage {
        *lock(&self.inner.stage)
    }

    /// Returns the kind of this agent.
    #[inline]
    pub fn kind(&self) -> AgentKind {
        self.inner.settings.kind
    }

    /// Returns a snapshot of the conversation.
    pub fn conversation(&self) -> Conversation {
        lock(&self.inner.conversation).clone()
    }

    /// Forgets the conversation.
    pub fn clear_conversation(&self) -> Result<(), AgentError> {
        let _guard = StageGuard::enter(&self.inner.stage)?;
        lock(&self.inner.conversation).items.clear();
        Ok(())
    }
}

impl Agent {
    pub(crate) fn from_parts(
        model_client: ModelClient,
        tools: tool::Manager,
        settings: Settings,
        callbacks: Callbacks,
    ) -> Self {
        let inner = Inner {
            model_client,
            tools,
            settings,
            callbacks,
            stage: Default::default(),
            conversation: Default::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    async fn run_tool_calling(
        &self,
        input: String,
        guard: &StageGuard<'_>,
    ) -> Result<AgentOutput, AgentError> {
        self.record(ModelMessage::User(input.clone()), input, TranscriptSource::User);

        let mut steps = vec![];
        let mut iterations = 0;
        loop {
            if !self.within_budget(iterations) {
                return self.stop_tool_calling(steps, guard).await;
            }

            guard.set(AgentStage::ModelThinking);
            let req = ModelRequest {
                messages: self.history(),
                tools: self.inner.tools.definitions(),
                stop: vec![],
            };
            let ModelClientResponse {
                transcript,
                opaque_msg,
                tool_calls,
                ..
            } = self.call_model(req).await?;
            iterations += 1;

            let neutral = if tool_calls.is_empty() {
                ModelMessage::Assistant(transcript.clone())
            } else {
                ModelMessage::AssistantToolCalls {
                    content: transcript.clone(),
                    tool_calls: tool_calls.clone(),
                }
            };
            // Replayed responses carry no opaque message and are recorded as
            // the neutral form itself.
            let msg = match opaque_msg {
                Some(opaque_msg) => ModelMessage::Opaque(opaque_msg.with_neutral(neutral)),
                None => neutral,
            };

            if tool_calls.is_empty() {
                self.record(msg, transcript.clone(), TranscriptSource::Assistant);
                return Ok(AgentOutput {
                    output: transcript,
                    intermediate_steps: steps,
                });
            }

            // A tool round enters the conversation only once every result is
            // in, so a cancelled round leaves no dangling tool calls behind.
            self.notify(&transcript, TranscriptSource::Assistant);
            let mut round = vec![ConversationItem {
                msg,
                transcript: transcript.clone(),
                source: TranscriptSource::Assistant,
            }];

            guard.set(AgentStage::RunningTools);
            let results = self.run_tools(tool_calls.clone()).await;
            let mut round_steps = Vec::with_capacity(results.len());
            for (call, result) in tool_calls.into_iter().zip(results) {
                let observation = observation_of(result);
                self.notify(&observation, TranscriptSource::Tool);
                round.push(ConversationItem {
                    msg: ModelMessage::Tool(ToolCallResult {
                        id: call.id,
                        content: observation.clone(),
                    }),
                    transcript: observation.clone(),
                    source: TranscriptSource::Tool,
                });
                round_steps.push(AgentStep {
                    action: AgentAction {
                        tool: call.name,
                        tool_input: call.arguments,
                        log: transcript.clone(),
                    },
                    observation,
                });
            }
            lock(&self.inner.conversation).items.extend(round);
            for step in round_steps {
                self.push_step(&mut steps, step);
            }
        }
    }

    async fn stop_tool_calling(
        &self,
        steps: Vec<AgentStep>,
        guard: &StageGuard<'_>,
    ) -> Result<AgentOutput, AgentError> {
        debug!("iteration budget exhausted after {} steps", steps.len());
        let output = match self.inner.settings.early_stopping {
            EarlyStopping::Force => STOPPED_OUTPUT.to_owned(),
            EarlyStopping::Generate => {
                guard.set(AgentStage::ModelThinking);
                let mut messages = self.history();
                messages.push(ModelMessage::User(
                    react::GENERATE_FINAL_ANSWER.trim_start().to_owned(),
                ));
                let req = ModelRequest {
                    messages,
                    ..Default::default()
                };
                let resp = self.call_model(req).await?;
                let output = react::final_answer_or_raw(&resp.transcript);
                self.record(
                    ModelMessage::Assistant(resp.transcript.clone()),
                    resp.transcript,
                    TranscriptSource::Assistant,
                );
                output
            }
        };
        Ok(AgentOutput {
            output,
            intermediate_steps: steps,
        })
    }

    async fn run_react(
        &self,
        input: String,
        guard: &StageGuard<'_>,
    ) -> Result<AgentOutput, AgentError> {
        self.record(
            ModelMessage::User(input.clone()),
            input.clone(),
            TranscriptSource::User,
        );

        let tool_descriptions = self.inner.tools.descriptions();
        let template = react::build_template(&tool_descriptions);
        let mut scratchpad = String::new();
        let mut steps = vec![];
        let mut iterations = 0;
        loop {
            if !self.within_budget(iterations) {
                return self.stop_react(&template, &input, scratchpad, steps, guard).await;
            }

            guard.set(AgentStage::ModelThinking);
            let prompt = react::format_prompt(&template, &input, &scratchpad);
            let resp = self.call_model(self.react_request(prompt)).await?;
            iterations += 1;
            let text = react::truncate_at_stop(&resp.transcript);

            let (action, observation) = match react::parse(text) {
                Ok(Parsed::Finish { output }) => {
                    self.record(
                        ModelMessage::Assistant(output.clone()),
                        text.to_owned(),
                        TranscriptSource::Assistant,
                    );
                    return Ok(AgentOutput {
                        output,
                        intermediate_steps: steps,
                    });
                }
                Ok(Parsed::Action(action)) => {
                    guard.set(AgentStage::RunningTools);
                    let req = ToolCallRequest {
                        id: format!("react-{iterations}"),
                        name: action.tool.clone(),
                        arguments: action.tool_input.clone(),
                    };
                    let observation = observation_of(self.inner.tools.dispatch(req).await);
                    (action, observation)
                }
                Err(err) if self.inner.settings.handle_parsing_errors => {
                    debug!("unparsable model output ({err:?}), continuing");
                    let action = AgentAction {
                        tool: react::EXCEPTION_TOOL.to_owned(),
                        tool_input: Value::String(text.to_owned()),
                        log: text.to_owned(),
                    };
                    (action, react::INVALID_RESPONSE_OBSERVATION.to_owned())
                }
                Err(_) => return Err(AgentError::OutputParse(text.to_owned())),
            };

            scratchpad.push_str(&react::scratchpad_entry(&action.log, &observation));
            if let Some(on_transcript) = &self.inner.callbacks.on_transcript {
                on_transcript(&action.log, TranscriptSource::Assistant);
                on_transcript(&observation, TranscriptSource::Tool);
            }
            self.push_step(&mut steps, AgentStep { action, observation });
        }
    }

    async fn stop_react(
        &self,
        template: &str,
        input: &str,
        mut scratchpad: String,
        steps: Vec<AgentStep>,
        guard: &StageGuard<'_>,
    ) -> Result<AgentOutput, AgentError> {
        debug!("iteration budget exhausted after {} steps", steps.len());
        let output = match self.inner.settings.early_stopping {
            EarlyStopping::Force => STOPPED_OUTPUT.to_owned(),
            EarlyStopping::Generate => {
                guard.set(AgentStage::ModelThinking);
                scratchpad.push_str(react::GENERATE_FINAL_ANSWER);
                let prompt = react::format_prompt(template, input, &scratchpad);
                let resp = self.call_model(self.react_request(prompt)).await?;
                react::final_answer_or_raw(&resp.transcript)
            }
        };
        self.record(
            ModelMessage::Assistant(output.clone()),
            output.clone(),
            TranscriptSource::Assistant,
        );
        Ok(AgentOutput {
            output,
            intermediate_steps: steps,
        })
    }

    fn react_request(&self, prompt: String) -> ModelRequest {
        let mut messages = vec![];
        if let Some(system_prompt) = &self.inner.settings.system_prompt {
            messages.push(ModelMessage::System(system_prompt.clone()));
        }
        messages.push(ModelMessage::User(prompt));
        ModelRequest {
            messages,
            tools: vec![],
            stop: vec![react::OBSERVATION_STOP.to_owned()],
        }
    }

    fn within_budget(&self, iterations: usize) -> bool {
        self.inner
            .settings
            .max_iterations
            .is_none_or(|max| iterations < max)
    }

    /// The system prompt (if any) followed by the conversation.
    fn history(&self) -> Vec<ModelMessage> {
        let conversation = lock(&self.inner.conversation);
        self.inner
            .settings
            .system_prompt
            .iter()
            .map(|prompt| ModelMessage::System(prompt.clone()))
            .chain(conversation.messages().cloned())
            .collect()
    }

    async fn call_model(&self, req: ModelRequest) -> Result<ModelClientResponse, AgentError> {
        let on_delta = self.inner.callbacks.on_message_delta.clone();
        self.inner
            .model_client
            .send_request(req, move |delta| {
                if let Some(on_delta) = &on_delta {
                    on_delta(delta);
                }
            })
            .await
            .map_err(AgentError::Model)
    }

    /// Runs the calls concurrently; results come back in request order.
    async fn run_tools(&self, tool_calls: Vec<ToolCallRequest>) -> Vec<ToolResult> {
        debug!("running {} tool call(s)", tool_calls.len());
        let futures: Vec<_> = tool_calls
            .into_iter()
            .map(|call| self.inner.tools.dispatch(call))
            .collect();
        join_all(futures).await
    }

    fn record(&self, msg: ModelMessage, transcript: String, source: TranscriptSource) {
        self.notify(&transcript, source);
        lock(&self.inner.conversation).items.push(ConversationItem {
            msg,
            transcript,
            source,
        });
    }

    fn notify(&self, transcript: &str, source: TranscriptSource) {
        if let Some(on_transcript) = &self.inner.callbacks.on_transcript {
            on_transcript(transcript, source);
        }
    }

    fn push_step(&self, steps: &mut Vec<AgentStep>, step: AgentStep) {
        trace!("step: {} -> {}", step.action.tool, step.observation);
        if let Some(on_step) = &self.inner.callbacks.on_step {
            on_step(&step);
        }
        steps.push(step);
    }
}

fn observation_of(result: ToolResult) -> String {
    match result {
        Ok(output) => output,
        Err(err) => format!("Error: {}", err.reason()),
    }
}
