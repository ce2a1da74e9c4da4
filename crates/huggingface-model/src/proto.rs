use chainlet_model::{ModelMessage, ModelRequest};
use serde::{Deserialize, Serialize};

use crate::config::{HuggingFaceConfig, Task};

#[derive(Debug, Serialize)]
pub(crate) struct InferenceRequest<'a> {
    pub inputs: String,
    pub parameters: Parameters<'a>,
    pub options: Options,
}

#[derive(Debug, Serialize)]
pub(crate) struct Parameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "no_stop")]
    pub stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_full_text: Option<bool>,
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Serialize)]
pub(crate) struct Options {
    pub wait_for_model: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum InferenceResponse {
    Generations(Vec<Generation>),
    Error { error: String },
}

#[derive(Debug, Deserialize)]
pub(crate) struct Generation {
    pub generated_text: String,
}

pub(crate) fn create_request<'a>(
    req: &'a ModelRequest,
    config: &HuggingFaceConfig,
) -> InferenceRequest<'a> {
    InferenceRequest {
        inputs: render_prompt(&req.messages),
        parameters: Parameters {
            temperature: config.temperature,
            max_new_tokens: config.max_new_tokens,
            stop: &req.stop,
            return_full_text: (config.task == Task::TextGeneration).then_some(false),
        },
        options: Options {
            wait_for_model: true,
        },
    }
}

/// Flattens a chat into a single completion prompt.
pub(crate) fn render_prompt(messages: &[ModelMessage]) -> String {
    let mut parts = Vec::with_capacity(messages.len());
    for msg in messages {
        let content = match msg {
            ModelMessage::System(content)
            | ModelMessage::User(content)
            | ModelMessage::Assistant(content)
            | ModelMessage::AssistantToolCalls { content, .. } => content.as_str(),
            ModelMessage::Tool(result) => result.content.as_str(),
            ModelMessage::Opaque(opaque) => match opaque.neutral() {
                Some(neutral) => {
                    parts.push(render_prompt(std::slice::from_ref(neutral)));
                    continue;
                }
                None => {
                    debug!("skipping foreign opaque message {}", opaque.id());
                    continue;
                }
            },
        };
        if !content.is_empty() {
            parts.push(content.to_owned());
        }
    }
    parts.join("\n\n")
}

/// Extracts the completion from a generation: drops an echoed prompt, then
/// cuts at the earliest stop sequence.
pub(crate) fn completion_text(
    generated: &str,
    prompt: &str,
    task: Task,
    stop: &[String],
) -> String {
    let text = match task {
        Task::TextGeneration => generated.strip_prefix(prompt).unwrap_or(generated),
        Task::Text2TextGeneration => generated,
    };
    let end = stop
        .iter()
        .filter(|stop| !stop.is_empty())
        .filter_map(|stop| text.find(stop.as_str()))
        .min()
        .unwrap_or(text.len());
    text[..end].to_owned()
}
