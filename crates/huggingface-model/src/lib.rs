//! An LLM wrapper for the Hugging Face Hub inference API.

#[macro_use]
extern crate tracing;

mod config;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use chainlet_model::{ErrorKind, ModelProvider, ModelProviderError, ModelRequest};
use reqwest::{Client, StatusCode};

pub use config::{HuggingFaceConfig, HuggingFaceConfigBuilder, Task};
use proto::InferenceResponse;
pub use response::HuggingFaceResponse;

/// Error type for [`HuggingFaceProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Hugging Face Hub model provider.
///
/// Chats are flattened into one completion prompt and tool definitions are
/// not sent, so this provider suits the ReAct agent.
#[derive(Clone, Debug)]
pub struct HuggingFaceProvider {
    client: Client,
    config: Arc<HuggingFaceConfig>,
}

impl HuggingFaceProvider {
    /// Creates a new `HuggingFaceProvider` with the given configuration.
    #[inline]
    pub fn new(config: HuggingFaceConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    /// Returns the configuration of this provider.
    #[inline]
    pub fn config(&self) -> &HuggingFaceConfig {
        &self.config
    }
}

impl ModelProvider for HuggingFaceProvider {
    type Error = Error;
    type Response = HuggingFaceResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        if !req.tools.is_empty() {
            debug!("{} tool definitions not sent to the Hub", req.tools.len());
        }
        let hf_req = proto::create_request(req, &self.config);
        let prompt = hf_req.inputs.clone();
        let stop = req.stop.clone();
        let task = self.config.task;
        let resp_fut = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_token)
            .json(&hf_req)
            .send();

        async move {
            let resp = resp_fut.await.map_err(|err| {
                Error::new(format!("request failed: {err}"), ErrorKind::Other)
            })?;

            let status = resp.status();
            if !status.is_success() {
                let kind = classify_status(status);
                let body = resp.text().await.unwrap_or_default();
                debug!("request rejected ({status}): {body}");
                return Err(Error::new(
                    format!("server responded with {status}: {body}"),
                    kind,
                ));
            }

            let body: InferenceResponse = resp.json().await.map_err(|err| {
                Error::new(format!("invalid response body: {err}"), ErrorKind::Other)
            })?;
            let generated = match body {
                InferenceResponse::Error { error } => {
                    return Err(Error::new(error, ErrorKind::Other));
                }
                InferenceResponse::Generations(generations) => generations
                    .into_iter()
                    .next()
                    .map(|generation| generation.generated_text)
                    .ok_or_else(|| Error::new("no generations returned", ErrorKind::Other))?,
            };
            let text = proto::completion_text(&generated, &prompt, task, &stop);
            Ok(HuggingFaceResponse::from_text(text))
        }
    }

    fn fingerprint(&self) -> String {
        self.config.fingerprint()
    }
}

fn classify_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        _ => ErrorKind::Other,
    }
}
