//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use chainlet_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    id: String,
    events: VecDeque<ModelResponseEvent>,
    transcript: String,
    opaque: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.events.is_empty() {
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        Poll::Ready(Ok(this.events.pop_front()))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        if !self.opaque {
            return None;
        }
        Some(OpaqueMessage::new(self.id.clone(), self.transcript.clone()))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    // Failures already served for the response at the front.
    failed: u64,
    requests: Vec<ModelRequest>,
    served: usize,
}

/// A local fake model for testing purpose.
///
/// Responses are scripted up front and served in order, one per request,
/// regardless of the request content. Every request is recorded and can be
/// inspected with [`TestModelProvider::requests`]. When the script runs out,
/// requests fail.
///
/// Clones share the same script.
#[derive(Clone)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Duration,
    opaque: bool,
    label: String,
}

impl Default for TestModelProvider {
    fn default() -> Self {
        Self {
            script: Default::default(),
            delay: Duration::from_millis(1),
            opaque: true,
            label: "default".to_owned(),
        }
    }
}

impl TestModelProvider {
    /// Appends a response to the script.
    #[inline]
    pub fn push_response(&self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    /// Sets the delay before each streamed event.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = duration;
    }

    /// Controls whether responses produce opaque messages (on by default).
    #[inline]
    pub fn set_opaque_messages(&mut self, opaque: bool) {
        self.opaque = opaque;
    }

    /// Sets the label that distinguishes this provider's fingerprint.
    #[inline]
    pub fn set_label<S: Into<String>>(&mut self, label: S) {
        self.label = label.into();
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of scripted responses not yet served.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut script = self.lock();
        script.requests.push(req.clone());

        let result = 'blk: {
            let Some(front) = script.responses.front() else {
                break 'blk Err(Error {
                    message: "script exhausted",
                    kind: ErrorKind::Other,
                });
            };
            let failures = front.failures;
            match failures {
                Some(0) => {
                    break 'blk Err(Error {
                        message: "scripted permanent failure",
                        kind: ErrorKind::RateLimitExceeded,
                    });
                }
                Some(n) if script.failed < n => {
                    script.failed += 1;
                    break 'blk Err(Error {
                        message: "scripted failure",
                        kind: ErrorKind::RateLimitExceeded,
                    });
                }
                _ => {}
            }

            let Some(preset) = script.responses.pop_front() else {
                unreachable!("front was checked above");
            };
            script.failed = 0;
            script.served += 1;
            Ok(self.make_response(format!("test:{}", script.served), preset))
        };
        ready(result)
    }

    fn fingerprint(&self) -> String {
        format!("test-model:{}", self.label)
    }
}

impl TestModelProvider {
    fn make_response(&self, id: String, preset: PresetResponse) -> TestModelResponse {
        let finish_reason = if preset.has_tool_calls() {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        let mut transcript = String::new();
        let mut events: VecDeque<_> = preset
            .events
            .into_iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(delta) => {
                    transcript.push_str(&delta);
                    ModelResponseEvent::MessageDelta(delta)
                }
                PresetEvent::ToolCall(req) => ModelResponseEvent::ToolCall(req),
            })
            .collect();
        events.push_back(ModelResponseEvent::Completed(finish_reason));

        TestModelResponse {
            id,
            events,
            transcript,
            opaque: self.opaque,
            delay: self.delay,
            sleep: None,
        }
    }
}
