//! A type-erased, retrying front end for model providers.

use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use chainlet_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, OpaqueMessage, ToolCallRequest,
};
use tracing::Instrument;

/// The error type returned by [`ModelClient`].
pub type ModelClientError = Box<dyn ModelProviderError>;

type SendRequestResult = Result<ModelClientResponse, ModelClientError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type DeltaFn = Arc<dyn Fn(&str) + Send + Sync>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, DeltaFn, RetryPolicy)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// How a [`ModelClient`] retries requests that hit a transient error.
///
/// Only errors whose kind is transient (rate limiting) are retried, and only
/// while no message delta of the failed attempt has been forwarded yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// The first backoff delay, doubled (with jitter) on every retry.
    pub initial_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            initial_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            // Attempts are bounded by `max_retries` instead.
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    retry_policy: RetryPolicy,
}

impl ModelClient {
    /// Wraps `provider` with the default retry policy.
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let provider = Arc::new(provider);
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta, policy| {
            let provider = Arc::clone(&provider);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    send_with_retry(&*provider, &req, on_delta, policy).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            retry_policy: Default::default(),
        }
    }

    /// Replaces the retry policy.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the retry policy in use.
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sends a request and returns the response, forwarding every message
    /// delta to `on_delta` as it arrives.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_delta: impl Fn(&str) + Send + Sync + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Arc::new(on_delta), self.retry_policy).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    /// The concatenated message deltas.
    pub transcript: String,
    /// The provider's own representation of the message, if it has one.
    pub opaque_msg: Option<OpaqueMessage>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

struct AttemptError {
    error: ModelClientError,
    streamed: bool,
}

async fn send_with_retry<P: ModelProvider>(
    provider: &P,
    req: &ModelRequest,
    on_delta: DeltaFn,
    policy: RetryPolicy,
) -> SendRequestResult {
    let mut attempt = 0_u32;
    let operation = || {
        attempt += 1;
        let this_attempt = attempt;
        let fut = provider.send_request(req);
        let on_delta = Arc::clone(&on_delta);
        async move {
            let result = match fut.await {
                Ok(resp) => handle_response(resp, &*on_delta).await,
                Err(err) => Err(AttemptError {
                    error: Box::new(err),
                    streamed: false,
                }),
            };
            result.map_err(|AttemptError { error, streamed }| {
                if error.kind().is_transient()
                    && !streamed
                    && this_attempt <= policy.max_retries
                {
                    backoff::Error::transient(error)
                } else {
                    error!("model request failed: {error}");
                    backoff::Error::permanent(error)
                }
            })
        }
    };
    let notify = |err: ModelClientError, delay: Duration| {
        warn!("model request failed ({err}), retrying in {delay:?}");
    };
    backoff::future::retry_notify(policy.backoff(), operation, notify).await
}

async fn handle_response<R: ModelResponse>(
    resp: R,
    on_delta: &(dyn Fn(&str) + Send + Sync),
) -> Result<ModelClientResponse, AttemptError> {
    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                return Err(AttemptError {
                    error: Box::new(err),
                    streamed: !transcript.is_empty(),
                });
            }
        };

        let Some(event) = event else {
            // The request has been handled gracefully without errors,
            // now try getting the opaque message for this response.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
                on_delta(&msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
        finish_reason,
    })
}
