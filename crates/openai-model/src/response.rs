use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use chainlet_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage, ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, Choice, Message, ToolCall};

/// Everything accumulated from the stream so far.
struct StreamState {
    sse: Sse,
    id: Option<String>,
    content: String,
    reasoning_content: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Indices into `tool_calls` that have started streaming but were not
    // emitted yet. Tool calls are emitted once the stream has moved past
    // them, since their arguments arrive in fragments.
    unsent_tool_calls: VecDeque<usize>,
    finish_reason: Option<ModelFinishReason>,
    done: bool,
}

impl StreamState {
    fn into_message(self) -> Option<(String, Message)> {
        Some((
            self.id?,
            Message::Assistant {
                content: Some(self.content),
                tool_calls: (!self.tool_calls.is_empty())
                    .then_some(self.tool_calls),
                reasoning_content: self.reasoning_content,
            },
        ))
    }

    /// Folds a choice into the state, returning its content delta if any.
    fn apply_choice(&mut self, choice: Choice) -> Option<String> {
        if let Some(reasoning_content) = &choice.delta.reasoning_content {
            self.reasoning_content
                .get_or_insert_default()
                .push_str(reasoning_content);
        }
        for tool_call in choice.delta.tool_calls.into_iter().flatten() {
            self.apply_tool_call(tool_call);
        }
        if let Some(finish_reason) = choice.finish_reason {
            self.finish_reason = Some(match finish_reason.as_str() {
                "tool_calls" => ModelFinishReason::ToolCalls,
                _ => ModelFinishReason::Stop,
            });
        }

        let content = choice.delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&content);
        Some(content)
    }

    fn apply_tool_call(&mut self, fragment: ToolCall) {
        let Some(partial) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.index == fragment.index)
        else {
            self.unsent_tool_calls.push_back(self.tool_calls.len());
            self.tool_calls.push(fragment);
            return;
        };

        if let Some(id) = fragment.id {
            partial.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = fragment.r#type {
            partial.r#type.get_or_insert_default().push_str(&ty);
        }
        let Some(function) = fragment.function else {
            return;
        };
        match &mut partial.function {
            Some(partial_func) => {
                if let Some(name) = function.name {
                    partial_func.name.get_or_insert_default().push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial_func
                        .arguments
                        .get_or_insert_default()
                        .push_str(&arguments);
                }
            }
            None => partial.function = Some(function),
        }
    }

    /// Pops a tool call that is complete: either a later one has started,
    /// or the stream has ended.
    fn pop_ready_tool_call(&mut self) -> Option<ToolCallRequest> {
        let &idx = self.unsent_tool_calls.front()?;
        let is_last = idx + 1 == self.tool_calls.len();
        if is_last && !self.done && self.finish_reason.is_none() {
            return None;
        }
        self.unsent_tool_calls.pop_front();

        let tool_call = &self.tool_calls[idx];
        let function = tool_call.function.as_ref();
        let arguments = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|args| !args.trim().is_empty())
            .map(|args| {
                serde_json::from_str::<Value>(args).unwrap_or_else(|err| {
                    warn!("malformed tool call arguments ({err}): {args}");
                    Value::String(args.to_owned())
                })
            })
            .unwrap_or_else(|| Value::Object(Default::default()));
        Some(ToolCallRequest {
            id: tool_call.id.clone().unwrap_or_default(),
            name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
            arguments,
        })
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, StreamState), Error>;

pin_project! {
    /// A streamed chat completion.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        full_msg: Option<(String, Message)>,
    }
}

impl OpenAIResponse {
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let state = StreamState {
            sse,
            id: None,
            content: Default::default(),
            reasoning_content: Default::default(),
            tool_calls: Default::default(),
            unsent_tool_calls: Default::default(),
            finish_reason: Default::default(),
            done: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(state))),
            full_msg: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let result = ready!(next_event_fut.as_mut().poll(cx));
        *this.next_event_fut = None;

        match result {
            Ok((Some(event), state)) => {
                *this.next_event_fut = Some(Box::pin(next_event(state)));
                Poll::Ready(Ok(Some(event)))
            }
            Ok((None, state)) => {
                *this.full_msg = state.into_message();
                Poll::Ready(Ok(None))
            }
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.full_msg
            .as_ref()
            .map(|(id, msg)| OpaqueMessage::new(id, msg.clone()))
    }
}

// Event order: content deltas as they arrive, each tool call once it is
// complete, then the finish reason.
async fn next_event(mut state: StreamState) -> NextEvent {
    loop {
        if let Some(tool_call) = state.pop_ready_tool_call() {
            return Ok((Some(ModelResponseEvent::ToolCall(tool_call)), state));
        }
        if state.done {
            let event = state.finish_reason.take().map(ModelResponseEvent::Completed);
            return Ok((event, state));
        }

        let sse_event = match state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                state.done = true;
                continue;
            }
            Err(err) => {
                return Err(Error::new(
                    format!("broken event stream: {err:?}"),
                    ErrorKind::Other,
                ));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            state.done = true;
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }

        let mut delta = None;
        for choice in chunk.choices {
            if let Some(content) = state.apply_choice(choice) {
                delta.get_or_insert_with(String::new).push_str(&content);
            }
        }
        if let Some(delta) = delta {
            return Ok((Some(ModelResponseEvent::MessageDelta(delta)), state));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    async fn collect_events(
        body: &'static [u8],
    ) -> (Vec<ModelResponseEvent>, Option<OpaqueMessage>) {
        let chunks = Chunks::from_vec_deque(vec![Bytes::from_static(body)].into());
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }
        (events, resp.make_opaque_message())
    }

    #[tokio::test]
    async fn test_tool_call_stream() {
        let (events, opaque) =
            collect_events(include_bytes!("../fixtures/tool_calls.txt")).await;

        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Let me ".to_owned()),
                ModelResponseEvent::MessageDelta("compute that.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_a".to_owned(),
                    name: "calculator".to_owned(),
                    arguments: json!({ "expression": "2 ^ 10" }),
                }),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_b".to_owned(),
                    name: "terminal".to_owned(),
                    arguments: json!({ "cmdline": "date" }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );

        let opaque = opaque.unwrap();
        assert_eq!(opaque.id(), "chatcmpl-42");
        let Some(Message::Assistant {
            content,
            tool_calls,
            ..
        }) = opaque.to_raw::<Message>()
        else {
            panic!("unexpected opaque message");
        };
        assert_eq!(content.as_deref(), Some("Let me compute that."));
        assert_eq!(tool_calls.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_text_stream() {
        let (events, _) = collect_events(
            b"data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"c1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
              data: {\"id\":\"c1\",\"choices\":[]}\n\n\
              data: [DONE]\n\n",
        )
        .await;
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Hi".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_id_mismatch() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(
                b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n\n\
                  data: {\"id\":\"b\",\"choices\":[{\"delta\":{\"content\":\"y\"},\"finish_reason\":null}]}\n\n",
            )]
            .into(),
        );
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(first, Ok(Some(ModelResponseEvent::MessageDelta(_)))));
        let second = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(second.unwrap_err().message(), "chunk id mismatch");
        let after = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(after, Ok(None)));
    }
}
