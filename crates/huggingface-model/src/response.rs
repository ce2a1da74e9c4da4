use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use chainlet_model::{ModelFinishReason, ModelResponse, ModelResponseEvent};

use crate::Error;

/// A completed Hub generation, delivered as one text delta.
///
/// The inference API answers in a single JSON body, so the whole text is
/// known before the first event is polled. Tool calls are never produced;
/// pair this provider with the ReAct agent to use tools.
#[derive(Debug)]
pub struct HuggingFaceResponse {
    events: VecDeque<ModelResponseEvent>,
}

impl HuggingFaceResponse {
    pub(crate) fn from_text(text: String) -> Self {
        let mut events = VecDeque::with_capacity(2);
        if !text.is_empty() {
            events.push_back(ModelResponseEvent::MessageDelta(text));
        }
        events.push_back(ModelResponseEvent::Completed(ModelFinishReason::Stop));
        Self { events }
    }
}

impl ModelResponse for HuggingFaceResponse {
    type Error = Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        Poll::Ready(Ok(self.get_mut().events.pop_front()))
    }
}
