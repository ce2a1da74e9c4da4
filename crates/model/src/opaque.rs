use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::ModelMessage;

/// A provider-specific message that the orchestration layer carries around
/// without looking inside.
///
/// Some providers need the exact message they produced to be echoed back in
/// later requests (for example an assistant turn with native tool calls and
/// reasoning content). The provider wraps that message in an
/// `OpaqueMessage`, the agent stores it in the conversation, and the
/// provider unwraps it again with [`OpaqueMessage::to_raw`] when building
/// the next request.
///
/// Identity is the `id`: two opaque messages compare equal and hash the same
/// iff their ids match.
///
/// The holder may attach a provider-neutral form of the same turn with
/// [`OpaqueMessage::with_neutral`]. Caches key opaque history by that form
/// when present, so a turn replayed without its opaque message still lines
/// up with the recorded one.
pub struct OpaqueMessage {
    value: Arc<dyn OpaqueValue>,
    neutral: Option<Arc<ModelMessage>>,
}

impl OpaqueMessage {
    /// Wraps `value` under the given `id`.
    ///
    /// The id should be unique within a conversation.
    #[inline]
    pub fn new<ID: Into<String>, T: Send + Sync + 'static>(
        id: ID,
        value: T,
    ) -> Self {
        Self {
            value: Arc::new(Tagged {
                id: id.into(),
                value,
            }),
            neutral: None,
        }
    }

    /// Attaches the provider-neutral form of this turn, typically
    /// [`ModelMessage::Assistant`] or [`ModelMessage::AssistantToolCalls`].
    ///
    /// A nested opaque message is not a neutral form and is ignored.
    #[inline]
    pub fn with_neutral(mut self, neutral: ModelMessage) -> Self {
        if !matches!(neutral, ModelMessage::Opaque(_)) {
            self.neutral = Some(Arc::new(neutral));
        }
        self
    }

    /// Returns the id of this message.
    #[inline]
    pub fn id(&self) -> &str {
        self.value.id()
    }

    /// Returns the provider-neutral form of this turn, if one was attached.
    #[inline]
    pub fn neutral(&self) -> Option<&ModelMessage> {
        self.neutral.as_deref()
    }

    /// Borrows the wrapped value if it has type `T`.
    #[inline]
    pub fn to_raw<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref()
    }
}

impl Clone for OpaqueMessage {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            neutral: self.neutral.clone(),
        }
    }
}

impl Debug for OpaqueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueMessage").field(&self.id()).finish()
    }
}

impl PartialEq for OpaqueMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for OpaqueMessage {}

impl Hash for OpaqueMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

trait OpaqueValue: Send + Sync {
    fn id(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

struct Tagged<T> {
    id: String,
    value: T,
}

impl<T: Send + Sync + 'static> OpaqueValue for Tagged<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn Any {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct ChatTurn {
        text: String,
    }

    #[test]
    fn test_downcast() {
        let turn = ChatTurn {
            text: "Thought: I should search".to_owned(),
        };
        let opaque = OpaqueMessage::new("turn:0", turn.clone());
        assert_eq!(opaque.id(), "turn:0");
        assert_eq!(opaque.to_raw::<ChatTurn>(), Some(&turn));
        assert!(opaque.to_raw::<String>().is_none());
    }

    #[test]
    fn test_identity_is_the_id() {
        let a = OpaqueMessage::new("turn:0", 1_u32);
        let b = OpaqueMessage::new("turn:0", "something else");
        let c = OpaqueMessage::new("turn:1", 1_u32);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_neutral_form() {
        let plain = OpaqueMessage::new("turn:0", 1_u32);
        assert!(plain.neutral().is_none());

        let opaque = plain
            .clone()
            .with_neutral(ModelMessage::Assistant("Hello".to_owned()));
        assert_eq!(
            opaque.neutral(),
            Some(&ModelMessage::Assistant("Hello".to_owned()))
        );
        assert_eq!(opaque, plain);

        let nested = plain.clone().with_neutral(ModelMessage::Opaque(opaque));
        assert!(nested.neutral().is_none());
    }
}
