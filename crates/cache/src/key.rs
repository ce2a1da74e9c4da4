use std::fmt::{self, Display};

use chainlet_model::{ModelMessage, ModelRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A digest identifying a request sent to a particular provider
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `req` sent to a provider with the given
    /// fingerprint.
    ///
    /// Every field is length-prefixed, so distinct requests cannot collide
    /// by shifting text between adjacent fields.
    pub fn new(req: &ModelRequest, fingerprint: &str) -> Self {
        let mut hasher = FieldHasher::default();
        hasher.field("fingerprint");
        hasher.field(fingerprint);

        hasher.count(req.messages.len());
        for msg in &req.messages {
            hasher.message(msg);
        }

        hasher.count(req.tools.len());
        for tool in &req.tools {
            hasher.field(&tool.name);
            hasher.field(&tool.description);
            hasher.field(&tool.parameters.to_string());
        }

        hasher.count(req.stop.len());
        for stop in &req.stop {
            hasher.field(stop);
        }

        Self(hasher.finish())
    }

    /// Returns the hex-encoded digest.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct FieldHasher(Sha256);

impl FieldHasher {
    fn field(&mut self, value: &str) {
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value.as_bytes());
    }

    fn message(&mut self, msg: &ModelMessage) {
        match msg {
            ModelMessage::System(content) => {
                self.field("system");
                self.field(content);
            }
            ModelMessage::User(content) => {
                self.field("user");
                self.field(content);
            }
            ModelMessage::Assistant(content) => {
                self.field("assistant");
                self.field(content);
            }
            ModelMessage::AssistantToolCalls {
                content,
                tool_calls,
            } => {
                self.field("assistant_tool_calls");
                self.field(content);
                self.count(tool_calls.len());
                for call in tool_calls {
                    self.field(&call.id);
                    self.field(&call.name);
                    self.field(&call.arguments.to_string());
                }
            }
            ModelMessage::Tool(result) => {
                self.field("tool");
                self.field(&result.id);
                self.field(&result.content);
            }
            // Keyed like the neutral form, so replayed turns match.
            ModelMessage::Opaque(opaque) => match opaque.neutral() {
                Some(neutral) => self.message(neutral),
                None => {
                    self.field("opaque");
                    self.field(opaque.id());
                }
            },
        }
    }

    fn count(&mut self, n: usize) {
        self.0.update((n as u64).to_le_bytes());
    }

    fn finish(self) -> String {
        self.0
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
