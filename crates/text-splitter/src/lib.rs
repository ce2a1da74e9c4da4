//! Splitting long text into chunks that fit a model's context.
//!
//! Every splitter first breaks the text into small pieces (separator-delimited
//! runs for [`CharacterTextSplitter`], sentences for
//! [`SentenceTextSplitter`]) and then merges neighbouring pieces back into
//! chunks of at most `chunk_size`, overlapping by up to `chunk_overlap`.
//! Sizes are measured with the configured length function: characters by
//! default, or tokens with [`SplitterConfig::with_tiktoken_encoder`].

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod character;
mod config;
mod sentence;

pub use character::CharacterTextSplitter;
pub use config::{LengthFn, SplitterConfig};
pub use sentence::SentenceTextSplitter;

/// Errors raised while configuring a splitter.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SplitterError {
    /// The overlap would swallow whole chunks.
    #[error(
        "Got a larger chunk overlap ({chunk_overlap}) than chunk size \
         ({chunk_size}), should be smaller."
    )]
    OverlapTooLarge {
        /// The requested chunk size.
        chunk_size: usize,
        /// The requested overlap.
        chunk_overlap: usize,
    },
    /// No tokenizer goes by this name.
    #[error("unknown encoding `{0}`")]
    UnknownEncoding(String),
    /// The tokenizer failed to load.
    #[error("cannot load encoding `{name}`: {reason}")]
    Encoding {
        /// The encoding name.
        name: String,
        /// What went wrong.
        reason: String,
    },
}

/// Splits text into chunks.
pub trait TextSplitter {
    /// Returns the chunking parameters.
    fn config(&self) -> &SplitterConfig;

    /// Splits `text` into chunks.
    ///
    /// At least one chunk is always returned, even for empty input.
    fn split_text(&self, text: &str) -> Vec<String>;
}
