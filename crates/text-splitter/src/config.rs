use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::SplitterError;

/// Measures a piece of text.
pub type LengthFn = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const DEFAULT_CHUNK_SIZE: usize = 4000;
const DEFAULT_CHUNK_OVERLAP: usize = 200;
const DEFAULT_SEPARATOR: &str = "\n\n";

/// Chunking parameters shared by every splitter.
#[derive(Clone)]
pub struct SplitterConfig {
    separator: String,
    chunk_size: usize,
    chunk_overlap: usize,
    length_function: LengthFn,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            length_function: Arc::new(|text| text.chars().count()),
        }
    }
}

impl Debug for SplitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitterConfig")
            .field("separator", &self.separator)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish_non_exhaustive()
    }
}

impl SplitterConfig {
    /// Creates a config with the given sizes, measured in characters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitterError> {
        if chunk_overlap > chunk_size {
            return Err(SplitterError::OverlapTooLarge {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        })
    }

    /// Sets the separator that splits and rejoins pieces.
    #[inline]
    pub fn with_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.separator = separator.into();
        self
    }

    /// Measures pieces with `length_function` instead of counting chars.
    #[inline]
    pub fn with_length_function(
        mut self,
        length_function: impl Fn(&str) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.length_function = Arc::new(length_function);
        self
    }

    /// Measures pieces in tokens of the named tiktoken encoding: `gpt2`
    /// (an alias of `r50k_base`), `r50k_base`, `p50k_base`, `p50k_edit` or
    /// `cl100k_base`.
    #[cfg(feature = "tiktoken")]
    pub fn with_tiktoken_encoder(self, encoding_name: &str) -> Result<Self, SplitterError> {
        let load = match encoding_name {
            "gpt2" | "r50k_base" => tiktoken_rs::r50k_base,
            "p50k_base" => tiktoken_rs::p50k_base,
            "p50k_edit" => tiktoken_rs::p50k_edit,
            "cl100k_base" => tiktoken_rs::cl100k_base,
            _ => return Err(SplitterError::UnknownEncoding(encoding_name.to_owned())),
        };
        let bpe = load().map_err(|err| SplitterError::Encoding {
            name: encoding_name.to_owned(),
            reason: err.to_string(),
        })?;
        Ok(self.with_length_function(move |text| bpe.encode_ordinary(text).len()))
    }

    /// Returns the separator.
    #[inline]
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Returns the target chunk size.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the maximum overlap between neighbouring chunks.
    #[inline]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Measures `text` with the configured length function.
    #[inline]
    pub fn length(&self, text: &str) -> usize {
        (self.length_function)(text)
    }

    /// Combines small pieces into chunks of about `chunk_size`.
    ///
    /// Pieces are added to the current chunk until the next one would reach
    /// `chunk_size`. The chunk is then emitted, and pieces are dropped from
    /// its front until at most `chunk_overlap` remains to start the next
    /// one. A single piece larger than `chunk_size` still becomes its own
    /// chunk, with a warning. The last chunk is always emitted, so the
    /// result is never empty.
    pub fn merge_splits<I, S>(&self, splits: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let separator_join = |pieces: &VecDeque<(String, usize)>| {
            pieces
                .iter()
                .map(|(piece, _)| piece.as_str())
                .collect::<Vec<_>>()
                .join(&self.separator)
        };

        let mut docs = vec![];
        let mut current: VecDeque<(String, usize)> = VecDeque::new();
        let mut total = 0;
        for piece in splits {
            let piece = piece.as_ref();
            let len = self.length(piece);
            if total + len >= self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of size {total}, which is longer than the specified {}",
                        self.chunk_size
                    );
                }
                if !current.is_empty() {
                    docs.push(separator_join(&current));
                    while total > self.chunk_overlap {
                        let Some((_, front_len)) = current.pop_front() else {
                            break;
                        };
                        total -= front_len;
                    }
                }
            }
            current.push_back((piece.to_owned(), len));
            total += len;
        }
        docs.push(separator_join(&current));
        docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_larger_than_size() {
        let err = SplitterConfig::new(10, 20).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Got a larger chunk overlap (20) than chunk size (10), should be smaller."
        );
        assert!(SplitterConfig::new(10, 10).is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = SplitterConfig::default();
        assert_eq!(config.chunk_size(), 4000);
        assert_eq!(config.chunk_overlap(), 200);
        assert_eq!(config.separator(), "\n\n");
        assert_eq!(config.length("héllo"), 5);
    }

    #[test]
    fn test_merge_with_overlap() {
        let config = SplitterConfig::new(7, 3).unwrap().with_separator(" ");
        let chunks = config.merge_splits(["foo", "bar", "baz", "a", "a"]);
        assert_eq!(chunks, ["foo bar", "bar baz", "baz a a"]);
    }

    #[test]
    fn test_merge_oversized_piece() {
        let config = SplitterConfig::new(5, 0).unwrap().with_separator(" ");
        let chunks = config.merge_splits(["ab", "abcdefgh", "c"]);
        assert_eq!(chunks, ["ab", "abcdefgh", "c"]);
    }

    #[test]
    fn test_merge_empty_input() {
        let config = SplitterConfig::default();
        assert_eq!(config.merge_splits(Vec::<String>::new()), [""]);
    }

    #[test]
    fn test_custom_length_function() {
        let config = SplitterConfig::new(2, 0)
            .unwrap()
            .with_separator(" ")
            .with_length_function(|text| text.split_whitespace().count());
        let chunks = config.merge_splits(["one two", "three", "four five"]);
        assert_eq!(chunks, ["one two", "three", "four five"]);
    }

    #[cfg(feature = "tiktoken")]
    #[test]
    fn test_tiktoken_encoder() {
        let config = SplitterConfig::new(100, 0)
            .unwrap()
            .with_tiktoken_encoder("cl100k_base")
            .unwrap();
        assert!(config.length("hello world") <= 3);
        assert!(matches!(
            SplitterConfig::default().with_tiktoken_encoder("nope"),
            Err(SplitterError::UnknownEncoding(_))
        ));
    }
}
