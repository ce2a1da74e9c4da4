use crate::{SplitterConfig, TextSplitter};

/// Splits on the configured separator, then merges the pieces.
#[derive(Clone, Debug, Default)]
pub struct CharacterTextSplitter {
    config: SplitterConfig,
}

impl CharacterTextSplitter {
    /// Creates a splitter with the given config.
    #[inline]
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }
}

impl TextSplitter for CharacterTextSplitter {
    #[inline]
    fn config(&self) -> &SplitterConfig {
        &self.config
    }

    fn split_text(&self, text: &str) -> Vec<String> {
        let separator = self.config.separator();
        if separator.is_empty() {
            // An empty separator splits between characters.
            let chars = text.chars().map(String::from);
            return self.config.merge_splits(chars);
        }
        self.config.merge_splits(text.split(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> CharacterTextSplitter {
        let config = SplitterConfig::new(chunk_size, chunk_overlap)
            .unwrap()
            .with_separator(" ");
        CharacterTextSplitter::new(config)
    }

    #[test]
    fn test_split_text() {
        let chunks = splitter(7, 3).split_text("foo bar baz 123");
        assert_eq!(chunks, ["foo bar", "bar baz", "baz 123"]);
    }

    #[test]
    fn test_paragraphs() {
        let text = "First paragraph.\n\nSecond one.\n\nThird.";
        let config = SplitterConfig::new(30, 0).unwrap();
        let chunks = CharacterTextSplitter::new(config).split_text(text);
        assert_eq!(chunks, ["First paragraph.\n\nSecond one.", "Third."]);
    }

    #[test]
    fn test_empty_separator() {
        let config = SplitterConfig::new(3, 1).unwrap().with_separator("");
        let chunks = CharacterTextSplitter::new(config).split_text("abcde");
        assert_eq!(chunks, ["ab", "bc", "cd", "de"]);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(CharacterTextSplitter::default().split_text(""), [""]);
    }
}
