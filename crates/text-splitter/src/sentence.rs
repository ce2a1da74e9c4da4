use crate::{SplitterConfig, TextSplitter};

/// Characters that may trail a sentence terminator, e.g. `."` or `?)`.
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '\u{201d}', '\u{2019}'];

/// Splits into sentences, then merges them.
///
/// A sentence ends at `.`, `!` or `?` (plus any closing quotes or brackets)
/// when followed by whitespace or the end of text, and at blank lines.
/// Sentences are trimmed and empty ones dropped.
#[derive(Clone, Debug, Default)]
pub struct SentenceTextSplitter {
    config: SplitterConfig,
}

impl SentenceTextSplitter {
    /// Creates a splitter with the given config.
    #[inline]
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }
}

impl TextSplitter for SentenceTextSplitter {
    #[inline]
    fn config(&self) -> &SplitterConfig {
        &self.config
    }

    fn split_text(&self, text: &str) -> Vec<String> {
        self.config.merge_splits(sentences(text))
    }
}

/// Returns the sentences of `text`, in order.
pub(crate) fn sentences(text: &str) -> Vec<&str> {
    let mut sentences = vec![];
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let end = match c {
            '.' | '!' | '?' => {
                let mut end = idx + c.len_utf8();
                while let Some(&(next_idx, next)) = chars.peek() {
                    if matches!(next, '.' | '!' | '?') || CLOSERS.contains(&next) {
                        end = next_idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match chars.peek() {
                    None => Some(end),
                    Some((_, next)) if next.is_whitespace() => Some(end),
                    Some(_) => None,
                }
            }
            '\n' if text[idx + 1..].trim_start_matches([' ', '\t', '\r']).starts_with('\n') => {
                Some(idx)
            }
            _ => None,
        };
        if let Some(end) = end {
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, sentence: &'a str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentences() {
        assert_eq!(
            sentences("Hello there! How are you? I'm fine.  Thanks."),
            ["Hello there!", "How are you?", "I'm fine.", "Thanks."]
        );
    }

    #[test]
    fn test_terminator_variants() {
        assert_eq!(
            sentences("He said \"stop.\" Then he left... Really?! Yes (sort of.) ok"),
            ["He said \"stop.\"", "Then he left...", "Really?!", "Yes (sort of.)", "ok"]
        );
        // No whitespace after the dot: not a boundary.
        assert_eq!(sentences("Version 1.2 is out."), ["Version 1.2 is out."]);
    }

    #[test]
    fn test_blank_lines() {
        assert_eq!(
            sentences("A heading\n\nBody text without a dot\n \nEnd"),
            ["A heading", "Body text without a dot", "End"]
        );
    }

    #[test]
    fn test_split_text() {
        let config = SplitterConfig::new(30, 0).unwrap().with_separator(" ");
        let splitter = SentenceTextSplitter::new(config);
        let chunks = splitter.split_text("One fish. Two fish. Red fish. Blue fish.");
        assert_eq!(chunks, ["One fish. Two fish. Red fish.", "Blue fish."]);
    }
}
