/// Paragraph and sentence segmentation used when a page overflows the chunk budget.
use regex::Regex;
use std::sync::LazyLock;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").unwrap());

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+|[。！？]+\s*").unwrap());

/// Strategy for cutting an oversized paragraph into sentences.
///
/// Scripts without `.!?` terminators can plug in their own rules; a
/// segmenter that returns the whole paragraph as one sentence is valid and
/// simply produces an oversized chunk.
pub trait Segmenter: Send + Sync {
    /// Split `text` into trimmed, non-empty sentences in order.
    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Splits after `.`, `!` or `?` followed by whitespace, and after the
/// full-width `。！？` terminators.
#[derive(Debug, Default, Clone, Copy)]
pub struct PunctuationSegmenter;

impl Segmenter for PunctuationSegmenter {
    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for m in SENTENCE_END.find_iter(text) {
            let sentence = text[start..m.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = m.end();
        }

        let rest = text[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }

        sentences
    }
}

/// Split text on blank lines, dropping empty paragraphs.
pub fn paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs() {
        let text = "First para.\n\nSecond para.\n  \nThird.\n\n\n";
        assert_eq!(paragraphs(text), vec!["First para.", "Second para.", "Third."]);
    }

    #[test]
    fn test_paragraphs_keeps_single_newlines() {
        let text = "line one\nline two";
        assert_eq!(paragraphs(text), vec!["line one\nline two"]);
    }

    #[test]
    fn test_sentences() {
        let seg = PunctuationSegmenter;
        let got = seg.sentences("One. Two! Three? Four");
        assert_eq!(got, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_sentences_require_whitespace() {
        let seg = PunctuationSegmenter;
        // Decimal points and abbreviations without a following space stay intact
        let got = seg.sentences("Version 2.5 ships. Done.");
        assert_eq!(got, vec!["Version 2.5 ships.", "Done."]);
    }

    #[test]
    fn test_sentences_full_width() {
        let seg = PunctuationSegmenter;
        let got = seg.sentences("これは文です。次の文です。");
        assert_eq!(got, vec!["これは文です。", "次の文です。"]);
    }

    #[test]
    fn test_sentences_without_terminators() {
        let seg = PunctuationSegmenter;
        let text = "no terminators at all here";
        assert_eq!(seg.sentences(text), vec![text]);
    }
}
