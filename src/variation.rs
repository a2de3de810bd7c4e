//! Case and plural surface variants of verified terms, and the TSV artifact
//! format the downstream translator consumes.
//!
//! Pure functions only; nothing here touches a store.
use std::collections::HashSet;

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

/// A source surface form and the translation it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermPair {
    pub source: String,
    pub target: String,
}

impl TermPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Expand one term into its case and plural variants.
///
/// The trimmed original comes first, followed by the case variants and then
/// the plural of each case variant. Multi-word phrases pluralize their
/// first word only. The result holds no duplicate `(source, target)` pair.
pub fn expand(term: &TermPair) -> Vec<TermPair> {
    let words: Vec<&str> = term.source.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let target = term.target.trim();

    let cases = if words.len() == 1 {
        let word = words[0];
        vec![
            word.to_string(),
            word.to_lowercase(),
            word.to_uppercase(),
            title_word(word),
        ]
    } else {
        let phrase = words.join(" ");
        let lower = phrase.to_lowercase();
        vec![
            phrase,
            capitalize_first_word(&lower),
            words.iter().map(|w| title_word(w)).collect::<Vec<_>>().join(" "),
            lower.to_uppercase(),
            lower,
        ]
    };

    let mut surfaces = cases.clone();
    for case in &cases {
        let (head, tail) = match case.split_once(' ') {
            Some((head, tail)) => (head, Some(tail)),
            None => (case.as_str(), None),
        };
        for plural in pluralize(head) {
            surfaces.push(match tail {
                Some(tail) => format!("{plural} {tail}"),
                None => plural,
            });
        }
    }

    let mut seen = HashSet::new();
    surfaces
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .map(|source| TermPair::new(source, target))
        .collect()
}

/// Expand a list of entries, deduplicating across all of them.
pub fn expand_entries(entries: &[TermPair]) -> Vec<TermPair> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .flat_map(expand)
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

/// Plural forms of an English word, keeping an all-caps word all-caps.
///
/// Words that already end in `s`, or whose last char is not an ASCII letter,
/// get no plural.
pub fn pluralize(word: &str) -> Vec<String> {
    let Some(last) = word.chars().last() else {
        return Vec::new();
    };
    if !last.is_ascii_alphabetic() {
        return Vec::new();
    }

    let lower = word.to_lowercase();
    if lower.ends_with('s') {
        return Vec::new();
    }

    let shout = is_all_caps(word);
    let suffix = |s: &str| {
        if shout {
            s.to_uppercase()
        } else {
            s.to_string()
        }
    };
    // The ending is ASCII, so byte offsets from the end are char boundaries.
    let len = word.len();

    if lower.ends_with('y') && !ends_with_vowel_before(&lower, 1) && lower.len() > 1 {
        return vec![format!("{}{}", &word[..len - 1], suffix("ies"))];
    }
    if ["x", "z", "ch", "sh"].iter().any(|e| lower.ends_with(e)) {
        return vec![format!("{word}{}", suffix("es"))];
    }
    if lower.ends_with("fe") {
        return vec![
            format!("{}{}", &word[..len - 2], suffix("ves")),
            format!("{word}{}", suffix("s")),
        ];
    }
    if lower.ends_with('f') {
        return vec![
            format!("{}{}", &word[..len - 1], suffix("ves")),
            format!("{word}{}", suffix("s")),
        ];
    }
    vec![format!("{word}{}", suffix("s"))]
}

/// Render entries as a headerless two-column TSV. Tabs and line breaks
/// inside a field are flattened to spaces.
pub fn render_tsv(entries: &[TermPair]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(Vec::new());

    for entry in entries {
        writer.write_record([sanitize(&entry.source), sanitize(&entry.target)])?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Parse a TSV artifact produced by [`render_tsv`].
pub fn parse_tsv(bytes: &[u8]) -> Result<Vec<TermPair>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .from_reader(bytes);

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        entries.push(TermPair::new(
            record.get(0).unwrap_or_default(),
            record.get(1).unwrap_or_default(),
        ));
    }
    Ok(entries)
}

fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if matches!(c, '\t' | '\r' | '\n') { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn title_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn capitalize_first_word(phrase: &str) -> String {
    match phrase.split_once(' ') {
        Some((head, tail)) => format!("{} {tail}", title_word(head)),
        None => title_word(phrase),
    }
}

fn is_all_caps(word: &str) -> bool {
    word.chars().any(char::is_alphabetic) && !word.chars().any(char::is_lowercase)
}

fn ends_with_vowel_before(lower: &str, offset: usize) -> bool {
    lower
        .chars()
        .rev()
        .nth(offset)
        .is_some_and(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
}
