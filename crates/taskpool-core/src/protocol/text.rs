//! Text statistics, keyword extraction and a word-list sentiment score.

use crate::{Result, protocol::round_to};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const WORDS_PER_MINUTE: usize = 200;
const TOP_KEYWORDS: usize = 10;
const MIN_KEYWORD_CHARS: usize = 4;

const POSITIVE_WORDS: &[&str] = &[
    "good",
    "great",
    "excellent",
    "amazing",
    "wonderful",
    "fantastic",
    "love",
    "happy",
    "best",
    "awesome",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad",
    "terrible",
    "awful",
    "horrible",
    "hate",
    "sad",
    "worst",
    "poor",
    "disappointing",
    "angry",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

impl TextPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    // Any string is a valid text payload.
    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Easy,
    Medium,
    Hard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Keyword {
    pub word: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReport {
    pub character_count: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub average_word_length: f64,
    pub reading_time_minutes: usize,
    pub complexity: Complexity,
    pub keywords: Vec<Keyword>,
    pub sentiment: Sentiment,
    pub positive_words: usize,
    pub negative_words: usize,
}

pub(crate) fn analyze(payload: &TextPayload) -> TextReport {
    let text = payload.text.as_str();
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len();

    let average_word_length = if word_count == 0 {
        0.0
    } else {
        let letters: usize = words.iter().map(|w| w.chars().count()).sum();
        round_to(letters as f64 / word_count as f64, 2)
    };

    let complexity = if average_word_length < 4.0 {
        Complexity::Easy
    } else if average_word_length > 6.0 {
        Complexity::Hard
    } else {
        Complexity::Medium
    };

    let normalized = normalized_words(text);
    let positive_words = normalized
        .iter()
        .filter(|w| POSITIVE_WORDS.contains(&w.as_str()))
        .count();
    let negative_words = normalized
        .iter()
        .filter(|w| NEGATIVE_WORDS.contains(&w.as_str()))
        .count();
    let sentiment = match positive_words.cmp(&negative_words) {
        core::cmp::Ordering::Greater => Sentiment::Positive,
        core::cmp::Ordering::Less => Sentiment::Negative,
        core::cmp::Ordering::Equal => Sentiment::Neutral,
    };

    TextReport {
        character_count: text.chars().count(),
        word_count,
        sentence_count: text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count(),
        paragraph_count: paragraph_count(text),
        average_word_length,
        reading_time_minutes: word_count.div_ceil(WORDS_PER_MINUTE),
        complexity,
        keywords: top_keywords(&normalized),
        sentiment,
        positive_words,
        negative_words,
    }
}

/// Lower-cased words with everything but letters, digits and `_` removed.
fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Blocks of non-blank lines separated by one or more blank lines.
fn paragraph_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_paragraph = false;
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if !blank && !in_paragraph {
            count += 1;
        }
        in_paragraph = !blank;
    }
    count
}

/// Most frequent words longer than three characters. Ties keep the order in
/// which the words first appeared.
fn top_keywords(words: &[String]) -> Vec<Keyword> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in words {
        if word.chars().count() < MIN_KEYWORD_CHARS {
            continue;
        }
        let count = counts.entry(word.as_str()).or_insert(0);
        if *count == 0 {
            order.push(word.as_str());
        }
        *count += 1;
    }

    let mut ranked: Vec<Keyword> = order
        .into_iter()
        .map(|word| Keyword {
            word: word.to_owned(),
            count: counts[word],
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(TOP_KEYWORDS);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(text: &str) -> TextReport {
        analyze(&TextPayload::new(text))
    }

    #[test]
    fn counts_sentences_and_sentiment() {
        let r = report("Good. Bad! Good again?");
        assert_eq!(r.sentence_count, 3);
        assert_eq!(r.positive_words, 2);
        assert_eq!(r.negative_words, 1);
        assert_eq!(r.sentiment, Sentiment::Positive);
        assert_eq!(r.word_count, 4);
        assert_eq!(r.paragraph_count, 1);
    }

    #[test]
    fn sentiment_tie_is_neutral() {
        assert_eq!(report("good bad").sentiment, Sentiment::Neutral);
        assert_eq!(report("nothing here").sentiment, Sentiment::Neutral);
        assert_eq!(report("awful, just awful").sentiment, Sentiment::Negative);
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let r = report("First line.\nStill first.\n\n  \nSecond.\n\n\nThird.");
        assert_eq!(r.paragraph_count, 3);
        assert_eq!(r.sentence_count, 4);
    }

    #[test]
    fn word_length_and_complexity() {
        let r = report("a bb ccc");
        assert_eq!(r.average_word_length, 2.0);
        assert_eq!(r.complexity, Complexity::Easy);

        let r = report("extraordinary circumstances");
        assert_eq!(r.average_word_length, 13.0);
        assert_eq!(r.complexity, Complexity::Hard);

        let r = report("words of medium size");
        assert_eq!(r.average_word_length, 4.25);
        assert_eq!(r.complexity, Complexity::Medium);
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(report("").reading_time_minutes, 0);
        assert_eq!(report("one").reading_time_minutes, 1);
        let long = "word ".repeat(201);
        assert_eq!(report(&long).reading_time_minutes, 2);
    }

    #[test]
    fn keywords_are_normalized_and_ranked() {
        let r = report("Rust, rust! Tokio... tokio? rust; pool. the and");
        let words: Vec<(&str, usize)> =
            r.keywords.iter().map(|k| (k.word.as_str(), k.count)).collect();
        assert_eq!(words, [("rust", 3), ("tokio", 2), ("pool", 1)]);
    }

    #[test]
    fn keywords_keep_at_most_ten() {
        let text = (0..15)
            .map(|i| format!("keyword{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let r = report(&text);
        assert_eq!(r.keywords.len(), 10);
        assert_eq!(r.keywords[0].word, "keyword0");
    }

    #[test]
    fn empty_text() {
        let r = report("");
        assert_eq!(r.character_count, 0);
        assert_eq!(r.word_count, 0);
        assert_eq!(r.sentence_count, 0);
        assert_eq!(r.paragraph_count, 0);
        assert_eq!(r.average_word_length, 0.0);
        assert!(r.keywords.is_empty());
    }

    #[test]
    fn characters_are_unicode_scalars() {
        assert_eq!(report("héllo wörld").character_count, 11);
    }
}
