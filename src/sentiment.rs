//! Lexicon sentiment scorer and the thresholds that turn a score into a label.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, f64>>(raw).unwrap_or_else(|e| {
        tracing::error!(error = %e, "sentiment lexicon is not valid JSON; scoring everything 0");
        HashMap::new()
    })
});

/// Normalization constant: maps an unbounded sum into (-1, 1).
const ALPHA: f64 = 15.0;

/// Scaling applied to a lexicon value when a negator precedes it.
const NEGATION_SCALAR: f64 = -0.74;

/// Black-box scorer. Returns a compound score in [-1, 1].
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

#[derive(Debug, Clone, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> f64 {
        *LEXICON.get(w).unwrap_or(&0.0)
    }

    /// Raw lexicon sum and token count.
    /// A negator in the previous 1..=3 tokens flips and dampens the word's value.
    pub fn raw_score(&self, text: &str) -> (f64, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score = 0.0;

        for i in 0..tokens.len() {
            let base = self.word_score(tokens[i].as_str());
            if base == 0.0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            let boosted = if i >= 1 && is_booster(tokens[i - 1].as_str()) {
                base + base.signum() * 0.293
            } else {
                base
            };
            score += if negated {
                boosted * NEGATION_SCALAR
            } else {
                boosted
            };
        }

        (score, tokens.len())
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let (raw, _) = self.raw_score(text);
        normalize(raw)
    }
}

fn normalize(raw: f64) -> f64 {
    if raw == 0.0 {
        return 0.0;
    }
    (raw / (raw * raw + ALPHA).sqrt()).clamp(-1.0, 1.0)
}

/// Alphanumeric tokens, lower-case; apostrophes stay inside words.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "don't"
            | "doesn't"
            | "didn't"
            | "without"
    )
}

fn is_booster(tok: &str) -> bool {
    matches!(
        tok,
        "very" | "really" | "extremely" | "incredibly" | "so" | "totally" | "absolutely"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentClass {
    Positive,
    Neutral,
    Negative,
}

/// Score ≥ `positive` is positive, score ≤ `negative` is negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentThresholds {
    pub positive: f64,
    pub negative: f64,
    pub neutral_label: String,
}

impl Default for SentimentThresholds {
    fn default() -> Self {
        Self {
            positive: 0.05,
            negative: -0.05,
            neutral_label: "neutral".to_string(),
        }
    }
}

impl SentimentThresholds {
    pub fn classify(&self, score: f64) -> SentimentClass {
        if score >= self.positive {
            SentimentClass::Positive
        } else if score <= self.negative {
            SentimentClass::Negative
        } else {
            SentimentClass::Neutral
        }
    }

    pub fn label(&self, score: f64) -> &str {
        match self.classify(score) {
            SentimentClass::Positive => "positive",
            SentimentClass::Negative => "negative",
            SentimentClass::Neutral => &self.neutral_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_loads() {
        assert!(!LEXICON.is_empty());
    }

    #[test]
    fn polarity_direction() {
        let s = LexiconScorer::new();
        assert!(s.score("What a great win for the community") > 0.05);
        assert!(s.score("This is a corrupt and terrible policy") < -0.05);
        assert_eq!(s.score(""), 0.0);
        assert_eq!(s.score("the ballot closes at six"), 0.0);
    }

    #[test]
    fn negation_flips_sign() {
        let s = LexiconScorer::new();
        assert!(s.score("good") > 0.0);
        assert!(s.score("not good") < 0.0);
    }

    #[test]
    fn scores_stay_in_range() {
        let s = LexiconScorer::new();
        let long = "great ".repeat(500);
        let v = s.score(&long);
        assert!(v <= 1.0 && v > 0.9);
    }

    #[test]
    fn thresholds_are_inclusive_on_the_outside() {
        let t = SentimentThresholds::default();
        assert_eq!(t.label(0.05), "positive");
        assert_eq!(t.label(0.0), "neutral");
        assert_eq!(t.label(-0.05), "negative");
        assert_eq!(t.label(0.049), "neutral");

        let medium = SentimentThresholds {
            neutral_label: "medium".into(),
            ..SentimentThresholds::default()
        };
        assert_eq!(medium.label(0.01), "medium");
    }
}
