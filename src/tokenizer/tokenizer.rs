use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use stop_words::{get, LANGUAGE};
use unicode_segmentation::UnicodeSegmentation;

use tracing::warn;

use crate::config::AnalyzerConfig;

/// Stemming algorithm and stopword list for a language name
fn language_support(name: &str) -> Option<(Algorithm, LANGUAGE)> {
    let pair = match name.to_lowercase().as_str() {
        "english" | "en" => (Algorithm::English, LANGUAGE::English),
        "french" | "fr" => (Algorithm::French, LANGUAGE::French),
        "german" | "de" => (Algorithm::German, LANGUAGE::German),
        "spanish" | "es" => (Algorithm::Spanish, LANGUAGE::Spanish),
        "italian" | "it" => (Algorithm::Italian, LANGUAGE::Italian),
        "portuguese" | "pt" => (Algorithm::Portuguese, LANGUAGE::Portuguese),
        "dutch" | "nl" => (Algorithm::Dutch, LANGUAGE::Dutch),
        "swedish" | "sv" => (Algorithm::Swedish, LANGUAGE::Swedish),
        _ => return None,
    };
    Some(pair)
}

/// Turns field text into index terms.
///
/// Indexing requests may carry their own analyzer; otherwise the index
/// default is used. Implementations must be deterministic so that query
/// terms analyzed later match the indexed terms.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<String>;

    /// Analyze a single query word, returning its index term if it survives
    fn analyze_term(&self, word: &str) -> Option<String> {
        self.analyze(word).into_iter().next()
    }
}

/// Shared analyzer handle
pub type SharedAnalyzer = Arc<dyn Analyzer>;

/// Unicode word tokenizer with optional stopword removal and stemming
pub struct Tokenizer {
    config: AnalyzerConfig,
    stemmer: Option<Stemmer>,
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Unknown languages fall back to English
    pub fn new(config: &AnalyzerConfig) -> Self {
        let (algorithm, stop_language) = language_support(&config.language).unwrap_or_else(|| {
            warn!(language = %config.language, "unsupported analyzer language, using english");
            (Algorithm::English, LANGUAGE::English)
        });
        let stemmer = config.stem.then(|| Stemmer::create(algorithm));
        let stopwords = if config.remove_stopwords {
            get(stop_language)
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect()
        } else {
            HashSet::new()
        };

        Self {
            config: config.clone(),
            stemmer,
            stopwords,
        }
    }

    pub fn shared(config: &AnalyzerConfig) -> SharedAnalyzer {
        Arc::new(Self::new(config))
    }

    /// Whether `language` has its own stemmer and stopword list
    pub fn supports_language(language: &str) -> bool {
        language_support(language).is_some()
    }

    /// Split `text` into index terms, in order of appearance
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .filter_map(|word| self.term(word))
            .collect()
    }

    fn term(&self, word: &str) -> Option<String> {
        let word = if self.config.lowercase {
            word.to_lowercase()
        } else {
            word.to_string()
        };
        let len = word.chars().count();
        if len < self.config.min_token_length
            || len > self.config.max_token_length
            || self.stopwords.contains(&word)
        {
            return None;
        }
        Some(match &self.stemmer {
            Some(stemmer) => stemmer.stem(&word).into_owned(),
            None => word,
        })
    }
}

impl Analyzer for Tokenizer {
    fn analyze(&self, text: &str) -> Vec<String> {
        self.tokenize(text)
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("config", &self.config)
            .field("stopwords", &self.stopwords.len())
            .finish()
    }
}

/// Splits on whitespace without any normalization
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}
