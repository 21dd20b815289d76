//! Word matching.
//!
//! Words are maximal runs of alphanumeric characters (plus `'`), compared
//! case-insensitively. A blocked word only matches whole words, so
//! blocking "ass" does not block "class".

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Plugin settings, as stored in the server's configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Words that cause a post to be rejected.
    pub blocked_words: Vec<String>,
    /// Words rewritten to another word. Matching keeps the rest of the
    /// message untouched.
    pub replacements: BTreeMap<String, String>,
    /// Rejection text shown to the author. `{word}` is replaced with the
    /// offending word.
    pub rejection_message: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blocked_words: Vec::new(),
            replacements: BTreeMap::new(),
            rejection_message: "Your message contains a blocked word: {word}".to_string(),
        }
    }
}

/// Outcome of checking one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to do.
    Allow,
    /// The message with replacements applied.
    Rewrite(String),
    /// A blocked word was found; carries the rejection text.
    Block(String),
}

/// Compiled filter.
#[derive(Debug, Clone, Default)]
pub struct WordFilter {
    blocked: HashSet<String>,
    replacements: BTreeMap<String, String>,
    rejection_message: String,
}

impl WordFilter {
    /// Compiles a configuration.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            blocked: config
                .blocked_words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            replacements: config
                .replacements
                .iter()
                .map(|(from, to)| (from.to_lowercase(), to.clone()))
                .collect(),
            rejection_message: config.rejection_message.clone(),
        }
    }

    /// Whether the filter would never change or block anything.
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty() && self.replacements.is_empty()
    }

    /// Checks a message. Blocking wins over rewriting.
    pub fn check(&self, message: &str) -> Verdict {
        if self.is_empty() {
            return Verdict::Allow;
        }

        let mut rewritten = String::with_capacity(message.len());
        let mut changed = false;
        for (is_word, piece) in Segments::new(message) {
            if !is_word {
                rewritten.push_str(piece);
                continue;
            }
            let lower = piece.to_lowercase();
            if self.blocked.contains(&lower) {
                return Verdict::Block(self.rejection_message.replace("{word}", piece));
            }
            match self.replacements.get(&lower) {
                Some(replacement) => {
                    rewritten.push_str(replacement);
                    changed = true;
                }
                None => rewritten.push_str(piece),
            }
        }

        if changed {
            Verdict::Rewrite(rewritten)
        } else {
            Verdict::Allow
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

/// Splits text into alternating word / non-word slices.
struct Segments<'a> {
    rest: &'a str,
}

impl<'a> Segments<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = (bool, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.chars().next()?;
        let is_word = is_word_char(first);
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| is_word_char(*c) != is_word)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (piece, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some((is_word, piece))
    }
}
