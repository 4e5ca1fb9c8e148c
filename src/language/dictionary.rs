//! Token dictionary shared with the corpus collaborator
//!
//! An immutable bijection between vocabulary words and integer indices.
//! The corpus collaborator owns construction (frequency cutoffs, corpus
//! scans); the core only reads. Special tokens occupy fixed slots at the
//! front of the table.

use std::collections::HashMap;

/// Padding token, appended to short sentences
pub const PAD: &str = "<pad>";
/// Start-of-utterance token, injected (never sampled) at position 0
pub const START: &str = "<s>";
/// Out-of-vocabulary fallback
pub const UNK: &str = "<unk>";

/// Immutable word-to-index bijection with fixed special tokens
#[derive(Debug, Clone)]
pub struct Dictionary {
    words: Vec<String>,
    indices: HashMap<String, i64>,
}

impl Dictionary {
    /// Build a dictionary from an externally supplied word list
    ///
    /// Special tokens are inserted first; duplicates in the input are
    /// ignored.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dictionary = Self { words: Vec::new(), indices: HashMap::new() };
        for special in [PAD, START, UNK] {
            dictionary.insert(special);
        }
        for word in words {
            dictionary.insert(&word.into());
        }
        dictionary
    }

    fn insert(&mut self, word: &str) {
        if !self.indices.contains_key(word) {
            self.indices.insert(word.to_string(), self.words.len() as i64);
            self.words.push(word.to_string());
        }
    }

    /// Vocabulary size, special tokens included
    pub fn len(&self) -> i64 {
        self.words.len() as i64
    }

    /// True when the dictionary holds only special tokens
    pub fn is_empty(&self) -> bool {
        self.words.len() == 3
    }

    /// Index of `<pad>`
    pub fn pad_index(&self) -> i64 {
        self.indices[PAD]
    }

    /// Index of the start-of-utterance token
    pub fn start_index(&self) -> i64 {
        self.indices[START]
    }

    /// Look up a word, falling back to `<unk>` for out-of-vocabulary input
    pub fn index(&self, word: &str) -> i64 {
        self.indices.get(word).copied().unwrap_or(self.indices[UNK])
    }

    /// Word at an index; out-of-range indices are a programming error
    pub fn word(&self, index: i64) -> &str {
        &self.words[index as usize]
    }

    /// Encode a whitespace-separated sentence
    pub fn encode(&self, sentence: &str) -> Vec<i64> {
        sentence.split_whitespace().map(|word| self.index(word)).collect()
    }

    /// Encode to exactly `max_len` tokens
    ///
    /// Shorter sentences are padded with `<pad>`, longer ones truncated.
    /// Length mismatch is handled here, never treated as an error.
    pub fn encode_padded(&self, sentence: &str, max_len: usize) -> Vec<i64> {
        let mut tokens = self.encode(sentence);
        tokens.truncate(max_len);
        tokens.resize(max_len, self.pad_index());
        tokens
    }

    /// Decode a token sequence back to a sentence, dropping padding
    pub fn decode(&self, tokens: &[i64]) -> String {
        let pad = self.pad_index();
        tokens
            .iter()
            .filter(|&&token| token != pad)
            .map(|&token| self.word(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
