//! Deterministic tokenizer shared by indexing and querying.
//!
//! Lowercases (locale-agnostic ASCII fold), splits on any maximal run of
//! non-word characters — anything other than ASCII letters, digits, and
//! underscore — and discards empty pieces. Uses a zero-per-token allocation
//! design via byte spans into a single lowercased buffer.

/// Tokenized text: owns the lowercased buffer, provides `&str` slices via byte spans.
/// Only 1 heap allocation (the lowercased String) instead of N per-token Strings.
pub struct Tokens {
    buffer: String,
    spans: Vec<(u32, u32)>, // (start, end) byte offsets into buffer
}

impl Tokens {
    /// Returns an iterator over the token `&str` slices.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.spans
            .iter()
            .map(|&(s, e)| &self.buffer[s as usize..e as usize])
    }

    /// Returns the number of tokens.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns `true` if there are no tokens.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize text: ASCII-lowercase, split on runs of non-word characters.
///
/// The same function is applied to indexed field values and to query text,
/// so `"HELLO-world"` and `"Hello, World!"` produce the same tokens.
pub fn tokenize(text: &str) -> Tokens {
    let buffer = text.to_ascii_lowercase();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in buffer.char_indices() {
        if is_word_char(c) {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            spans.push((s as u32, i as u32));
        }
    }
    // Last token has no trailing separator
    if let Some(s) = start {
        spans.push((s as u32, buffer.len() as u32));
    }

    Tokens { buffer, spans }
}
