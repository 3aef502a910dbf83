use crate::index::types::Position;

/// Maximum term length to store in the index.
/// Longer words are likely encoded blobs; they still occupy a position.
pub const MAX_TERM_BYTES: usize = 128;

/// Lazy tokenizer over a byte region.
///
/// Words are maximal runs of alphanumeric characters. An apostrophe is kept
/// only between two alphanumerics (`don't`). Output is lowercased and carries
/// the word offset, starting at `base`.
pub struct Tokenizer<'a> {
    text: &'a [u8],
    pos: usize,
    next_position: Position,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a [u8]) -> Self {
        Self::with_base(text, 0)
    }

    /// Start numbering positions at `base` (for a document continued from a previous shard piece)
    pub fn with_base(text: &'a [u8], base: Position) -> Self {
        Self {
            text,
            pos: 0,
            next_position: base,
        }
    }

    fn peek_char(&self) -> Option<char> {
        if self.pos < self.text.len() {
            decode_char(&self.text[self.pos..]).0
        } else {
            None
        }
    }

    /// Find the byte span of the next word, advancing past it
    fn next_span(&mut self) -> Option<(usize, usize)> {
        let mut start = None;
        let mut end = self.pos;

        while self.pos < self.text.len() {
            let (ch, len) = decode_char(&self.text[self.pos..]);
            let at = self.pos;
            self.pos += len;

            match ch {
                Some(c) if c.is_alphanumeric() => {
                    if start.is_none() {
                        start = Some(at);
                    }
                    end = self.pos;
                }
                Some('\'') if start.is_some() && end == at => {
                    // Keep only if the next char continues the word
                    match self.peek_char() {
                        Some(next) if next.is_alphanumeric() => end = self.pos,
                        _ => break,
                    }
                }
                _ => {
                    if start.is_some() {
                        break;
                    }
                }
            }
        }

        start.map(|s| (s, end))
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = (String, Position);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (start, end) = self.next_span()?;
            let position = self.next_position;
            self.next_position += 1;

            // Spans only cover chars decoded successfully, so this is valid UTF-8
            let word = match std::str::from_utf8(&self.text[start..end]) {
                Ok(w) => w,
                Err(_) => continue,
            };
            let term = normalize(word);
            if term.len() > MAX_TERM_BYTES {
                continue;
            }
            return Some((term, position));
        }
    }
}

/// Lowercase a word the way indexed terms are stored
pub fn normalize(word: &str) -> String {
    if word.is_ascii() {
        word.to_ascii_lowercase()
    } else {
        word.to_lowercase()
    }
}

/// Count the words in a region without allocating terms
pub fn count_words(text: &[u8]) -> u32 {
    let mut tokenizer = Tokenizer::new(text);
    let mut count = 0;
    while tokenizer.next_span().is_some() {
        count += 1;
    }
    count
}

/// Decode one char; invalid bytes yield `None` and are consumed one at a time
#[inline]
fn decode_char(bytes: &[u8]) -> (Option<char>, usize) {
    let first = bytes[0];
    if first < 0x80 {
        return (Some(first as char), 1);
    }
    let len = match first {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return (None, 1),
    };
    match bytes.get(..len).and_then(|b| std::str::from_utf8(b).ok()) {
        Some(s) => (s.chars().next(), len),
        None => (None, 1),
    }
}
