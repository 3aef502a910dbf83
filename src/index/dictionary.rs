//! Front-coded term dictionary.
//!
//! Each entry stores how many leading bytes it shares with the previous term,
//! the remaining suffix bytes terminated by `0x00`, and the location of the
//! term's postings:
//!
//! ```text
//! shared_prefix_len:varint  suffix  0x00  postings_offset:varint  postings_length:varint
//! ```
//!
//! Every `restart_interval`-th entry is a restart point that shares nothing
//! with its predecessor, so lookups can binary search the restart points and
//! scan a single block.

use crate::index::types::PostingsRef;
use crate::utils::encoding::{ByteCursor, DecodeError, encode_varint, encode_varint_u64};
use std::cmp::Ordering;
use std::io::{self, Write};

pub const DEFAULT_RESTART_INTERVAL: usize = 32;

/// One decoded dictionary entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictEntry {
    pub term: String,
    pub postings: PostingsRef,
}

/// Summary of an encoded dictionary block
#[derive(Debug, Clone, Default)]
pub struct DictionaryStats {
    pub term_count: u64,
    pub bytes: u64,
    /// Byte offsets of restart entries, relative to the block start
    pub restarts: Vec<u64>,
}

/// Streams sorted terms into a front-coded block
pub struct DictionaryEncoder<W: Write> {
    out: W,
    restart_interval: usize,
    prev: Vec<u8>,
    buf: Vec<u8>,
    stats: DictionaryStats,
}

impl<W: Write> DictionaryEncoder<W> {
    pub fn new(out: W, restart_interval: usize) -> Self {
        Self {
            out,
            restart_interval: restart_interval.max(1),
            prev: Vec::new(),
            buf: Vec::with_capacity(256),
            stats: DictionaryStats::default(),
        }
    }

    /// Append the next term. Terms must arrive in strictly increasing byte order.
    pub fn push(&mut self, term: &str, postings: PostingsRef) -> io::Result<()> {
        let bytes = term.as_bytes();
        if bytes.is_empty() || bytes.contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("term {:?} cannot be stored in the dictionary", term),
            ));
        }
        if self.stats.term_count > 0 && bytes <= self.prev.as_slice() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("term {:?} is out of order", term),
            ));
        }

        let restart = self.stats.term_count % self.restart_interval as u64 == 0;
        let shared = if restart {
            self.stats.restarts.push(self.stats.bytes);
            0
        } else {
            common_prefix_len(&self.prev, bytes)
        };

        self.buf.clear();
        encode_varint(shared as u32, &mut self.buf);
        self.buf.extend_from_slice(&bytes[shared..]);
        self.buf.push(0);
        encode_varint_u64(postings.offset, &mut self.buf);
        encode_varint_u64(postings.length, &mut self.buf);
        self.out.write_all(&self.buf)?;

        self.stats.bytes += self.buf.len() as u64;
        self.stats.term_count += 1;
        self.prev.clear();
        self.prev.extend_from_slice(bytes);
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<(W, DictionaryStats)> {
        self.out.flush()?;
        Ok((self.out, self.stats))
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Read-only view of an encoded dictionary block and its restart table
#[derive(Debug, Clone, Copy)]
pub struct DictionaryBlock<'a> {
    block: &'a [u8],
    /// Little-endian u64 offsets, one per restart point
    restarts: &'a [u8],
    term_count: u64,
}

impl<'a> DictionaryBlock<'a> {
    pub fn new(block: &'a [u8], restarts: &'a [u8], term_count: u64) -> Result<Self, DecodeError> {
        if restarts.len() % 8 != 0 {
            return Err(DecodeError {
                offset: 0,
                what: "restart table size is not a multiple of 8",
            });
        }
        let dict = Self {
            block,
            restarts,
            term_count,
        };
        for i in 0..dict.restart_count() {
            if dict.restart_offset(i) as usize >= block.len() {
                return Err(DecodeError {
                    offset: i * 8,
                    what: "restart offset past end of dictionary",
                });
            }
        }
        if term_count > 0 && dict.restart_count() == 0 {
            return Err(DecodeError {
                offset: 0,
                what: "missing restart table",
            });
        }
        Ok(dict)
    }

    /// View over a block whose restart table already passed [`DictionaryBlock::new`]
    pub(crate) fn validated(block: &'a [u8], restarts: &'a [u8], term_count: u64) -> Self {
        Self {
            block,
            restarts,
            term_count,
        }
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    fn restart_count(&self) -> usize {
        self.restarts.len() / 8
    }

    fn restart_offset(&self, i: usize) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&self.restarts[i * 8..i * 8 + 8]);
        u64::from_le_bytes(arr)
    }

    /// Decode the full term stored at a restart point
    fn restart_term(&self, i: usize) -> Result<&'a [u8], DecodeError> {
        let mut cursor = ByteCursor::at(self.block, self.restart_offset(i) as usize);
        if cursor.read_varint()? != 0 {
            return Err(DecodeError {
                offset: cursor.position(),
                what: "restart entry shares a prefix",
            });
        }
        cursor.read_until_nul()
    }

    /// Iterate over every entry in order
    pub fn iter(&self) -> DictionaryIter<'a> {
        DictionaryIter::new(ByteCursor::new(self.block))
    }

    /// Index of the last restart block whose first term is `<= key`
    fn restart_block_for(&self, key: &[u8]) -> Result<Option<usize>, DecodeError> {
        let (mut lo, mut hi) = (0, self.restart_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.restart_term(mid)? <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo.checked_sub(1))
    }

    /// Exact-match lookup. `Ok(None)` means the term is not in the dictionary.
    pub fn lookup(&self, term: &str) -> Result<Option<PostingsRef>, DecodeError> {
        let key = term.as_bytes();
        let Some(block) = self.restart_block_for(key)? else {
            return Ok(None);
        };

        let start = self.restart_offset(block) as usize;
        let end = if block + 1 < self.restart_count() {
            self.restart_offset(block + 1) as usize
        } else {
            self.block.len()
        };

        let mut iter = DictionaryIter::new(ByteCursor::at(&self.block[..end], start));
        while let Some(entry) = iter.next_raw()? {
            match entry.0.as_slice().cmp(key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(entry.1)),
                Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Iterate over entries whose term starts with `prefix`
    pub fn prefix_iter(
        self,
        prefix: &str,
    ) -> Result<impl Iterator<Item = Result<DictEntry, DecodeError>> + use<'a>, DecodeError> {
        let start = match self.restart_block_for(prefix.as_bytes())? {
            Some(block) => self.restart_offset(block) as usize,
            None => 0,
        };
        let mut iter = DictionaryIter::new(ByteCursor::at(self.block, start));
        iter.validate_order = false;
        let prefix = prefix.to_string();
        Ok(iter
            .skip_while({
                let prefix = prefix.clone();
                move |e| matches!(e, Ok(entry) if entry.term.as_str() < prefix.as_str())
            })
            .take_while(move |e| match e {
                Ok(entry) => entry.term.starts_with(&prefix),
                Err(_) => true,
            }))
    }
}

/// Sequential decoder over a dictionary block
pub struct DictionaryIter<'a> {
    cursor: ByteCursor<'a>,
    prev: Vec<u8>,
    validate_order: bool,
    failed: bool,
}

impl<'a> DictionaryIter<'a> {
    fn new(cursor: ByteCursor<'a>) -> Self {
        Self {
            cursor,
            prev: Vec::new(),
            validate_order: true,
            failed: false,
        }
    }

    /// Decode the next entry, returning the raw term bytes
    fn next_raw(&mut self) -> Result<Option<(Vec<u8>, PostingsRef)>, DecodeError> {
        if self.cursor.is_empty() {
            return Ok(None);
        }
        let at = self.cursor.position();
        let shared = self.cursor.read_varint()? as usize;
        if shared > self.prev.len() {
            return Err(DecodeError {
                offset: at,
                what: "shared prefix longer than previous term",
            });
        }
        let suffix = self.cursor.read_until_nul()?;
        let offset = self.cursor.read_varint_u64()?;
        let length = self.cursor.read_varint_u64()?;

        let mut term = Vec::with_capacity(shared + suffix.len());
        term.extend_from_slice(&self.prev[..shared]);
        term.extend_from_slice(suffix);
        if term.is_empty() || (self.validate_order && !self.prev.is_empty() && term <= self.prev) {
            return Err(DecodeError {
                offset: at,
                what: "dictionary terms out of order",
            });
        }

        self.prev.clear();
        self.prev.extend_from_slice(&term);
        Ok(Some((term, PostingsRef { offset, length })))
    }
}

impl Iterator for DictionaryIter<'_> {
    type Item = Result<DictEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.next_raw().and_then(|entry| {
            entry
                .map(|(term, postings)| {
                    String::from_utf8(term)
                        .map(|term| DictEntry { term, postings })
                        .map_err(|_| DecodeError {
                            offset: self.cursor.position(),
                            what: "term is not valid UTF-8",
                        })
                })
                .transpose()
        });
        match result {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(terms: &[&str], interval: usize) -> (Vec<u8>, Vec<u8>, u64) {
        let mut encoder = DictionaryEncoder::new(Vec::new(), interval);
        for (i, term) in terms.iter().enumerate() {
            encoder
                .push(
                    term,
                    PostingsRef {
                        offset: i as u64 * 10,
                        length: 10,
                    },
                )
                .unwrap();
        }
        let (block, stats) = encoder.finish().unwrap();
        let restarts = stats.restarts.iter().flat_map(|o| o.to_le_bytes()).collect();
        (block, restarts, stats.term_count)
    }

    const TERMS: &[&str] = &[
        "and", "android", "andromeda", "ant", "anthem", "brother", "father", "hea", "heaven",
        "hell", "hello", "sister", "straße", "strasse", "zebra",
    ];

    fn sorted_terms() -> Vec<&'static str> {
        let mut terms = TERMS.to_vec();
        terms.sort();
        terms
    }

    #[test]
    fn test_front_coding_bytes() {
        let (block, _, _) = encode(&["hell", "hello"], 32);
        // "hell": restart, full suffix
        assert_eq!(&block[..6], &[0, b'h', b'e', b'l', b'l', 0]);
        // "hello": shares 4 bytes, stores "o"
        assert_eq!(&block[8..11], &[4, b'o', 0]);
    }

    #[test]
    fn test_sequential_decode_reproduces_terms() {
        let terms = sorted_terms();
        for interval in [1, 3, 32] {
            let (block, restarts, count) = encode(&terms, interval);
            let dict = DictionaryBlock::new(&block, &restarts, count).unwrap();
            let decoded: Vec<String> = dict.iter().map(|e| e.unwrap().term).collect();
            assert_eq!(decoded, terms);
        }
    }

    #[test]
    fn test_lookup_found_and_missing() {
        let terms = sorted_terms();
        let (block, restarts, count) = encode(&terms, 4);
        let dict = DictionaryBlock::new(&block, &restarts, count).unwrap();

        for (i, term) in terms.iter().enumerate() {
            let found = dict.lookup(term).unwrap().unwrap();
            assert_eq!(found.offset, i as u64 * 10);
        }
        for missing in ["", "a", "andr", "hel", "helloo", "zzz", "ánd"] {
            assert_eq!(dict.lookup(missing).unwrap(), None, "{}", missing);
        }
    }

    #[test]
    fn test_prefix_iter() {
        let terms = sorted_terms();
        let (block, restarts, count) = encode(&terms, 2);
        let dict = DictionaryBlock::new(&block, &restarts, count).unwrap();
        let found: Vec<String> = dict
            .prefix_iter("he")
            .unwrap()
            .map(|e| e.unwrap().term)
            .collect();
        assert_eq!(found, vec!["hea", "heaven", "hell", "hello"]);
        assert_eq!(dict.prefix_iter("q").unwrap().count(), 0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut encoder = DictionaryEncoder::new(Vec::new(), 32);
        let r = PostingsRef { offset: 0, length: 0 };
        encoder.push("b", r).unwrap();
        assert!(encoder.push("a", r).is_err());
        assert!(encoder.push("b", r).is_err());
    }

    #[test]
    fn test_empty_dictionary() {
        let dict = DictionaryBlock::new(&[], &[], 0).unwrap();
        assert_eq!(dict.lookup("x").unwrap(), None);
        assert_eq!(dict.iter().count(), 0);
    }

    #[test]
    fn test_corrupt_block_detected() {
        let (mut block, restarts, count) = encode(&["alpha", "beta"], 32);
        let last = block.len() - 1;
        block[last] |= 0x80; // dangling continuation bit
        let dict = DictionaryBlock::new(&block, &restarts, count).unwrap();
        assert!(dict.iter().any(|e| e.is_err()));
    }
}
