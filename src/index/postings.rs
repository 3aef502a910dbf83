//! Postings block encoding.
//!
//! Layout of one term's block:
//!
//! ```text
//! doc_count:varint
//! skip_count x (prev_doc_delta:varint, data_offset_delta:varint)
//! doc_count  x (doc_delta:varint, position_count:varint, position_delta:varint*)
//! ```
//!
//! Doc ids are gaps from the previous doc id (the first from 0). Positions are
//! gaps from the previous position in the same document (the first from 0).
//!
//! The skip interval is not stored in the block; the index header carries
//! it. With interval `k > 0` a list of `n` postings has
//! `skip_count = (n - 1) / k` entries, so lists of at most `k` postings (and
//! every list when `k == 0`) are just the count and the doc entries. Skip
//! entry `j` points at posting `(j + 1) * k`: it stores the doc id of the
//! posting just before that block and the block's byte offset inside the
//! data area.

use crate::index::types::{DocId, Position, Posting, PostingsList};
use crate::utils::encoding::{ByteCursor, DecodeError, encode_varint, encode_varint_u64};

pub const DEFAULT_SKIP_INTERVAL: usize = 64;

/// Encodes postings lists; `skip_interval == 0` disables the skip table
#[derive(Debug, Clone, Copy)]
pub struct PostingsEncoder {
    skip_interval: usize,
}

impl Default for PostingsEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_INTERVAL)
    }
}

impl PostingsEncoder {
    pub fn new(skip_interval: usize) -> Self {
        Self { skip_interval }
    }

    /// Encoder for segment records, which are always read sequentially
    pub fn without_skips() -> Self {
        Self::new(0)
    }

    /// Append the encoded form of `list` to `out`
    pub fn encode(&self, list: &[Posting], out: &mut Vec<u8>) {
        let mut data = Vec::with_capacity(list.len() * 4);
        let mut skips: Vec<(DocId, usize)> = Vec::new();
        let mut prev_doc: DocId = 0;

        for (i, posting) in list.iter().enumerate() {
            if self.skip_interval > 0 && i > 0 && i % self.skip_interval == 0 {
                skips.push((prev_doc, data.len()));
            }

            encode_varint(posting.doc_id - prev_doc, &mut data);
            encode_varint(posting.positions.len() as u32, &mut data);
            let mut prev_pos: Position = 0;
            for &pos in &posting.positions {
                encode_varint(pos - prev_pos, &mut data);
                prev_pos = pos;
            }
            prev_doc = posting.doc_id;
        }

        encode_varint(list.len() as u32, out);
        let (mut last_doc, mut last_offset) = (0u32, 0usize);
        for &(doc, offset) in &skips {
            encode_varint(doc - last_doc, out);
            encode_varint_u64((offset - last_offset) as u64, out);
            last_doc = doc;
            last_offset = offset;
        }
        out.extend_from_slice(&data);
    }

    pub fn encode_to_vec(&self, list: &[Posting]) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(list, &mut out);
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct SkipEntry {
    prev_doc: DocId,
    offset: usize,
}

/// Lazy, document-at-a-time decoder over one term's postings block.
///
/// The cursor starts before the first document. Positions of the current
/// document are only decoded when [`PostingsCursor::positions`] is called.
#[derive(Debug, Clone)]
pub struct PostingsCursor<'a> {
    data: &'a [u8],
    cursor: ByteCursor<'a>,
    skips: Vec<SkipEntry>,
    skip_interval: usize,
    doc_count: u32,
    /// Number of postings whose headers have been decoded
    read: u32,
    prev_doc: DocId,
    current: Option<DocId>,
    /// Start of the current document's position deltas
    positions_at: ByteCursor<'a>,
    position_count: u32,
    /// Position varints of the current document not yet stepped over
    pending: u32,
}

impl<'a> PostingsCursor<'a> {
    /// Open a block written with `skip_interval` (0 when it has no skips)
    pub fn new(block: &'a [u8], skip_interval: usize) -> Result<Self, DecodeError> {
        let mut header = ByteCursor::new(block);
        let doc_count = header.read_varint()?;
        let skip_count = skip_count(doc_count, skip_interval);

        let mut skips = Vec::with_capacity(skip_count.min(block.len()));
        let (mut doc, mut offset) = (0u32, 0usize);
        for _ in 0..skip_count {
            doc = doc
                .checked_add(header.read_varint()?)
                .ok_or(DecodeError {
                    offset: header.position(),
                    what: "skip doc id overflow",
                })?;
            offset = usize::try_from(header.read_varint_u64()?)
                .ok()
                .and_then(|delta| offset.checked_add(delta))
                .ok_or(DecodeError {
                    offset: header.position(),
                    what: "skip offset overflow",
                })?;
            skips.push(SkipEntry {
                prev_doc: doc,
                offset,
            });
        }

        let data = header.remaining();
        if skips.last().is_some_and(|s| s.offset >= data.len()) {
            return Err(DecodeError {
                offset: header.position(),
                what: "skip offset past end of block",
            });
        }

        let cursor = ByteCursor::new(data);
        Ok(Self {
            data,
            cursor,
            skips,
            skip_interval,
            doc_count,
            read: 0,
            prev_doc: 0,
            current: None,
            positions_at: cursor,
            position_count: 0,
            pending: 0,
        })
    }

    /// Number of documents in the list
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Current document, `None` before the first `advance` or when exhausted
    pub fn doc(&self) -> Option<DocId> {
        self.current
    }

    fn corrupt(&self, what: &'static str) -> DecodeError {
        DecodeError {
            offset: self.cursor.position(),
            what,
        }
    }

    /// Move to the next document
    pub fn advance(&mut self) -> Result<Option<DocId>, DecodeError> {
        for _ in 0..self.pending {
            self.cursor.skip_varint()?;
        }
        self.pending = 0;

        if self.read >= self.doc_count {
            self.current = None;
            return Ok(None);
        }

        let delta = self.cursor.read_varint()?;
        if self.read > 0 && delta == 0 {
            return Err(self.corrupt("non-increasing doc id"));
        }
        let doc = self
            .prev_doc
            .checked_add(delta)
            .ok_or_else(|| self.corrupt("doc id overflow"))?;
        let count = self.cursor.read_varint()?;
        if count == 0 {
            return Err(self.corrupt("document without positions"));
        }

        self.positions_at = self.cursor;
        self.position_count = count;
        self.pending = count;
        self.prev_doc = doc;
        self.read += 1;
        self.current = Some(doc);
        Ok(Some(doc))
    }

    /// Move to the first document `>= target`, using the skip table to jump
    /// over blocks that end before it
    pub fn seek(&mut self, target: DocId) -> Result<Option<DocId>, DecodeError> {
        if let Some(doc) = self.current {
            if doc >= target {
                return Ok(Some(doc));
            }
        }

        // Last block that starts after what we've read and whose preceding doc is still below target
        let mut jump = None;
        for (j, skip) in self.skips.iter().enumerate() {
            let start = (j + 1) * self.skip_interval;
            if skip.prev_doc >= target {
                break;
            }
            if start >= self.read as usize {
                jump = Some((start, *skip));
            }
        }
        if let Some((start, skip)) = jump {
            self.cursor = ByteCursor::at(self.data, skip.offset);
            self.prev_doc = skip.prev_doc;
            self.read = start as u32;
            self.pending = 0;
            self.current = None;
        }

        while let Some(doc) = self.advance()? {
            if doc >= target {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Decode the positions of the current document
    pub fn positions(&self) -> Result<Vec<Position>, DecodeError> {
        if self.current.is_none() {
            return Ok(Vec::new());
        }
        let mut cursor = self.positions_at;
        let mut positions = Vec::with_capacity(self.position_count as usize);
        let mut prev: Position = 0;
        for i in 0..self.position_count {
            let delta = cursor.read_varint()?;
            if i > 0 && delta == 0 {
                return Err(DecodeError {
                    offset: cursor.position(),
                    what: "non-increasing position",
                });
            }
            prev = prev.checked_add(delta).ok_or(DecodeError {
                offset: cursor.position(),
                what: "position overflow",
            })?;
            positions.push(prev);
        }
        Ok(positions)
    }

    /// Decode every remaining document id
    pub fn collect_docs(mut self) -> Result<Vec<DocId>, DecodeError> {
        let mut docs = Vec::with_capacity(self.doc_count.saturating_sub(self.read) as usize);
        while let Some(doc) = self.advance()? {
            docs.push(doc);
        }
        Ok(docs)
    }
}

/// Number of skip entries in a block of `doc_count` postings
pub fn skip_count(doc_count: u32, skip_interval: usize) -> usize {
    if skip_interval == 0 || doc_count == 0 {
        0
    } else {
        (doc_count as usize - 1) / skip_interval
    }
}

/// Fully decode a postings block written with `skip_interval`
pub fn decode_postings(block: &[u8], skip_interval: usize) -> Result<PostingsList, DecodeError> {
    let mut cursor = PostingsCursor::new(block, skip_interval)?;
    let mut list = Vec::with_capacity(cursor.doc_count() as usize);
    while let Some(doc_id) = cursor.advance()? {
        list.push(Posting::new(doc_id, cursor.positions()?));
    }
    Ok(list)
}
