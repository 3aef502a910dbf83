use serde::{Deserialize, Serialize};

/// Dense identifier for a document, assigned in corpus order before sharding
pub type DocId = u32;

/// Zero-based word offset of a term occurrence inside a document
pub type Position = u32;

/// All occurrences of one term in one document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Posting {
    pub doc_id: DocId,
    /// Strictly increasing
    pub positions: Vec<Position>,
}

impl Posting {
    pub fn new(doc_id: DocId, positions: Vec<Position>) -> Self {
        Self { doc_id, positions }
    }
}

/// Postings for one term, sorted by ascending doc id without duplicates
pub type PostingsList = Vec<Posting>;

/// Check the postings list invariant: strictly increasing doc ids and positions
pub fn is_well_formed(list: &[Posting]) -> bool {
    list.windows(2).all(|w| w[0].doc_id < w[1].doc_id)
        && list
            .iter()
            .all(|p| !p.positions.is_empty() && p.positions.windows(2).all(|w| w[0] < w[1]))
}

/// Merge postings for one term gathered from several segments.
///
/// Lists are concatenated and sorted by doc id. A document split across
/// shards or spills appears more than once; its position lists are merged.
pub fn merge_postings(mut lists: Vec<PostingsList>) -> PostingsList {
    if lists.len() == 1 {
        return lists.pop().unwrap_or_default();
    }

    let mut all: Vec<Posting> = lists.into_iter().flatten().collect();
    all.sort_by_key(|p| p.doc_id);

    let mut merged: PostingsList = Vec::with_capacity(all.len());
    for posting in all {
        match merged.last_mut() {
            Some(last) if last.doc_id == posting.doc_id => {
                last.positions.extend(posting.positions);
                last.positions.sort_unstable();
                last.positions.dedup();
            }
            _ => merged.push(posting),
        }
    }
    merged
}

/// Which failure of a corrupt segment record should cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorruptSegmentPolicy {
    /// Log, drop the segment's remaining records, continue the merge
    #[default]
    Skip,
    /// Fail the whole build
    Abort,
}

/// Location of a term's postings inside the postings block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingsRef {
    /// Byte offset relative to the start of the postings block
    pub offset: u64,
    pub length: u64,
}

/// Magic bytes of the final index file
pub const INDEX_MAGIC: &[u8; 8] = b"LXDXIDX1";
/// Magic bytes of a segment file
pub const SEGMENT_MAGIC: &[u8; 8] = b"LXDXSEG1";
pub const FORMAT_VERSION: u32 = 1;
