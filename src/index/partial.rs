//! Per-shard in-memory inversion with spilling.

use crate::error::{LexdexError, Result};
use crate::index::corpus::{Corpus, Shard};
use crate::index::segment::{SegmentInfo, write_segment};
use crate::index::types::{DocId, Position, Posting, PostingsList};
use crate::utils::tokenizer::Tokenizer;
use ahash::AHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

// Rough heap cost of arena entries
const TERM_OVERHEAD: u64 = 64;
const POSTING_OVERHEAD: u64 = 32;
const POSITION_BYTES: u64 = 4;

/// Shared cancellation flag for a running build
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(LexdexError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// What one shard produced
#[derive(Debug, Default)]
pub struct ShardOutput {
    pub segments: Vec<SegmentInfo>,
    pub tokens: u64,
    pub bytes: u64,
}

/// Inverts one shard into one or more segment files
pub struct PartialBuilder<'a> {
    shard_id: usize,
    out_dir: &'a Path,
    budget: u64,
    abort: &'a AbortHandle,
    arena: AHashMap<String, PostingsList>,
    arena_bytes: u64,
    output: ShardOutput,
}

impl<'a> PartialBuilder<'a> {
    pub fn new(shard_id: usize, out_dir: &'a Path, budget: u64, abort: &'a AbortHandle) -> Self {
        Self {
            shard_id,
            out_dir,
            budget,
            abort,
            arena: AHashMap::new(),
            arena_bytes: 0,
            output: ShardOutput::default(),
        }
    }

    /// Record the words of one document piece
    pub fn add(&mut self, doc_id: DocId, text: &[u8], base: Position) -> Result<()> {
        for (term, position) in Tokenizer::with_base(text, base) {
            self.output.tokens += 1;
            self.insert(term, doc_id, position);
            if self.arena_bytes >= self.budget {
                self.spill()?;
            }
        }
        self.output.bytes += text.len() as u64;
        Ok(())
    }

    fn insert(&mut self, term: String, doc_id: DocId, position: Position) {
        let term_len = term.len() as u64;
        let list = self.arena.entry(term).or_insert_with(|| {
            self.arena_bytes += TERM_OVERHEAD + term_len;
            Vec::new()
        });
        match list.last_mut() {
            Some(last) if last.doc_id == doc_id => last.positions.push(position),
            _ => {
                list.push(Posting::new(doc_id, vec![position]));
                self.arena_bytes += POSTING_OVERHEAD;
            }
        }
        self.arena_bytes += POSITION_BYTES;
    }

    /// Sort the arena and write it out as a segment
    fn spill(&mut self) -> Result<()> {
        if self.arena.is_empty() {
            return Ok(());
        }
        let arena = std::mem::take(&mut self.arena);
        let arena_bytes = std::mem::replace(&mut self.arena_bytes, 0);

        let mut entries: Vec<(String, PostingsList)> = arena.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let path = self.segment_path(self.output.segments.len());
        let info = write_segment(&path, entries.iter().map(|(t, p)| (t.as_str(), p)))?;
        debug!(
            shard = self.shard_id,
            segment = %path.display(),
            terms = info.records,
            arena_bytes,
            "spilled arena"
        );
        self.output.segments.push(info);
        Ok(())
    }

    fn segment_path(&self, seq: usize) -> PathBuf {
        self.out_dir
            .join(format!("shard-{:05}-{:03}.seg", self.shard_id, seq))
    }

    /// Flush what is left and return the shard's segments
    pub fn finish(mut self) -> Result<ShardOutput> {
        self.spill()?;
        Ok(self.output)
    }
}

/// Invert every piece of `shard`. On error the segments written so far are removed.
pub fn build_shard(
    corpus: &Corpus,
    shard: &Shard,
    out_dir: &Path,
    budget: u64,
    abort: &AbortHandle,
) -> Result<ShardOutput> {
    let mut builder = PartialBuilder::new(shard.id, out_dir, budget, abort);
    let result = shard.pieces.iter().try_for_each(|piece| {
        builder.abort.check()?;
        builder.add(piece.doc_id, shard.slice(corpus, piece), piece.base)
    });
    match result {
        Ok(()) => builder.finish(),
        Err(e) => {
            for segment in &builder.output.segments {
                let _ = std::fs::remove_file(&segment.path);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::corpus::plan_shards;
    use crate::index::segment::SegmentReader;
    use crate::index::types::merge_postings;
    use std::collections::BTreeMap;

    fn collect(segments: &[SegmentInfo]) -> BTreeMap<String, PostingsList> {
        let mut merged: BTreeMap<String, Vec<PostingsList>> = BTreeMap::new();
        for info in segments {
            let reader = SegmentReader::open(&info.path).unwrap();
            let mut cursor = reader.records();
            while let Some(rec) = cursor.next_record().unwrap() {
                merged.entry(rec.term).or_default().push(rec.postings);
            }
        }
        merged
            .into_iter()
            .map(|(t, lists)| (t, merge_postings(lists)))
            .collect()
    }

    #[test]
    fn test_single_segment_contents() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::from_texts([("a", "to be or not to be"), ("b", "be quick")]);
        let shards = plan_shards(&corpus, 1 << 20);
        let abort = AbortHandle::new();
        let out = build_shard(&corpus, &shards[0], dir.path(), 1 << 20, &abort).unwrap();

        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.tokens, 8);
        let index = collect(&out.segments);
        assert_eq!(
            index["be"],
            vec![Posting::new(0, vec![1, 5]), Posting::new(1, vec![0])]
        );
        assert_eq!(index["to"], vec![Posting::new(0, vec![0, 4])]);
    }

    #[test]
    fn test_small_budget_spills_without_losing_postings() {
        let dir = tempfile::tempdir().unwrap();
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let corpus = Corpus::from_texts([("a", text.clone()), ("b", text)]);
        let shards = plan_shards(&corpus, 1 << 20);
        let abort = AbortHandle::new();

        let spilled = build_shard(&corpus, &shards[0], dir.path(), 512, &abort).unwrap();
        assert!(spilled.segments.len() > 1);

        let other = tempfile::tempdir().unwrap();
        let whole = build_shard(&corpus, &shards[0], other.path(), 1 << 30, &abort).unwrap();
        assert_eq!(whole.segments.len(), 1);

        assert_eq!(collect(&spilled.segments), collect(&whole.segments));
    }

    #[test]
    fn test_abort_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::from_texts([("a", "alpha"), ("b", "beta")]);
        let shards = plan_shards(&corpus, 1 << 20);
        let abort = AbortHandle::new();
        abort.abort();
        let result = build_shard(&corpus, &shards[0], dir.path(), 1 << 20, &abort);
        assert!(matches!(result, Err(LexdexError::Aborted)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
