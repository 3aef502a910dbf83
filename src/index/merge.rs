//! External k-way merge of segment files.
//!
//! The term space is cut into contiguous first-byte ranges. Each range is
//! merged on its own rayon task into two run files: encoded postings and the
//! `(term, offset, length)` triples that will become the dictionary. The
//! runs are concatenated in range order by [`crate::index::writer`].
//!
//! Segments are verified before any partition starts. Under
//! [`CorruptSegmentPolicy::Skip`] a segment that fails verification is left
//! out of every partition, so the merged index is the same for any
//! partition count.

use crate::error::{IoContext, LexdexError, Result};
use crate::index::build::UnitFailure;
use crate::index::partial::AbortHandle;
use crate::index::postings::PostingsEncoder;
use crate::index::segment::{SegmentCursor, SegmentReader};
use crate::index::types::{CorruptSegmentPolicy, PostingsList, is_well_formed, merge_postings};
use crate::utils::encoding::{encode_varint, encode_varint_u64};
use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BUCKETS: usize = 256;

/// Split `0..256` into at most `max` first-byte ranges of similar size
pub fn plan_partitions<'s, I>(segments: I, max: usize) -> Vec<Range<usize>>
where
    I: IntoIterator<Item = &'s SegmentReader>,
{
    let max = max.max(1);
    let mut sizes = [0u64; BUCKETS];
    for segment in segments {
        for (b, size) in sizes.iter_mut().enumerate() {
            *size += segment.bucket_bytes(b..b + 1);
        }
    }
    let total: u64 = sizes.iter().sum();
    if total == 0 || max == 1 {
        return vec![0..BUCKETS];
    }

    let target = total.div_ceil(max as u64);
    let mut ranges = Vec::with_capacity(max);
    let (mut start, mut acc) = (0, 0u64);
    for (b, size) in sizes.iter().enumerate() {
        acc += size;
        if acc >= target && ranges.len() + 1 < max && b + 1 < BUCKETS {
            ranges.push(start..b + 1);
            start = b + 1;
            acc = 0;
        }
    }
    ranges.push(start..BUCKETS);
    ranges
}

/// Output of one merged partition
#[derive(Debug)]
pub struct PartitionRun {
    pub index: usize,
    pub buckets: Range<usize>,
    pub postings_path: PathBuf,
    pub terms_path: PathBuf,
    pub postings_bytes: u64,
    pub term_count: u64,
}

/// Runs in range order plus the segments left out under `Skip`
#[derive(Debug)]
pub struct MergeOutput {
    pub runs: Vec<PartitionRun>,
    pub failures: Vec<UnitFailure>,
}

/// Smallest buffered record of a segment cursor
#[derive(Debug)]
struct HeapEntry {
    term: String,
    segment: usize,
    postings: PostingsList,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term
            .as_bytes()
            .cmp(other.term.as_bytes())
            .then(self.segment.cmp(&other.segment))
    }
}

pub struct Merger<'a> {
    segments: &'a [SegmentReader],
    work_dir: &'a Path,
    policy: CorruptSegmentPolicy,
    encoder: PostingsEncoder,
    abort: &'a AbortHandle,
}

impl<'a> Merger<'a> {
    pub fn new(
        segments: &'a [SegmentReader],
        work_dir: &'a Path,
        policy: CorruptSegmentPolicy,
        skip_interval: usize,
        abort: &'a AbortHandle,
    ) -> Self {
        Self {
            segments,
            work_dir,
            policy,
            encoder: PostingsEncoder::new(skip_interval),
            abort,
        }
    }

    /// Verify every segment, then merge every partition concurrently.
    ///
    /// Runs come back in range order. Segment corruption follows the
    /// policy; any I/O error in a partition, such as failing to create its
    /// run files, fails the whole merge.
    pub fn merge(&self, max_partitions: usize) -> Result<MergeOutput> {
        let checked = self.verify_segments()?;
        let usable: Vec<bool> = checked.iter().map(Option::is_none).collect();
        let failures = checked.into_iter().flatten().collect();

        let live = self
            .segments
            .iter()
            .zip(&usable)
            .filter_map(|(s, &ok)| ok.then_some(s));
        let ranges = plan_partitions(live, max_partitions);
        debug!(partitions = ranges.len(), segments = self.segments.len(), "merging");
        let runs = ranges
            .into_par_iter()
            .enumerate()
            .map(|(index, buckets)| self.merge_partition(index, buckets, &usable))
            .collect::<Result<Vec<_>>>()?;
        Ok(MergeOutput { runs, failures })
    }

    /// Per segment: `None` when it can be merged, or the failure to report
    fn verify_segments(&self) -> Result<Vec<Option<UnitFailure>>> {
        self.segments
            .par_iter()
            .map(|segment| match segment.verify() {
                Ok(()) => Ok(None),
                Err(e) if self.policy == CorruptSegmentPolicy::Skip => {
                    warn!(segment = %segment.path().display(), error = %e, "skipping corrupt segment");
                    Ok(Some(UnitFailure::new(segment.path().display().to_string(), e)))
                }
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Pull the next record of `segment` into the heap
    fn refill(
        &self,
        segment: usize,
        cursors: &mut [Option<SegmentCursor<'a>>],
        heap: &mut BinaryHeap<Reverse<HeapEntry>>,
    ) -> Result<()> {
        let Some(cursor) = cursors[segment].as_mut() else {
            return Ok(());
        };
        match cursor.next_record() {
            Ok(Some(rec)) => heap.push(Reverse(HeapEntry {
                term: rec.term,
                segment,
                postings: rec.postings,
            })),
            Ok(None) => cursors[segment] = None,
            Err(e) => {
                return Err(LexdexError::corrupt_segment(
                    self.segments[segment].path(),
                    e.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn merge_partition(
        &self,
        index: usize,
        buckets: Range<usize>,
        usable: &[bool],
    ) -> Result<PartitionRun> {
        let postings_path = self.work_dir.join(format!("run-{:04}.postings", index));
        let terms_path = self.work_dir.join(format!("run-{:04}.terms", index));
        let mut postings_out =
            BufWriter::new(File::create(&postings_path).with_path(&postings_path)?);
        let mut terms_out = BufWriter::new(File::create(&terms_path).with_path(&terms_path)?);

        let mut cursors: Vec<Option<SegmentCursor<'a>>> = self
            .segments
            .iter()
            .zip(usable)
            .map(|(s, &ok)| ok.then(|| s.cursor(buckets.clone())))
            .collect();
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for segment in 0..cursors.len() {
            self.refill(segment, &mut cursors, &mut heap)?;
        }

        let mut run = PartitionRun {
            index,
            buckets,
            postings_path,
            terms_path,
            postings_bytes: 0,
            term_count: 0,
        };
        let mut block = Vec::new();
        let mut entry = Vec::new();

        while let Some(Reverse(first)) = heap.pop() {
            if run.term_count % 1024 == 0 {
                self.abort.check()?;
            }
            let term = first.term;
            let mut lists = vec![first.postings];
            let mut drained = vec![first.segment];
            while heap.peek().is_some_and(|Reverse(next)| next.term == term) {
                if let Some(Reverse(next)) = heap.pop() {
                    lists.push(next.postings);
                    drained.push(next.segment);
                }
            }
            for segment in drained {
                self.refill(segment, &mut cursors, &mut heap)?;
            }

            let merged = merge_postings(lists);
            debug_assert!(is_well_formed(&merged), "postings of {:?} out of order", term);
            block.clear();
            self.encoder.encode(&merged, &mut block);
            postings_out
                .write_all(&block)
                .with_path(&run.postings_path)?;

            entry.clear();
            encode_varint(term.len() as u32, &mut entry);
            entry.extend_from_slice(term.as_bytes());
            encode_varint_u64(run.postings_bytes, &mut entry);
            encode_varint_u64(block.len() as u64, &mut entry);
            terms_out.write_all(&entry).with_path(&run.terms_path)?;

            run.postings_bytes += block.len() as u64;
            run.term_count += 1;
        }

        postings_out.flush().with_path(&run.postings_path)?;
        terms_out.flush().with_path(&run.terms_path)?;
        debug!(
            partition = index,
            terms = run.term_count,
            postings_bytes = run.postings_bytes,
            "partition merged"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::segment::write_segment;
    use crate::index::types::Posting;
    use crate::utils::encoding::ByteCursor;
    use std::fs;

    fn segment(dir: &Path, name: &str, recs: &[(&str, PostingsList)]) -> SegmentReader {
        let path = dir.join(name);
        write_segment(&path, recs.iter().map(|(t, p)| (*t, p))).unwrap();
        SegmentReader::open(&path).unwrap()
    }

    fn read_terms(run: &PartitionRun) -> Vec<String> {
        let bytes = fs::read(&run.terms_path).unwrap();
        let mut cursor = ByteCursor::new(&bytes);
        let mut terms = Vec::new();
        while !cursor.is_empty() {
            let len = cursor.read_varint().unwrap() as usize;
            terms.push(String::from_utf8(cursor.read_bytes(len).unwrap().to_vec()).unwrap());
            cursor.read_varint_u64().unwrap();
            cursor.read_varint_u64().unwrap();
        }
        terms
    }

    #[test]
    fn test_plan_partitions_cover_keyspace() {
        let dir = tempfile::tempdir().unwrap();
        let p = || vec![Posting::new(0, vec![0])];
        let segs = vec![segment(
            dir.path(),
            "a.seg",
            &[("alpha", p()), ("bravo", p()), ("mike", p()), ("zulu", p())],
        )];
        for max in [1, 2, 3, 8] {
            let ranges = plan_partitions(&segs, max);
            assert!(ranges.len() <= max);
            assert_eq!(ranges.first().unwrap().start, 0);
            assert_eq!(ranges.last().unwrap().end, 256);
            assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
        }
    }

    #[test]
    fn test_merge_combines_equal_terms() {
        let dir = tempfile::tempdir().unwrap();
        let segs = vec![
            segment(
                dir.path(),
                "a.seg",
                &[
                    ("apple", vec![Posting::new(0, vec![1])]),
                    ("kiwi", vec![Posting::new(2, vec![0, 5])]),
                ],
            ),
            segment(
                dir.path(),
                "b.seg",
                &[
                    ("apple", vec![Posting::new(3, vec![4])]),
                    ("kiwi", vec![Posting::new(2, vec![9])]),
                    ("pear", vec![Posting::new(5, vec![0])]),
                ],
            ),
        ];
        let abort = AbortHandle::new();
        let merger = Merger::new(&segs, dir.path(), CorruptSegmentPolicy::Abort, 64, &abort);
        let out = merger.merge(3).unwrap();

        let terms: Vec<String> = out.runs.iter().flat_map(read_terms).collect();
        assert_eq!(terms, vec!["apple", "kiwi", "pear"]);
        assert_eq!(out.runs.iter().map(|r| r.term_count).sum::<u64>(), 3);
        assert!(out.failures.is_empty());
    }

    /// Write a segment and overwrite the payload length of `term`'s record
    fn corrupt_segment(dir: &Path, name: &str, recs: &[(&str, PostingsList)], term: &str) -> SegmentReader {
        let path = dir.join(name);
        write_segment(&path, recs.iter().map(|(t, p)| (*t, p))).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let at = bytes
            .windows(term.len())
            .position(|w| w == term.as_bytes())
            .unwrap();
        bytes[at + term.len()] = 0x7F;
        fs::write(&path, &bytes).unwrap();
        SegmentReader::open(&path).unwrap()
    }

    #[test]
    fn test_corrupt_segment_policy() {
        let dir = tempfile::tempdir().unwrap();
        let good = segment(
            dir.path(),
            "good.seg",
            &[("apple", vec![Posting::new(0, vec![1])])],
        );
        let bad = corrupt_segment(
            dir.path(),
            "bad.seg",
            &[
                ("apple", vec![Posting::new(1, vec![0])]),
                ("berry", vec![Posting::new(1, vec![2])]),
            ],
            "berry",
        );
        let segs = vec![good, bad];
        let abort = AbortHandle::new();

        let skip = Merger::new(&segs, dir.path(), CorruptSegmentPolicy::Skip, 64, &abort);
        let out = skip.merge(1).unwrap();
        assert_eq!(read_terms(&out.runs[0]), vec!["apple"]);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].unit.ends_with("bad.seg"));

        // Records of the corrupt segment read before the bad one are dropped too
        let bytes = fs::read(&out.runs[0].postings_path).unwrap();
        let postings = crate::index::postings::decode_postings(&bytes, 64).unwrap();
        assert_eq!(postings, vec![Posting::new(0, vec![1])]);

        let strict = Merger::new(&segs, dir.path(), CorruptSegmentPolicy::Abort, 64, &abort);
        assert!(matches!(
            strict.merge(1),
            Err(LexdexError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_run_file_error_fails_merge() {
        let dir = tempfile::tempdir().unwrap();
        let segs = vec![segment(
            dir.path(),
            "a.seg",
            &[("apple", vec![Posting::new(0, vec![0])])],
        )];
        let missing = dir.path().join("missing");
        let abort = AbortHandle::new();
        let merger = Merger::new(&segs, &missing, CorruptSegmentPolicy::Skip, 64, &abort);
        assert!(matches!(merger.merge(4), Err(LexdexError::Io { .. })));
    }

    #[test]
    fn test_skipped_segment_independent_of_partition_count() {
        let dir = tempfile::tempdir().unwrap();
        let p = |doc| vec![Posting::new(doc, vec![0])];
        let good = segment(
            dir.path(),
            "good.seg",
            &[("apple", p(0)), ("kiwi", p(0)), ("zebra", p(0))],
        );
        let bad = corrupt_segment(
            dir.path(),
            "bad.seg",
            &[("berry", p(1)), ("mango", p(1)), ("yam", p(1))],
            "berry",
        );
        let segs = vec![good, bad];
        let abort = AbortHandle::new();
        let merger = Merger::new(&segs, dir.path(), CorruptSegmentPolicy::Skip, 64, &abort);

        for partitions in [1, 2, 8] {
            let out = merger.merge(partitions).unwrap();
            let terms: Vec<String> = out.runs.iter().flat_map(read_terms).collect();
            assert_eq!(terms, vec!["apple", "kiwi", "zebra"], "{} partitions", partitions);
            assert_eq!(out.failures.len(), 1, "{} partitions", partitions);
        }
    }
}
