//! Sorted run files produced by partial builders.
//!
//! ```text
//! magic "LXDXSEG1" | version u32 | record_count u32
//! record*: term_len:varint | term | payload_len:varint | payload
//! bucket directory: 257 x u64
//! footer: directory_offset u64
//! ```
//!
//! The payload is a postings block without a skip table. Directory entry `b`
//! is the file offset of the first record whose term starts with a byte
//! `>= b`; entry 256 is the end of the record area. The merger uses it to
//! read only the terms of its first-byte partition.

use crate::error::{IoContext, LexdexError, Result};
use crate::index::postings::{PostingsEncoder, decode_postings};
use crate::index::types::{FORMAT_VERSION, PostingsList, SEGMENT_MAGIC};
use crate::utils::encoding::{ByteCursor, DecodeError, encode_varint, write_u32_le, write_u64_le};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 16;
const BUCKETS: usize = 256;
const DIRECTORY_LEN: usize = (BUCKETS + 1) * 8;
const FOOTER_LEN: usize = 8;

/// What a finished segment holds
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub records: u32,
    pub bytes: u64,
}

/// Write term-sorted records to `path`.
///
/// The file is written as `<path>.tmp`, synced and renamed, so a visible
/// segment is always complete.
pub fn write_segment<'t, I>(path: &Path, records: I) -> Result<SegmentInfo>
where
    I: IntoIterator<Item = (&'t str, &'t PostingsList)>,
{
    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path).with_path(&tmp_path)?;
    let mut out = BufWriter::new(file);

    // Record count is patched after the records are known
    let mut body = Vec::new();
    let mut buckets = [0u64; BUCKETS + 1];
    let mut next_bucket = 0usize;
    let mut count: u32 = 0;
    let mut payload = Vec::new();
    let encoder = PostingsEncoder::without_skips();
    let mut prev: Option<&str> = None;

    for (term, postings) in records {
        if term.is_empty() || prev.is_some_and(|p| p >= term) {
            return Err(LexdexError::corrupt_segment(
                path,
                format!("record {:?} is empty or out of order", term),
            ));
        }
        prev = Some(term);

        let first = term.as_bytes()[0] as usize;
        while next_bucket <= first {
            buckets[next_bucket] = (HEADER_LEN + body.len()) as u64;
            next_bucket += 1;
        }

        payload.clear();
        encoder.encode(postings, &mut payload);
        encode_varint(term.len() as u32, &mut body);
        body.extend_from_slice(term.as_bytes());
        encode_varint(payload.len() as u32, &mut body);
        body.extend_from_slice(&payload);
        count += 1;
    }
    let end = (HEADER_LEN + body.len()) as u64;
    for slot in buckets.iter_mut().skip(next_bucket) {
        *slot = end;
    }

    let io = |e| LexdexError::io(&tmp_path, e);
    out.write_all(SEGMENT_MAGIC).map_err(io)?;
    write_u32_le(&mut out, FORMAT_VERSION).map_err(io)?;
    write_u32_le(&mut out, count).map_err(io)?;
    out.write_all(&body).map_err(io)?;
    for offset in buckets {
        write_u64_le(&mut out, offset).map_err(io)?;
    }
    write_u64_le(&mut out, end).map_err(io)?;
    let file = out.into_inner().map_err(|e| io(e.into_error()))?;
    file.sync_all().map_err(io)?;
    drop(file);

    fs::rename(&tmp_path, path).with_path(path)?;
    Ok(SegmentInfo {
        path: path.to_path_buf(),
        records: count,
        bytes: end + (DIRECTORY_LEN + FOOTER_LEN) as u64,
    })
}

/// A mapped, validated segment file
pub struct SegmentReader {
    path: PathBuf,
    map: Mmap,
    record_count: u32,
    directory: [u64; BUCKETS + 1],
}

impl SegmentReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        // SAFETY: segments are private to the build and not modified once renamed
        let map = unsafe { Mmap::map(&file) }.with_path(path)?;
        let corrupt = |detail: &str| LexdexError::corrupt_segment(path, detail);

        if map.len() < HEADER_LEN + DIRECTORY_LEN + FOOTER_LEN {
            return Err(corrupt("file too short"));
        }
        if &map[..8] != SEGMENT_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let mut header = ByteCursor::at(&map, 8);
        let version = header.read_u32_le().map_err(|e| corrupt(&e.to_string()))?;
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }
        let record_count = header.read_u32_le().map_err(|e| corrupt(&e.to_string()))?;

        let mut footer = ByteCursor::at(&map, map.len() - FOOTER_LEN);
        let dir_offset = footer.read_u64_le().map_err(|e| corrupt(&e.to_string()))? as usize;
        if dir_offset < HEADER_LEN || dir_offset + DIRECTORY_LEN + FOOTER_LEN != map.len() {
            return Err(corrupt("directory offset out of range"));
        }

        let mut cursor = ByteCursor::at(&map, dir_offset);
        let mut directory = [0u64; BUCKETS + 1];
        for slot in directory.iter_mut() {
            *slot = cursor.read_u64_le().map_err(|e| corrupt(&e.to_string()))?;
        }
        let monotonic = directory.windows(2).all(|w| w[0] <= w[1]);
        if !monotonic
            || directory[0] < HEADER_LEN as u64
            || directory[BUCKETS] != dir_offset as u64
        {
            return Err(corrupt("bucket directory inconsistent"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            map,
            record_count,
            directory,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Bytes of records whose first byte falls in `buckets`
    pub fn bucket_bytes(&self, buckets: Range<usize>) -> u64 {
        self.directory[buckets.end] - self.directory[buckets.start]
    }

    /// Cursor over the records whose first term byte falls in `buckets`
    pub fn cursor(&self, buckets: Range<usize>) -> SegmentCursor<'_> {
        let start = self.directory[buckets.start] as usize;
        let end = self.directory[buckets.end] as usize;
        SegmentCursor {
            cursor: ByteCursor::new(&self.map[start..end]),
        }
    }

    /// Cursor over every record
    pub fn records(&self) -> SegmentCursor<'_> {
        self.cursor(0..BUCKETS)
    }

    /// Decode every record and check term order, record count and the
    /// bucket directory. A segment that passes yields no decode errors to
    /// any partition cursor.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |detail: String| LexdexError::corrupt_segment(&self.path, detail);
        let end = self.directory[BUCKETS] as usize;
        let mut cursor = SegmentCursor {
            cursor: ByteCursor::at(&self.map[..end], HEADER_LEN),
        };

        let mut expected = [0u64; BUCKETS + 1];
        let mut next_bucket = 0usize;
        let mut count: u32 = 0;
        let mut prev: Option<String> = None;
        loop {
            let offset = cursor.cursor.position() as u64;
            let Some(rec) = cursor.next_record().map_err(|e| corrupt(e.to_string()))? else {
                break;
            };
            if rec.term.is_empty() || prev.as_deref().is_some_and(|p| p >= rec.term.as_str()) {
                return Err(corrupt(format!("term {:?} out of order", rec.term)));
            }
            let first = rec.term.as_bytes()[0] as usize;
            while next_bucket <= first {
                expected[next_bucket] = offset;
                next_bucket += 1;
            }
            count += 1;
            prev = Some(rec.term);
        }
        for slot in expected.iter_mut().skip(next_bucket) {
            *slot = end as u64;
        }

        if count != self.record_count {
            return Err(corrupt(format!(
                "header says {} records, found {}",
                self.record_count, count
            )));
        }
        if expected != self.directory {
            return Err(corrupt("bucket directory does not match records".into()));
        }
        Ok(())
    }
}

/// One decoded segment record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub term: String,
    pub postings: PostingsList,
}

/// Sequential reader over a range of records
pub struct SegmentCursor<'a> {
    cursor: ByteCursor<'a>,
}

impl SegmentCursor<'_> {
    pub fn next_record(&mut self) -> std::result::Result<Option<SegmentRecord>, DecodeError> {
        if self.cursor.is_empty() {
            return Ok(None);
        }
        let term_len = self.cursor.read_varint()? as usize;
        let at = self.cursor.position();
        let term = std::str::from_utf8(self.cursor.read_bytes(term_len)?).map_err(|_| DecodeError {
            offset: at,
            what: "term is not valid UTF-8",
        })?;
        let payload_len = self.cursor.read_varint()? as usize;
        let postings = decode_postings(self.cursor.read_bytes(payload_len)?, 0)?;
        Ok(Some(SegmentRecord {
            term: term.to_string(),
            postings,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::Posting;

    fn records() -> Vec<(String, PostingsList)> {
        vec![
            ("apple".into(), vec![Posting::new(0, vec![1])]),
            ("apricot".into(), vec![Posting::new(1, vec![0, 3])]),
            ("cherry".into(), vec![Posting::new(0, vec![2]), Posting::new(4, vec![7])]),
            ("zebra".into(), vec![Posting::new(9, vec![0])]),
        ]
    }

    fn write(dir: &Path, recs: &[(String, PostingsList)]) -> SegmentInfo {
        write_segment(
            &dir.join("s0.seg"),
            recs.iter().map(|(t, p)| (t.as_str(), p)),
        )
        .unwrap()
    }

    fn read_all(mut cursor: SegmentCursor<'_>) -> Vec<SegmentRecord> {
        let mut out = Vec::new();
        while let Some(rec) = cursor.next_record().unwrap() {
            out.push(rec);
        }
        out
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let recs = records();
        let info = write(dir.path(), &recs);
        assert_eq!(info.records, 4);
        assert!(!dir.path().join("s0.tmp").exists());

        let reader = SegmentReader::open(&info.path).unwrap();
        assert_eq!(reader.record_count(), 4);
        let back = read_all(reader.records());
        let expected: Vec<_> = recs
            .into_iter()
            .map(|(term, postings)| SegmentRecord { term, postings })
            .collect();
        assert_eq!(back, expected);
    }

    #[test]
    fn test_bucket_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let info = write(dir.path(), &records());
        let reader = SegmentReader::open(&info.path).unwrap();

        let a = read_all(reader.cursor(b'a' as usize..b'b' as usize));
        assert_eq!(a.len(), 2);
        let b_to_y = read_all(reader.cursor(b'b' as usize..b'z' as usize));
        assert_eq!(b_to_y.len(), 1);
        assert_eq!(b_to_y[0].term, "cherry");
        assert_eq!(reader.bucket_bytes(0..b'a' as usize), 0);
    }

    #[test]
    fn test_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let info = write(dir.path(), &[]);
        let reader = SegmentReader::open(&info.path).unwrap();
        assert_eq!(reader.record_count(), 0);
        assert!(read_all(reader.records()).is_empty());
    }

    #[test]
    fn test_unsorted_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut recs = records();
        recs.swap(0, 1);
        let err = write_segment(
            &dir.path().join("bad.seg"),
            recs.iter().map(|(t, p)| (t.as_str(), p)),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let info = write(dir.path(), &records());
        let bytes = fs::read(&info.path).unwrap();
        fs::write(&info.path, &bytes[..bytes.len() - 20]).unwrap();
        assert!(matches!(
            SegmentReader::open(&info.path),
            Err(LexdexError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_verify_accepts_written_segment() {
        let dir = tempfile::tempdir().unwrap();
        let info = write(dir.path(), &records());
        SegmentReader::open(&info.path).unwrap().verify().unwrap();

        let empty_dir = tempfile::tempdir().unwrap();
        let empty = write(empty_dir.path(), &[]);
        SegmentReader::open(&empty.path).unwrap().verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_shifted_directory() {
        let dir = tempfile::tempdir().unwrap();
        let info = write(dir.path(), &records());
        let mut bytes = fs::read(&info.path).unwrap();
        // Point bucket 'c' one byte into the "cherry" record
        let dir_offset = bytes.len() - DIRECTORY_LEN - FOOTER_LEN;
        let slot = dir_offset + b'c' as usize * 8;
        let value = u64::from_le_bytes(bytes[slot..slot + 8].try_into().unwrap());
        bytes[slot..slot + 8].copy_from_slice(&(value + 1).to_le_bytes());
        fs::write(&info.path, &bytes).unwrap();

        let reader = SegmentReader::open(&info.path).unwrap();
        assert!(matches!(
            reader.verify(),
            Err(LexdexError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_corrupt_payload_surfaces_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let info = write(dir.path(), &records());
        let mut bytes = fs::read(&info.path).unwrap();
        // Inflate the first record's payload length past the record area
        let payload_len_at = HEADER_LEN + 1 + "apple".len();
        bytes[payload_len_at] = 0x7F;
        fs::write(&info.path, &bytes).unwrap();

        let reader = SegmentReader::open(&info.path).unwrap();
        let mut cursor = reader.records();
        assert!(cursor.next_record().is_err());
        assert!(reader.verify().is_err());
    }
}
