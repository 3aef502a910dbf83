//! Final index file assembly.
//!
//! ```text
//! header (48 bytes, little endian):
//!   magic "LXDXIDX1" | version u32 | skip_interval u32 | doc_count u64 |
//!   dictionary_offset u64 | postings_offset u64 | restart_table_offset u64
//! dictionary block | postings block |
//! restart table: term_count u64 | restart_interval u32 | restart_count u32 | offsets u64*
//! ```

use crate::error::{IoContext, LexdexError, Result};
use crate::index::dictionary::DictionaryEncoder;
use crate::index::merge::PartitionRun;
use crate::index::types::{FORMAT_VERSION, INDEX_MAGIC, PostingsRef};
use crate::utils::encoding::{ByteCursor, write_u32_le, write_u64_le};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HEADER_LEN: u64 = 48;

/// Parsed index header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    /// Postings skip interval; 0 when blocks carry no skip tables
    pub skip_interval: u32,
    pub doc_count: u64,
    pub dictionary_offset: u64,
    pub postings_offset: u64,
    pub restart_table_offset: u64,
}

impl IndexHeader {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(INDEX_MAGIC)?;
        write_u32_le(out, self.version)?;
        write_u32_le(out, self.skip_interval)?;
        write_u64_le(out, self.doc_count)?;
        write_u64_le(out, self.dictionary_offset)?;
        write_u64_le(out, self.postings_offset)?;
        write_u64_le(out, self.restart_table_offset)
    }

    /// Parse the header and check its offsets against the length of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| LexdexError::CorruptIndex(what.to_string());
        if bytes.len() < HEADER_LEN as usize {
            return Err(corrupt("file shorter than header"));
        }
        if &bytes[..8] != INDEX_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let mut cursor = ByteCursor::at(bytes, 8);
        let version = cursor.read_u32_le()?;
        if version != FORMAT_VERSION {
            return Err(LexdexError::CorruptIndex(format!(
                "unsupported version {}",
                version
            )));
        }
        let header = Self {
            version,
            skip_interval: cursor.read_u32_le()?,
            doc_count: cursor.read_u64_le()?,
            dictionary_offset: cursor.read_u64_le()?,
            postings_offset: cursor.read_u64_le()?,
            restart_table_offset: cursor.read_u64_le()?,
        };

        let file_len = bytes.len() as u64;
        if header.dictionary_offset != HEADER_LEN
            || header.postings_offset < header.dictionary_offset
            || header.restart_table_offset < header.postings_offset
            || header.restart_table_offset.saturating_add(16) > file_len
        {
            return Err(corrupt("section offsets out of bounds"));
        }
        if header.doc_count > u32::MAX as u64 {
            return Err(corrupt("document count exceeds id space"));
        }
        Ok(header)
    }
}

/// What was written
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub path: PathBuf,
    pub term_count: u64,
    pub dictionary_bytes: u64,
    pub postings_bytes: u64,
    pub file_bytes: u64,
}

/// Concatenates merged partition runs into one index file
pub struct IndexWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    restart_interval: usize,
    skip_interval: usize,
}

impl IndexWriter {
    /// `skip_interval` must match the encoder that produced the runs
    pub fn new(path: &Path, restart_interval: usize, skip_interval: usize) -> Self {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        Self {
            path: path.to_path_buf(),
            tmp_path: PathBuf::from(tmp),
            restart_interval,
            skip_interval,
        }
    }

    /// Write the file under a temporary name and rename it into place
    pub fn write(&self, doc_count: u64, runs: &[PartitionRun]) -> Result<IndexSummary> {
        self.write_with(doc_count, runs, || Ok(()))
    }

    /// Like [`IndexWriter::write`], running `before_rename` once the
    /// temporary file is complete. If it fails the file is discarded.
    pub fn write_with<F>(
        &self,
        doc_count: u64,
        runs: &[PartitionRun],
        before_rename: F,
    ) -> Result<IndexSummary>
    where
        F: FnOnce() -> Result<()>,
    {
        let result = self
            .write_tmp(doc_count, runs)
            .and_then(|summary| before_rename().map(|()| summary));
        if result.is_err() {
            let _ = fs::remove_file(&self.tmp_path);
            return result;
        }
        fs::rename(&self.tmp_path, &self.path).with_path(&self.path)?;
        result
    }

    fn write_tmp(&self, doc_count: u64, runs: &[PartitionRun]) -> Result<IndexSummary> {
        let tmp = &self.tmp_path;
        let file = File::create(tmp).with_path(tmp)?;
        let mut out = BufWriter::new(file);
        out.write_all(&[0u8; HEADER_LEN as usize]).with_path(tmp)?;

        // Dictionary, with offsets rebased onto the concatenated postings block
        let mut encoder = DictionaryEncoder::new(&mut out, self.restart_interval);
        let mut base = 0u64;
        for run in runs {
            let file = File::open(&run.terms_path).with_path(&run.terms_path)?;
            if run.term_count > 0 {
                // SAFETY: run files are private to this build
                let map = unsafe { Mmap::map(&file) }.with_path(&run.terms_path)?;
                let mut cursor = ByteCursor::new(&map);
                while !cursor.is_empty() {
                    let len = cursor.read_varint()? as usize;
                    let term = std::str::from_utf8(cursor.read_bytes(len)?).map_err(|_| {
                        LexdexError::CorruptIndex(format!(
                            "{}: term is not valid UTF-8",
                            run.terms_path.display()
                        ))
                    })?;
                    let offset = cursor.read_varint_u64()?;
                    let length = cursor.read_varint_u64()?;
                    encoder
                        .push(
                            term,
                            PostingsRef {
                                offset: base + offset,
                                length,
                            },
                        )
                        .with_path(tmp)?;
                }
            }
            base += run.postings_bytes;
        }
        let (_, dict) = encoder.finish().with_path(tmp)?;

        // Postings
        for run in runs {
            let mut input = File::open(&run.postings_path).with_path(&run.postings_path)?;
            let copied = io::copy(&mut input, &mut out).with_path(&run.postings_path)?;
            if copied != run.postings_bytes {
                return Err(LexdexError::CorruptIndex(format!(
                    "{}: expected {} postings bytes, found {}",
                    run.postings_path.display(),
                    run.postings_bytes,
                    copied
                )));
            }
        }

        // Restart table
        write_u64_le(&mut out, dict.term_count).with_path(tmp)?;
        write_u32_le(&mut out, self.restart_interval as u32).with_path(tmp)?;
        write_u32_le(&mut out, dict.restarts.len() as u32).with_path(tmp)?;
        for offset in &dict.restarts {
            write_u64_le(&mut out, *offset).with_path(tmp)?;
        }

        let header = IndexHeader {
            version: FORMAT_VERSION,
            skip_interval: self.skip_interval as u32,
            doc_count,
            dictionary_offset: HEADER_LEN,
            postings_offset: HEADER_LEN + dict.bytes,
            restart_table_offset: HEADER_LEN + dict.bytes + base,
        };
        let mut file = out.into_inner().map_err(|e| LexdexError::io(tmp, e.into_error()))?;
        file.seek(SeekFrom::Start(0)).with_path(tmp)?;
        header.write_to(&mut file).with_path(tmp)?;
        file.sync_all().with_path(tmp)?;
        let file_bytes = file.metadata().with_path(tmp)?.len();

        debug!(
            terms = dict.term_count,
            dictionary_bytes = dict.bytes,
            postings_bytes = base,
            "index file assembled"
        );
        Ok(IndexSummary {
            path: self.path.clone(),
            term_count: dict.term_count,
            dictionary_bytes: dict.bytes,
            postings_bytes: base,
            file_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = IndexHeader {
            version: FORMAT_VERSION,
            skip_interval: 16,
            doc_count: 3,
            dictionary_offset: HEADER_LEN,
            postings_offset: 100,
            restart_table_offset: 200,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN as usize);
        bytes.resize(216, 0);
        assert_eq!(IndexHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_input() {
        assert!(IndexHeader::parse(b"short").is_err());

        let mut bytes = vec![0u8; 64];
        bytes[..8].copy_from_slice(b"NOTANIDX");
        assert!(IndexHeader::parse(&bytes).is_err());

        let header = IndexHeader {
            version: FORMAT_VERSION,
            skip_interval: 0,
            doc_count: 1,
            dictionary_offset: HEADER_LEN,
            postings_offset: 40,
            restart_table_offset: 60,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        bytes.resize(80, 0);
        assert!(matches!(
            IndexHeader::parse(&bytes),
            Err(LexdexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_header_rejects_doc_count_beyond_id_space() {
        let mut header = IndexHeader {
            version: FORMAT_VERSION,
            skip_interval: 64,
            doc_count: u32::MAX as u64,
            dictionary_offset: HEADER_LEN,
            postings_offset: HEADER_LEN,
            restart_table_offset: HEADER_LEN,
        };
        let encode = |header: &IndexHeader| {
            let mut bytes = Vec::new();
            header.write_to(&mut bytes).unwrap();
            bytes.resize(HEADER_LEN as usize + 16, 0);
            bytes
        };
        assert!(IndexHeader::parse(&encode(&header)).is_ok());

        header.doc_count = u32::MAX as u64 + 1;
        assert!(matches!(
            IndexHeader::parse(&encode(&header)),
            Err(LexdexError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_failed_hook_discards_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hook.idx");
        let result = IndexWriter::new(&path, 32, 64)
            .write_with(0, &[], || Err(LexdexError::Config("refused".into())));
        assert!(matches!(result, Err(LexdexError::Config(_))));
        assert!(!path.exists());
        assert!(!dir.path().join("hook.idx.tmp").exists());
    }

    #[test]
    fn test_write_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.idx");
        let summary = IndexWriter::new(&path, 32, 64).write(0, &[]).unwrap();
        assert_eq!(summary.term_count, 0);
        assert_eq!(summary.file_bytes, HEADER_LEN + 16);
        let bytes = fs::read(&path).unwrap();
        let header = IndexHeader::parse(&bytes).unwrap();
        assert_eq!(header.postings_offset, HEADER_LEN);
        assert!(!dir.path().join("empty.idx.tmp").exists());
    }
}
