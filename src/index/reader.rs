use crate::error::{IoContext, LexdexError, Result};
use crate::index::dictionary::{DictEntry, DictionaryBlock};
use crate::index::postings::PostingsCursor;
use crate::index::types::PostingsRef;
use crate::index::writer::IndexHeader;
use crate::utils::encoding::{ByteCursor, decode_varint};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A term found in the dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermPostings {
    pub postings: PostingsRef,
    /// Number of documents containing the term
    pub doc_frequency: u32,
}

/// Read-only view of a finished index file.
///
/// All access goes through the memory map, so one reader can be shared
/// between threads behind an `Arc`.
pub struct IndexReader {
    path: PathBuf,
    map: Mmap,
    header: IndexHeader,
    term_count: u64,
    restart_interval: u32,
    restarts: Range<usize>,
}

impl IndexReader {
    /// Map an index file and validate its header and section bounds
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        // SAFETY: index files are written once and never modified in place
        let map = unsafe { Mmap::map(&file) }.with_path(path)?;
        let header = IndexHeader::parse(&map)?;

        let mut table = ByteCursor::at(&map, header.restart_table_offset as usize);
        let term_count = table.read_u64_le()?;
        let restart_interval = table.read_u32_le()?;
        let restart_count = table.read_u32_le()? as usize;
        let start = table.position();
        let end = start + restart_count * 8;
        if end != map.len() {
            return Err(LexdexError::CorruptIndex(format!(
                "restart table holds {} bytes, expected {}",
                map.len() - start,
                restart_count * 8
            )));
        }
        if restart_interval == 0 && term_count > 0 {
            return Err(LexdexError::CorruptIndex("zero restart interval".into()));
        }
        let expected = if term_count == 0 {
            0
        } else {
            term_count.div_ceil(restart_interval as u64)
        };
        if restart_count as u64 != expected {
            return Err(LexdexError::CorruptIndex(format!(
                "{} restart points for {} terms",
                restart_count, term_count
            )));
        }

        let reader = Self {
            path: path.to_path_buf(),
            map,
            header,
            term_count,
            restart_interval,
            restarts: start..end,
        };
        DictionaryBlock::new(
            reader.dictionary_block(),
            &reader.map[reader.restarts.clone()],
            term_count,
        )?;
        debug!(
            path = %path.display(),
            docs = header.doc_count,
            terms = term_count,
            "index opened"
        );
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn doc_count(&self) -> u32 {
        self.header.doc_count as u32
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    pub fn restart_interval(&self) -> u32 {
        self.restart_interval
    }

    /// Skip interval the postings blocks were written with
    pub fn skip_interval(&self) -> u32 {
        self.header.skip_interval
    }

    pub fn file_bytes(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn dictionary_bytes(&self) -> u64 {
        self.header.postings_offset - self.header.dictionary_offset
    }

    pub fn postings_bytes(&self) -> u64 {
        self.header.restart_table_offset - self.header.postings_offset
    }

    fn dictionary_block(&self) -> &[u8] {
        &self.map[self.header.dictionary_offset as usize..self.header.postings_offset as usize]
    }

    fn dictionary(&self) -> DictionaryBlock<'_> {
        DictionaryBlock::validated(
            self.dictionary_block(),
            &self.map[self.restarts.clone()],
            self.term_count,
        )
    }

    fn postings_block(&self) -> &[u8] {
        &self.map[self.header.postings_offset as usize..self.header.restart_table_offset as usize]
    }

    fn postings_slice(&self, postings: PostingsRef) -> Result<&[u8]> {
        let block = self.postings_block();
        let start = postings.offset as usize;
        start
            .checked_add(postings.length as usize)
            .filter(|&end| end <= block.len())
            .map(|end| &block[start..end])
            .ok_or_else(|| {
                LexdexError::CorruptIndex(format!(
                    "postings {}+{} outside postings block of {} bytes",
                    postings.offset,
                    postings.length,
                    block.len()
                ))
            })
    }

    /// Find a term. A missing term is `Ok(None)`, not an error.
    pub fn lookup(&self, term: &str) -> Result<Option<TermPostings>> {
        let Some(postings) = self.dictionary().lookup(term)? else {
            return Ok(None);
        };
        Ok(Some(TermPostings {
            postings,
            doc_frequency: self.doc_frequency(postings)?,
        }))
    }

    /// Document count stored at the head of a postings block
    pub fn doc_frequency(&self, postings: PostingsRef) -> Result<u32> {
        let slice = self.postings_slice(postings)?;
        decode_varint(slice).map(|(count, _)| count).ok_or_else(|| {
            LexdexError::CorruptIndex(format!(
                "postings at offset {} have no header",
                postings.offset
            ))
        })
    }

    /// Lazy cursor over a term's postings
    pub fn postings(&self, term: &TermPostings) -> Result<PostingsCursor<'_>> {
        let block = self.postings_slice(term.postings)?;
        Ok(PostingsCursor::new(block, self.header.skip_interval as usize)?)
    }

    /// Every dictionary entry in term order
    pub fn terms(&self) -> Result<impl Iterator<Item = Result<DictEntry>> + '_> {
        Ok(self
            .dictionary()
            .iter()
            .map(|entry| entry.map_err(LexdexError::from)))
    }

    /// Dictionary entries starting with `prefix`
    pub fn terms_with_prefix(&self, prefix: &str) -> Result<Vec<DictEntry>> {
        self.dictionary()
            .prefix_iter(prefix)?
            .map(|entry| entry.map_err(LexdexError::from))
            .collect()
    }
}
