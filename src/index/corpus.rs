//! Input documents and shard planning.
//!
//! Files are memory-mapped and never copied. Shards are lists of byte ranges
//! over those maps; a document bigger than one shard is cut at whitespace and
//! each piece carries the position of its first word, so every shard can be
//! tokenized independently and still produce document-local positions.

use crate::error::{IoContext, LexdexError, Result};
use crate::index::types::{DocId, Position};
use crate::utils::tokenizer::count_words;
use ignore::WalkBuilder;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// One input document
pub struct Document {
    pub name: String,
    source: Source,
}

impl Document {
    pub fn bytes(&self) -> &[u8] {
        match &self.source {
            Source::Mapped(map) => map,
            Source::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Documents in DocId order. Files that could not be opened are kept aside
/// so the build can report them.
#[derive(Default)]
pub struct Corpus {
    documents: Vec<Document>,
    pub unreadable: Vec<(PathBuf, LexdexError)>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a corpus from in-memory texts
    pub fn from_texts<I, N, T>(texts: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<Vec<u8>>,
    {
        let mut corpus = Self::new();
        for (name, text) in texts {
            corpus.push_text(name, text);
        }
        corpus
    }

    pub fn push_text(&mut self, name: impl Into<String>, text: impl Into<Vec<u8>>) -> DocId {
        self.push(Document {
            name: name.into(),
            source: Source::Owned(text.into()),
        })
    }

    /// Map a file and append it
    pub fn push_file(&mut self, path: &Path, name: impl Into<String>) -> Result<DocId> {
        let file = File::open(path).with_path(path)?;
        let len = file.metadata().with_path(path)?.len();
        // Zero-length maps are rejected on some platforms
        let source = if len == 0 {
            Source::Owned(Vec::new())
        } else {
            // SAFETY: the corpus is treated as read-only for the lifetime of the build
            Source::Mapped(unsafe { Mmap::map(&file) }.with_path(path)?)
        };
        Ok(self.push(Document {
            name: name.into(),
            source,
        }))
    }

    fn push(&mut self, doc: Document) -> DocId {
        self.documents.push(doc);
        (self.documents.len() - 1) as DocId
    }

    /// Walk a directory (respecting ignore files) and map every regular file.
    ///
    /// Paths are sorted so DocIds are stable across runs.
    pub fn open_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(LexdexError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let mut paths: Vec<PathBuf> = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();

        let mut corpus = Self::new();
        for path in paths {
            let name = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            if let Err(e) = corpus.push_file(&path, name) {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                corpus.unreadable.push((path, e));
            }
        }
        debug!(documents = corpus.len(), root = %root.display(), "corpus opened");
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document(&self, doc_id: DocId) -> &Document {
        &self.documents[doc_id as usize]
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn names(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.name.clone()).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.documents.iter().map(|d| d.len() as u64).sum()
    }
}

/// A contiguous byte range of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPiece {
    pub doc_id: DocId,
    pub range: Range<usize>,
    /// Position of the first word in the range
    pub base: Position,
}

/// A unit of work for one partial builder
#[derive(Debug, Clone, Default)]
pub struct Shard {
    pub id: usize,
    pub pieces: Vec<ShardPiece>,
    pub bytes: u64,
}

impl Shard {
    pub fn slice<'c>(&self, corpus: &'c Corpus, piece: &ShardPiece) -> &'c [u8] {
        &corpus.document(piece.doc_id).bytes()[piece.range.clone()]
    }
}

/// Cut `text` into ranges of at most `limit` bytes at whitespace.
/// A single word longer than `limit` is kept whole.
fn split_at_whitespace(text: &[u8], limit: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while text.len() - start > limit {
        let window = &text[start..start + limit];
        let cut = match memchr::memrchr3(b' ', b'\n', b'\t', window) {
            Some(i) => start + i + 1,
            None => match memchr::memchr3(b' ', b'\n', b'\t', &text[start + limit..]) {
                Some(i) => start + limit + i + 1,
                None => text.len(),
            },
        };
        ranges.push(start..cut);
        start = cut;
    }
    if start < text.len() {
        ranges.push(start..text.len());
    }
    ranges
}

/// Pieces of one document with their position bases
fn document_pieces(doc_id: DocId, text: &[u8], limit: usize) -> Vec<ShardPiece> {
    if text.len() <= limit {
        return vec![ShardPiece {
            doc_id,
            range: 0..text.len(),
            base: 0,
        }];
    }

    let ranges = split_at_whitespace(text, limit);
    let counts: Vec<u32> = ranges
        .par_iter()
        .map(|r| count_words(&text[r.clone()]))
        .collect();

    let mut base = 0;
    ranges
        .into_iter()
        .zip(counts)
        .map(|(range, count)| {
            let piece = ShardPiece { doc_id, range, base };
            base += count;
            piece
        })
        .collect()
}

/// Pack consecutive documents into shards of roughly `shard_bytes`
pub fn plan_shards(corpus: &Corpus, shard_bytes: u64) -> Vec<Shard> {
    let limit = shard_bytes.max(1) as usize;
    let mut shards = Vec::new();
    let mut current = Shard::default();

    for (doc_id, doc) in corpus.documents().iter().enumerate() {
        for piece in document_pieces(doc_id as DocId, doc.bytes(), limit) {
            let len = piece.range.len() as u64;
            if !current.pieces.is_empty() && current.bytes + len > shard_bytes {
                let id = shards.len();
                shards.push(std::mem::replace(
                    &mut current,
                    Shard {
                        id: id + 1,
                        ..Default::default()
                    },
                ));
            }
            current.bytes += len;
            current.pieces.push(piece);
        }
    }
    if !current.pieces.is_empty() {
        shards.push(current);
    }
    shards
}
