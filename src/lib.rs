//! # lexdex - out-of-core positional inverted index
//!
//! lexdex builds a compressed positional index over corpora larger than
//! memory and answers boolean, proximity, ordered and phrase queries
//! directly over the compressed postings.
//!
//! ## Architecture
//!
//! - [`index`] - shard planning, partial inversion, external merge, the
//!   index file format and its reader
//! - [`query`] - query parsing and evaluation
//! - [`config`] - build configuration
//! - [`output`] - result formatting
//! - [`utils`] - tokenizer and byte encodings
//!
//! ## Quick Start
//!
//! ```no_run
//! use lexdex::config::BuildConfig;
//! use lexdex::index::{Corpus, IndexBuilder, IndexReader};
//! use lexdex::query::QueryEngine;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let corpus = Corpus::open_dir(Path::new("books"))?;
//! IndexBuilder::new(BuildConfig::default())?.build(&corpus, Path::new("books.idx"))?;
//!
//! let reader = Arc::new(IndexReader::open(Path::new("books.idx"))?);
//! let engine = QueryEngine::new(reader);
//! let outcome = engine.execute("father & (brother | sister)")?;
//! println!("{} documents in {:?}", outcome.docs.len(), outcome.elapsed);
//! # Ok::<(), lexdex::error::LexdexError>(())
//! ```
//!
//! ## Pipeline
//!
//! 1. **Invert** - each shard of the corpus is tokenized on a worker thread
//!    and spilled to sorted segment files whenever its arena outgrows the
//!    memory budget
//! 2. **Merge** - segments are merged in parallel over disjoint first-byte
//!    ranges of the term space
//! 3. **Assemble** - partition runs are concatenated into one file with a
//!    front-coded dictionary and skip-indexed postings

pub mod config;
pub mod error;
pub mod index;
pub mod output;
pub mod query;
pub mod utils;
