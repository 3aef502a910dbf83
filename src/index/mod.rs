pub mod build;
pub mod corpus;
pub mod dictionary;
pub mod docstore;
pub mod merge;
pub mod partial;
pub mod postings;
pub mod reader;
pub mod segment;
pub mod stats;
pub mod types;
pub mod writer;

pub use build::{BuildReport, BuildStats, IndexBuilder, UnitFailure};
pub use corpus::Corpus;
pub use docstore::DocStore;
pub use partial::AbortHandle;
pub use reader::IndexReader;
pub use types::*;
