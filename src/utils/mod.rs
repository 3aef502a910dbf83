//! Shared building blocks.
//!
//! - [`encoding`] - varints and a bounds-checked byte cursor
//! - [`tokenizer`] - word splitting and normalization for documents and queries
//! - [`progress`] - progress bars that vanish without the `progress` feature
//!
//! ```
//! use lexdex::utils::{Tokenizer, encode_varint};
//!
//! let words: Vec<_> = Tokenizer::new(b"Don't panic").collect();
//! assert_eq!(words[0], ("don't".to_string(), 0));
//!
//! let mut buf = Vec::new();
//! encode_varint(300, &mut buf);
//! assert_eq!(buf, [0xAC, 0x02]);
//! ```

pub mod encoding;
pub mod progress;
pub mod tokenizer;

pub use encoding::*;
pub use tokenizer::*;
