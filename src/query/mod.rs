pub mod algebra;
pub mod executor;
pub mod parser;

pub use executor::{QueryEngine, QueryOutcome};
pub use parser::{QueryNode, parse_query};
