#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Any input either parses or reports an offset inside the query
    if let Err(lexdex::error::LexdexError::QuerySyntax { position, .. }) =
        lexdex::query::parse_query(data)
    {
        assert!(position <= data.len());
    }
});
