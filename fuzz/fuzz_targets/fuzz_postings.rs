#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lexdex::index::postings::{PostingsCursor, decode_postings};

#[derive(Arbitrary, Debug)]
struct Input {
    block: Vec<u8>,
    skip_interval: u8,
    seeks: Vec<u32>,
}

fuzz_target!(|input: Input| {
    let skip_interval = usize::from(input.skip_interval);
    let _ = decode_postings(&input.block, skip_interval);

    // Seeking through a malformed block must fail cleanly, never panic
    let Ok(mut cursor) = PostingsCursor::new(&input.block, skip_interval) else {
        return;
    };
    let mut last = 0;
    for target in input.seeks {
        let target = target.max(last);
        match cursor.seek(target) {
            Ok(Some(doc)) => {
                assert!(doc >= target);
                last = doc;
                let _ = cursor.positions();
            }
            Ok(None) | Err(_) => break,
        }
    }
});
