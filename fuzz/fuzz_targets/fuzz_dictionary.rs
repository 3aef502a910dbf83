#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lexdex::index::dictionary::DictionaryBlock;

#[derive(Arbitrary, Debug)]
struct Input {
    block: Vec<u8>,
    restarts: Vec<u8>,
    term_count: u8,
    probe: String,
}

fuzz_target!(|input: Input| {
    let Ok(dict) = DictionaryBlock::new(&input.block, &input.restarts, input.term_count as u64)
    else {
        return;
    };
    for entry in dict.iter() {
        if entry.is_err() {
            break;
        }
    }
    let _ = dict.lookup(&input.probe);
    if let Ok(entries) = dict.prefix_iter(&input.probe) {
        for entry in entries {
            if entry.is_err() {
                break;
            }
        }
    }
});
