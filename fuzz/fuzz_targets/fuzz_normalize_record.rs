#![no_main]
use libfuzzer_sys::fuzz_target;
use serial2csv::record::{normalize, DelimiterSet};

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let delimiters = DelimiterSet::default();
    for token in normalize(&line, &delimiters) {
        assert!(!token.is_empty());
        assert!(!token.chars().any(|c| c.is_whitespace() || delimiters.contains(c)));
    }
});
