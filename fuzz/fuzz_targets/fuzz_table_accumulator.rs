#![no_main]
use libfuzzer_sys::fuzz_target;
use serial2csv::record::{normalize, DelimiterSet};
use serial2csv::table::TableAccumulator;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let delimiters = DelimiterSet::default();
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return;
    };
    let mut accumulator = TableAccumulator::new();
    let Ok(headers) = accumulator.establish_headers(&normalize(first, &delimiters), true) else {
        return;
    };
    let width = headers.len();
    for line in lines {
        let tokens = normalize(line, &delimiters);
        if let Ok(row) = accumulator.append_row(&tokens) {
            // Fields keep the exact text they were parsed from.
            assert!(row.iter().map(|field| field.text()).eq(tokens.iter().map(String::as_str)));
        }
    }
    let table = accumulator.into_table();
    assert!(table.rows().iter().all(|row| row.len() == width));
    let _ = table.preview(5);
});
