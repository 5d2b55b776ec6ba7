#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipack::diff::{decode, header};

/// Streams declaring more output than this are skipped so a forged length
/// cannot exhaust the fuzzer's memory.
const MAX_TARGET: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    if header(data).is_ok_and(|h| h.target_len <= MAX_TARGET) {
        let _ = decode(&[], data);
    }

    if data.len() >= 2 {
        let split = data.len() / 2;
        let (source, delta) = data.split_at(split);
        if header(delta).is_ok_and(|h| h.target_len <= MAX_TARGET) {
            let _ = decode(source, delta);
        }
    }
});
