#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipack::diff::{decode, encode};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the split between source and target.
    let payload = &data[1..];
    let split = usize::from(data[0]) * payload.len() / 255;
    let (source, target) = payload.split_at(split);

    let delta = encode(source, target);
    let decoded = decode(source, &delta).unwrap();
    assert_eq!(decoded, target);
});
