#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipack::release::naming;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Anything that decodes must re-encode to a name that decodes the same.
    if let Some(name) = naming::decode(text) {
        assert_eq!(naming::decode(&name.filename()), Some(name));
    }
});
