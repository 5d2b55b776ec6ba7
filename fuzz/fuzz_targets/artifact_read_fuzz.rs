#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipack::archive::read_artifact;

fuzz_target!(|data: &[u8]| {
    if let Ok(artifact) = read_artifact(data) {
        let _ = artifact.verify_payload();
    }
});
