#![no_main]

use libfuzzer_sys::fuzz_target;
use picteus_protocol::{ErrorKind, Intent};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    match Intent::from_value(&raw) {
        Ok(intent) => {
            let encoded = intent.to_value().expect("parsed intent must encode");
            let reparsed = Intent::from_value(&encoded).expect("encoded intent must parse");
            assert_eq!(reparsed.kind(), intent.kind());
        }
        Err(error) => assert_eq!(error.kind(), ErrorKind::MalformedIntent),
    }
});
