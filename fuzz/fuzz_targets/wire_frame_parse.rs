#![no_main]

use libfuzzer_sys::fuzz_target;
use picteus_protocol::{
    best_effort_context_id, build_error_ack_frame, classify_wire_frame_parse_error,
    encode_wire_frame, parse_wire_frame, ErrorKind, WireError,
};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    match parse_wire_frame(&raw) {
        Ok(frame) => {
            let encoded = encode_wire_frame(&frame).expect("parsed frame must encode");
            let reparsed = parse_wire_frame(&encoded).expect("encoded frame must parse");
            assert_eq!(reparsed.context_id(), frame.context_id());
        }
        Err(error) => {
            let code = classify_wire_frame_parse_error(&error);
            assert!(!code.trim().is_empty());
            if let Some(context_id) = best_effort_context_id(&raw) {
                assert!(!context_id.trim().is_empty());
                let reply = build_error_ack_frame(
                    &context_id,
                    WireError::new(ErrorKind::Transport, error.to_string()),
                );
                let encoded = encode_wire_frame(&reply).expect("error ack must encode");
                assert!(parse_wire_frame(&encoded).is_ok());
            }
        }
    }
});
