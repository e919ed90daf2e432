#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Frame decoding must never panic on arbitrary bytes. This exercises:
    // - header parsing robustness
    // - magic and protocol version validation
    // - opcode/status byte validation
    // - key/namespace/payload length limits
    // - buffer boundary conditions (partial frames)
    let mut buf = BytesMut::from(data);

    while let Ok(Some(msg)) = peridot_wire::OperationalMessage::decode(&mut buf) {
        // A frame that decoded must re-encode without error.
        let reencoded = msg.encode_to_bytes().expect("decoded frame must re-encode");
        assert!(!reencoded.is_empty());
    }
});
