#![no_main]

use libfuzzer_sys::fuzz_target;
use pubswap_wire::WireMessage;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the decoder
    if let Ok(msg) = WireMessage::decode(data) {
        let frame = msg.encode().expect("decoded message re-encodes");
        let again = WireMessage::decode(&frame).expect("re-encoded frame decodes");
        assert_eq!(msg, again);
    }

    // Stream-style decoding consumes whole frames only
    let mut rest = data;
    while let Ok(Some((_, used))) = WireMessage::decode_frame(rest) {
        assert!(used > 0 && used <= rest.len());
        rest = &rest[used..];
    }
});
