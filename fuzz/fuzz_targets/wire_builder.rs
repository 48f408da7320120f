#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pubswap_core::{Block, ContentKey, Topic};
use pubswap_wire::WireMessage;

#[derive(Arbitrary, Debug)]
enum Op {
    Subscribe(String, i32),
    CancelSubscribe(String),
    Publish(String, [u8; 32], i32),
    CancelPublish(String, [u8; 32]),
    Block(Vec<u8>),
}

#[derive(Arbitrary, Debug)]
struct Input {
    full: bool,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let mut msg = WireMessage::new(input.full);
    for op in input.ops {
        match op {
            Op::Subscribe(t, p) => msg.add_subscribe(Topic::from(t), p),
            Op::CancelSubscribe(t) => msg.cancel_subscribe(Topic::from(t)),
            Op::Publish(t, k, p) => msg.add_publish(Topic::from(t), ContentKey::new(k), p),
            Op::CancelPublish(t, k) => msg.cancel_publish(Topic::from(t), ContentKey::new(k)),
            Op::Block(data) => msg.add_block(Block::new(data)),
        }
    }

    // Oversized messages and topics are refused, everything else round-trips
    if let Ok(frame) = msg.encode() {
        let decoded = WireMessage::decode(&frame).expect("encoded frame decodes");
        assert_eq!(decoded, msg);
    }
});
