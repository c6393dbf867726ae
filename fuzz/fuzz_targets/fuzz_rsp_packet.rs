//! Fuzz target: debugserver packet decoder
//!
//! Feeds arbitrary bytes to `PacketDecoder` and drains every event.  A
//! decoded packet must re-encode to a packet that decodes to the same
//! payload.
//!
//! cargo fuzz run fuzz_rsp_packet

#![no_main]

use devtunnel::debug::packet::{PacketDecoder, PacketEvent, encode_packet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = PacketDecoder::new();
    decoder.feed(data);
    while let Ok(Some(event)) = decoder.next_event() {
        if let PacketEvent::Packet(payload) = event {
            let mut again = PacketDecoder::new();
            again.feed(&encode_packet(&payload));
            assert_eq!(
                again.next_event().ok().flatten(),
                Some(PacketEvent::Packet(payload))
            );
        }
    }
});
