//! Fuzz target: `MuxDecoder::feed`
//!
//! Drives arbitrary bytes into the tunnel frame decoder, split at every
//! position the first byte selects.  The decoder must never panic, every
//! frame it yields must respect the payload limit, and a reset decoder
//! must behave like a fresh one.
//!
//! cargo fuzz run fuzz_mux_decoder

#![no_main]

use devtunnel::tunnel::mux::{MAX_MUX_PAYLOAD, MuxDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let at = usize::from(split).min(rest.len());

    let mut decoder = MuxDecoder::new();
    let mut frames = Vec::new();
    if let Ok(f) = decoder.feed(&rest[..at]) {
        frames.extend(f);
        if let Ok(f) = decoder.feed(&rest[at..]) {
            frames.extend(f);
        }
    }
    for frame in &frames {
        assert!(frame.payload.len() <= MAX_MUX_PAYLOAD);
    }

    decoder.reset();
    let whole = decoder.feed(rest);
    let mut fresh = MuxDecoder::new();
    assert_eq!(whole.is_ok(), fresh.feed(rest).is_ok());
});
