#![no_main]

use libfuzzer_sys::fuzz_target;

use driftfs::codec;

fuzz_target!(|data: &[u8]| {
    // decode_header must never panic on arbitrary, possibly hostile,
    // attacker-controlled datagram bytes.
    let Ok((header, body)) = codec::decode_header(data) else {
        return;
    };

    // Re-wrapping a decoded header and body must decode back to the same
    // pair, the codec's only other entry point a malformed datagram could
    // reach.
    let rewrapped = codec::wrap_message(&header, body);
    let (header2, body2) = codec::decode_header(&rewrapped).expect("re-decode of our own output");
    assert_eq!(header, header2);
    assert_eq!(body, body2);
});
