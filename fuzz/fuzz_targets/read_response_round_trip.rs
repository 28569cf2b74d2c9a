#![no_main]

use libfuzzer_sys::fuzz_target;

use driftfs::codec;
use driftfs::fs::records::ReadResponse;

fuzz_target!(|data: &[u8]| {
    let header = codec::Header {
        service_method: "FileServer.Read".to_owned(),
        sequence: 1,
        error: String::new(),
    };
    let datagram = codec::wrap_message(&header, &codec::encode_body(&ReadResponse {
        data: data.to_vec(),
    }));

    // Whatever arbitrary bytes the fuzzer picked for the body's data field,
    // decoding our own encoding must reproduce it exactly.
    let (_, got): (_, ReadResponse) =
        codec::decode(&datagram).expect("decode of our own encoding");
    assert_eq!(got.data, data);
});
