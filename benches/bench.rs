use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hex_literal::hex;

use driftfs::codec::{self, Header};
use driftfs::fs::records::{MountRequest, ReadResponse};
use driftfs::fs::FileSystemType;

/// A reusable, string-heavy request record standing in for the source's
/// `AuthUnixParams` benchmark fixture: several length-prefixed strings plus
/// an enum encoded as a wire token.
fn mount_request() -> MountRequest {
    MountRequest {
        client_id: "bench-client-0001".to_owned(),
        client_addr: "127.0.0.1:45000".to_owned(),
        file_path: "/exports/home/bench/data/file.txt".to_owned(),
        fstype: FileSystemType::Session,
    }
}

pub fn header(c: &mut Criterion) {
    c.bench_function("decode_header", |b| {
        let header = Header {
            service_method: "FileServer.Read".to_owned(),
            sequence: 4242,
            error: String::new(),
        };
        let body = codec::encode_body(&mount_request());
        let datagram = codec::wrap_message(&header, &body);

        b.iter(|| {
            let (h, body_bytes) = codec::decode_header(black_box(&datagram)).unwrap();
            black_box((h, body_bytes))
        })
    });

    c.bench_function("decode_header_rejects_truncated_buffer", |b| {
        // A length prefix claiming more header bytes than the buffer holds;
        // exercises the error path `receive_loop`/`serve_datagram` hit on
        // every malformed or truncated datagram.
        let truncated = hex!("ff ff ff ff 00");

        b.iter(|| black_box(codec::decode_header(&truncated).is_err()))
    });
}

pub fn record_round_trip(c: &mut Criterion) {
    c.bench_function("encode_mount_request", |b| {
        let req = mount_request();
        b.iter(|| black_box(codec::encode_body(&req)))
    });

    c.bench_function("decode_mount_request", |b| {
        let body_buf = codec::encode_body(&mount_request());
        b.iter(|| {
            let req: MountRequest = codec::decode_body(black_box(&body_buf)).unwrap();
            black_box(req)
        })
    });

    c.bench_function("encode_decode_read_response_4kib", |b| {
        // A representative whole-file payload, well under the 50 KiB
        // datagram cap this codec enforces.
        let resp = ReadResponse {
            data: vec![0xABu8; 4096],
        };

        b.iter(|| {
            let buf = codec::encode_body(&resp);
            let got: ReadResponse = codec::decode_body(&buf).unwrap();
            black_box(got)
        })
    });
}

criterion_group!(benches, header, record_round_trip);
criterion_main!(benches);
