//! End-to-end scenarios run against a real file server and one or more file
//! clients talking over loopback UDP, with a `tempfile` directory standing
//! in for the exported root.

use std::sync::Arc;
use std::time::Duration;

use driftfs::fs::{ClientConfig, FileClient, FileServer, FileSystemType};
use driftfs::rpc;

const CONTENTS: &str = "0123456789ABCDEFGHIJ0123456789ABCDEFGHIJ0123456789";

/// Binds an ephemeral UDP port and immediately releases it, returning the
/// address string. There is a small window in which another process could
/// steal the port; acceptable for a test harness on loopback.
fn reserve_addr() -> String {
    let sock = std::net::UdpSocket::bind("127.0.0.1:0").expect("reserve addr");
    sock.local_addr().expect("local addr").to_string()
}

fn start_server(export_root: &std::path::Path, config: rpc::Config) -> String {
    let addr = reserve_addr();
    let file_server = FileServer::new(&[export_root.to_path_buf()]).expect("build file server");
    let server = rpc::Server::bind(&addr, config).expect("bind server");
    file_server
        .register_handlers(&server)
        .expect("register handlers");
    std::thread::spawn(move || server.accept());
    // give the accept loop a moment to be ready to receive.
    std::thread::sleep(Duration::from_millis(20));
    addr
}

fn start_client(
    client_id: &str,
    server_addr: &str,
    rpc_config: rpc::Config,
    client_config: ClientConfig,
) -> Arc<FileClient> {
    let bind_addr = reserve_addr();
    FileClient::new(client_id, &bind_addr, server_addr, rpc_config, client_config)
        .expect("start file client")
}

#[test]
fn test_idempotent_read_under_loss() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), CONTENTS).expect("write fixture");

    let rpc_config = rpc::Config {
        p_drop_client_send: 0.5,
        p_drop_server_reply: 0.5,
        retry_limit: 50,
        timeout: Duration::from_millis(30),
        semantics: rpc::Semantics::AtMostOnce,
        ..rpc::Config::default()
    };
    let server_addr = start_server(dir.path(), rpc_config.clone());
    let client = start_client("c1", &server_addr, rpc_config, ClientConfig::default());

    client
        .mount("/a.txt", "/a.txt", FileSystemType::Session)
        .expect("mount");
    let fd = client.open("/a.txt").expect("open");

    let first = client.read_at(&fd, 0, 10).expect("read_at");
    assert_eq!(first, b"0123456789");

    // Idempotence: a second read_at with no intervening write returns the
    // same bytes.
    let second = client.read_at(&fd, 0, 10).expect("read_at again");
    assert_eq!(second, first);
}

#[test]
fn test_non_idempotent_read_interleaves_on_one_shared_seeker() {
    // The server keeps exactly one seeker per file, shared by every client
    // that has it mounted: `read` advances the same cursor regardless of
    // who called it.
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), CONTENTS).expect("write fixture");

    let rpc_config = rpc::Config::default();
    let server_addr = start_server(dir.path(), rpc_config.clone());

    let c1 = start_client("c1", &server_addr, rpc_config.clone(), ClientConfig::default());
    let c2 = start_client("c2", &server_addr, rpc_config, ClientConfig::default());

    c1.mount("/a.txt", "/a.txt", FileSystemType::Polling)
        .expect("c1 mount");
    c2.mount("/a.txt", "/a.txt", FileSystemType::Polling)
        .expect("c2 mount");

    let fd1 = c1.open("/a.txt").expect("c1 open");
    let fd2 = c2.open("/a.txt").expect("c2 open");

    assert_eq!(c1.read(&fd1, 10).unwrap(), b"0123456789");
    assert_eq!(c2.read(&fd2, 10).unwrap(), b"ABCDEFGHIJ");
    assert_eq!(c1.read(&fd1, 10).unwrap(), b"0123456789");
}

#[test]
fn test_non_idempotent_read_progresses_on_one_descriptor() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), CONTENTS).expect("write fixture");

    let rpc_config = rpc::Config::default();
    let server_addr = start_server(dir.path(), rpc_config.clone());
    let client = start_client("c1", &server_addr, rpc_config, ClientConfig::default());
    client
        .mount("/a.txt", "/a.txt", FileSystemType::Polling)
        .expect("mount");
    let fd = client.open("/a.txt").expect("open");

    assert_eq!(client.read(&fd, 10).unwrap(), b"0123456789");
    assert_eq!(client.read(&fd, 10).unwrap(), b"ABCDEFGHIJ");
}

#[test]
fn test_session_semantics_write_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), CONTENTS).expect("write fixture");

    let rpc_config = rpc::Config::default();
    let server_addr = start_server(dir.path(), rpc_config.clone());

    let c1 = start_client("c1", &server_addr, rpc_config.clone(), ClientConfig::default());
    let c2 = start_client("c2", &server_addr, rpc_config, ClientConfig::default());

    c1.mount("/a.txt", "/a.txt", FileSystemType::Session)
        .expect("c1 mount");
    c2.mount("/a.txt", "/a.txt", FileSystemType::Session)
        .expect("c2 mount");

    let fd1 = c1.open("/a.txt").expect("c1 open");
    let before = c1.read_at(&fd1, 0, 6).expect("c1 read before write");
    assert_eq!(before, b"012345");

    let fd2 = c2.open("/a.txt").expect("c2 open");
    c2.write(&fd2, 0, b"HELLO\n").expect("c2 write");
    c2.close(&fd2).expect("c2 close");

    // Give the broadcast a moment to land and invalidate c1's cache entry.
    std::thread::sleep(Duration::from_millis(100));

    let after = c1.read_at(&fd1, 0, 6).expect("c1 read after invalidation");
    assert_eq!(after, b"HELLO\n");
    let tail = c1.read_at(&fd1, 6, 10).expect("c1 read tail");
    assert_eq!(tail, b"6789ABCDEF");
}

#[test]
fn test_polling_write_through() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), CONTENTS).expect("write fixture");

    let rpc_config = rpc::Config::default();
    let server_addr = start_server(dir.path(), rpc_config.clone());
    let client_config = ClientConfig {
        poll_interval: Duration::from_millis(100),
        ..ClientConfig::default()
    };

    let c1 = start_client("c1", &server_addr, rpc_config.clone(), client_config.clone());
    let c2 = start_client("c2", &server_addr, rpc_config, client_config);

    c1.mount("/a.txt", "/a.txt", FileSystemType::Polling)
        .expect("c1 mount");
    c2.mount("/a.txt", "/a.txt", FileSystemType::Polling)
        .expect("c2 mount");

    let fd1 = c1.open("/a.txt").expect("c1 open");
    let fd2 = c2.open("/a.txt").expect("c2 open");

    c2.write(&fd2, 0, b"HELLO\n").expect("c2 write");

    // The polling coroutine revalidates at most every poll_interval; two
    // intervals is ample margin for the new content to surface.
    std::thread::sleep(Duration::from_millis(250));

    let after = c1.read_at(&fd1, 0, 6).expect("c1 read after poll");
    assert_eq!(after, b"HELLO\n");
}

#[test]
fn test_retry_cap_shutdown_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), CONTENTS).expect("write fixture");

    let rpc_config = rpc::Config {
        p_drop_client_send: 1.0,
        retry_limit: 3,
        timeout: Duration::from_millis(20),
        ..rpc::Config::default()
    };
    let server_addr = start_server(dir.path(), rpc::Config::default());
    let client = start_client("c1", &server_addr, rpc_config, ClientConfig::default());

    let err = client
        .mount("/a.txt", "/a.txt", FileSystemType::Session)
        .unwrap_err();
    assert!(matches!(err, driftfs::Error::Unreachable(n) if n >= 3));
}
