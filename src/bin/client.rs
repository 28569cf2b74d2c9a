//! A thin, non-interactive wrapper around [`driftfs::fs::FileClient`].
//!
//! ```text
//! driftfs-client <server_addr> <bind_addr> <client_id> <remote_path> <session|polling> <command> [args...]
//! ```
//!
//! where `<command>` is one of:
//!
//!   * `cat`             — read and print the whole file
//!   * `read <n>`        — non-idempotent read of `n` bytes, advancing the
//!     server-side seeker
//!   * `write <offset> <data>` — write `data` at `offset`, then close
//!
//! The source's interactive shell (`lib/golang/frontend`) is not reproduced;
//! each invocation performs one operation and exits.

use std::io::Write as _;

use driftfs::fs::{ClientConfig, FileClient, FileSystemType};
use driftfs::rpc;

fn usage() -> ! {
    eprintln!(
        "usage: driftfs-client <server_addr> <bind_addr> <client_id> <remote_path> <session|polling> cat"
    );
    eprintln!(
        "       driftfs-client <server_addr> <bind_addr> <client_id> <remote_path> <session|polling> read <n>"
    );
    eprintln!(
        "       driftfs-client <server_addr> <bind_addr> <client_id> <remote_path> <session|polling> write <offset> <data>"
    );
    std::process::exit(2);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 7 {
        usage();
    }

    let server_addr = &args[1];
    let bind_addr = &args[2];
    let client_id = &args[3];
    let remote_path = &args[4];
    let fstype = match args[5].as_str() {
        "session" => FileSystemType::Session,
        "polling" => FileSystemType::Polling,
        other => {
            eprintln!("unknown file system type {other:?}, expected session|polling");
            std::process::exit(2);
        }
    };
    let command = args[6].as_str();

    let client = match FileClient::new(
        client_id,
        bind_addr,
        server_addr,
        rpc::Config::default(),
        ClientConfig::default(),
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to start file client: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = client.mount(remote_path, remote_path, fstype) {
        eprintln!("mount {remote_path} failed: {e}");
        std::process::exit(1);
    }

    let result = match command {
        "cat" => run_cat(&client, remote_path),
        "read" => {
            let Some(n) = args.get(7).and_then(|s| s.parse::<usize>().ok()) else {
                usage();
            };
            run_read(&client, remote_path, n)
        }
        "write" => {
            let (Some(offset), Some(data)) = (
                args.get(7).and_then(|s| s.parse::<usize>().ok()),
                args.get(8),
            ) else {
                usage();
            };
            run_write(&client, remote_path, offset, data.as_bytes())
        }
        other => {
            eprintln!("unknown command {other:?}");
            usage();
        }
    };

    if let Err(e) = result {
        eprintln!("{command} {remote_path} failed: {e}");
        std::process::exit(1);
    }
}

fn run_cat(client: &FileClient, remote_path: &str) -> Result<(), driftfs::Error> {
    let fd = client.open(remote_path)?;
    let data = client.read_at(&fd, 0, usize::MAX)?;
    std::io::stdout().write_all(&data).ok();
    client.close(&fd)
}

fn run_read(client: &FileClient, remote_path: &str, n: usize) -> Result<(), driftfs::Error> {
    let fd = client.open(remote_path)?;
    let data = client.read(&fd, n)?;
    std::io::stdout().write_all(&data).ok();
    client.close(&fd)
}

fn run_write(
    client: &FileClient,
    remote_path: &str,
    offset: usize,
    data: &[u8],
) -> Result<(), driftfs::Error> {
    let fd = client.open(remote_path)?;
    client.write(&fd, offset, data)?;
    client.close(&fd)
}
