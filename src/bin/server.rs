//! A thin wrapper running a [`driftfs::fs::FileServer`] over UDP.
//!
//! Exported roots come from `DRIFTFS_EXPORT_ROOTS` (colon-separated absolute
//! paths), matching the source's `EXPORT_ROOT_PATHS`. Binds to
//! `DRIFTFS_BIND_ADDR` (default `127.0.0.1:9000`). `DRIFTFS_SEMANTICS` selects
//! `at-least-once` or `at-most-once` (default); logging is controlled by
//! `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use driftfs::fs::FileServer;
use driftfs::rpc::{self, Semantics};

fn main() {
    env_logger::init();

    let bind_addr =
        std::env::var("DRIFTFS_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_owned());

    let export_roots: Vec<PathBuf> = std::env::var("DRIFTFS_EXPORT_ROOTS")
        .unwrap_or_else(|_| {
            eprintln!("DRIFTFS_EXPORT_ROOTS not set, exporting nothing");
            String::new()
        })
        .split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect();

    let semantics = match std::env::var("DRIFTFS_SEMANTICS").as_deref() {
        Ok("at-least-once") => Semantics::AtLeastOnce,
        _ => Semantics::AtMostOnce,
    };

    let config = rpc::Config {
        semantics,
        ..rpc::Config::default()
    };

    let file_server = match FileServer::new(&export_roots) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("failed to build file server: {e}");
            std::process::exit(1);
        }
    };

    let server = match rpc::Server::bind(&bind_addr, config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = file_server.register_handlers(&server) {
        eprintln!("failed to register handlers: {e}");
        std::process::exit(1);
    }

    log::info!("driftfs server listening on {bind_addr}, exporting {export_roots:?}");
    let server: Arc<rpc::Server> = server;
    server.accept();
}
