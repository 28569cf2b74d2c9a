//! The file service built on top of [`crate::rpc`]: a file server exporting
//! one or more directory trees, and a file client mounting them under either
//! cache-consistency regime.

pub mod cache;
pub mod client;
pub mod descriptor;
pub mod records;
pub mod server;
pub mod types;

pub use cache::Cache;
pub use client::{ClientConfig, Fd, FileClient};
pub use descriptor::FileDescriptor;
pub use server::FileServer;
pub use types::{FileSystemType, Volume};
