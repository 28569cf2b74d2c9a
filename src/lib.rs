#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::print_stdout,
    missing_debug_implementations,
    unused_crate_dependencies,
    unreachable_pub,
    missing_docs
)]

mod error;
pub use error::Error;

pub mod codec;
pub mod fs;
pub mod rpc;
pub mod store;

// Unused crate lint workarounds for dev dependencies exercised only by
// separate compilation units: benches/bench.rs, tests/end_to_end.rs and
// src/bin/*.rs respectively.
#[cfg(test)]
use criterion as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use env_logger as _;
