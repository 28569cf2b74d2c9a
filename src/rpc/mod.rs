//! The client and server RPC stubs: retransmission, duplicate suppression
//! and reply caching over UDP.
//!
//! A [`Client`] dials a server and exposes synchronous ([`Client::call`])
//! and asynchronous ([`Client::go`]) invocation. A [`Server`] binds a socket,
//! accepts datagrams and dispatches them to handlers registered with
//! [`Server::register`]. Both honour the [`Config`] passed at construction,
//! including the client/server packet-loss simulation used by the test
//! suite to exercise retransmission deterministically.

mod client;
mod config;
mod server;

pub use client::{Call, Client};
pub use config::{Config, Semantics};
pub use server::{Handler, Server};
