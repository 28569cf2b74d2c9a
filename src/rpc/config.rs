use std::time::Duration;

/// Invocation semantics a [`Client`](crate::rpc::Client) offers its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    /// Retransmit on timeout with no deduplication; a call may execute more
    /// than once at the server.
    AtLeastOnce,
    /// Retransmit on timeout; the server recognises and suppresses
    /// duplicates, so a call executes at most once.
    AtMostOnce,
}

/// Tunables shared by the client and server stubs.
///
/// Resolves the source's free-standing package constants
/// (`pkg/golang/rpc/client.go`, `pkg/golang/rpc/server.go`) into a single
/// record threaded through stub constructors.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a call waits for a reply before retransmitting.
    pub timeout: Duration,
    /// How many times a call is retransmitted before it fails with
    /// [`crate::Error::Unreachable`].
    ///
    /// Defaults to [`u64::MAX`], i.e. retry until success; set an explicit
    /// cap to get a bounded `Unreachable` failure instead.
    pub retry_limit: u64,
    /// Probability, in `[0.0, 1.0]`, that a client's outbound datagram is
    /// dropped before it reaches the network.
    pub p_drop_client_send: f64,
    /// Probability, in `[0.0, 1.0]`, that a server's reply datagram is
    /// dropped before it reaches the network.
    pub p_drop_server_reply: f64,
    /// Invocation semantics this stub provides.
    pub semantics: Semantics,
    /// How long a server retains a cached reply for duplicate suppression
    /// under [`Semantics::AtMostOnce`].
    pub validity_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10),
            retry_limit: u64::MAX,
            p_drop_client_send: 0.0,
            p_drop_server_reply: 0.0,
            semantics: Semantics::AtMostOnce,
            validity_period: Duration::from_secs(180),
        }
    }
}
