use crossbeam::channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::codec::{self, Header, Record};
use crate::rpc::config::Config;
use crate::Error;

/// An in-flight or completed call.
///
/// Mirrors the source's `Call` struct: a caller hands over a `done` channel
/// and receives the decoded reply or an error on it once the call settles.
pub struct Call<R> {
    seq: u64,
    done_rx: Receiver<Result<R, Error>>,
}

impl<R> Call<R> {
    /// Blocks until the call completes, returning its result.
    pub fn wait(self) -> Result<R, Error> {
        self.done_rx
            .recv()
            .unwrap_or(Err(Error::Shutdown))
    }

    /// The sequence number assigned to this call.
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

/// Outcome delivered to a call's background finisher thread.
enum RawReply {
    /// A datagram arrived and matched this call's sequence number.
    Data(Vec<u8>),
    /// The client stub was closed while this call was outstanding.
    Shutdown,
    /// The retry cap was reached without a matching reply.
    Unreachable(u64),
}

/// Bookkeeping for a call the retry thread may still retransmit.
struct Pending {
    body: Vec<u8>,
    attempts: AtomicU64,
    last_try: Mutex<Instant>,
    reply_tx: Sender<RawReply>,
}

/// A client-side RPC stub bound to one remote UDP peer.
///
/// There may be many outstanding [`Call`]s on a single `Client`, and a
/// `Client` may be shared across threads (it is `Send + Sync`).
pub struct Client {
    socket: UdpSocket,
    sending: Mutex<()>,
    seq: AtomicU64,
    pending: Arc<DashMap<u64, Pending>>,
    config: Config,
    closing: Arc<AtomicBool>,
}

impl Client {
    /// Connects to `addr` and starts the background receive and retry
    /// threads.
    pub fn dial(addr: &str, config: Config) -> Result<Arc<Self>, Error> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| Error::Transport(e.to_string()))?;
        socket
            .connect(addr)
            .map_err(|e| Error::Transport(e.to_string()))?;
        socket
            .set_read_timeout(Some(config.timeout))
            .map_err(|e| Error::Transport(e.to_string()))?;

        let client = Arc::new(Self {
            socket,
            sending: Mutex::new(()),
            seq: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            config,
            closing: Arc::new(AtomicBool::new(false)),
        });

        let recv_client = Arc::clone(&client);
        std::thread::spawn(move || recv_client.receive_loop());

        let retry_client = Arc::clone(&client);
        std::thread::spawn(move || retry_client.retry_loop());

        Ok(client)
    }

    /// Closes the underlying socket and fails every pending call with
    /// [`Error::Shutdown`].
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.terminate_all(Error::Shutdown);
    }

    fn terminate_all(&self, _err: Error) {
        for entry in self.pending.iter() {
            let _ = entry.value().reply_tx.send(RawReply::Shutdown);
        }
        self.pending.clear();
    }

    /// Invokes `service_method` asynchronously, returning a [`Call`] the
    /// caller can [`Call::wait`] on.
    pub fn go<A: Record, R: Record>(&self, service_method: &str, args: &A) -> Call<R> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (raw_tx, raw_rx) = bounded::<RawReply>(1);
        let (done_tx, done_rx) = bounded::<Result<R, Error>>(1);

        if self.closing.load(Ordering::SeqCst) {
            let _ = done_tx.send(Err(Error::Shutdown));
            return Call { seq, done_rx };
        }

        let header = Header {
            service_method: service_method.to_owned(),
            sequence: seq,
            error: String::new(),
        };
        let body = codec::encode(&header, args);

        self.pending.insert(
            seq,
            Pending {
                body: body.clone(),
                attempts: AtomicU64::new(0),
                last_try: Mutex::new(Instant::now()),
                reply_tx: raw_tx,
            },
        );

        self.send_datagram(seq, &body);

        let pending = Arc::clone(&self.pending);
        std::thread::spawn(move || {
            let result = match raw_rx.recv() {
                Ok(RawReply::Data(buf)) => codec::decode_header(&buf).and_then(|(header, body)| {
                    if !header.error.is_empty() {
                        Err(Error::from_wire_string(&header.error))
                    } else {
                        codec::decode_body::<R>(body)
                    }
                }),
                Ok(RawReply::Shutdown) | Err(_) => Err(Error::Shutdown),
                Ok(RawReply::Unreachable(attempts)) => Err(Error::Unreachable(attempts)),
            };
            pending.remove(&seq);
            let _ = done_tx.send(result);
        });

        Call { seq, done_rx }
    }

    /// Invokes `service_method` synchronously, blocking until a reply
    /// arrives or the retry cap is reached.
    pub fn call<A: Record, R: Record>(&self, service_method: &str, args: &A) -> Result<R, Error> {
        self.go::<A, R>(service_method, args).wait()
    }

    fn send_datagram(&self, seq: u64, body: &[u8]) {
        let _guard = self.sending.lock();

        if let Some(entry) = self.pending.get(&seq) {
            entry.attempts.fetch_add(1, Ordering::SeqCst);
        } else {
            return;
        }

        if fastrand::f64() < self.config.p_drop_client_send {
            log::info!("rpc client: packet seq {seq} sent but dropped (simulated loss)");
            return;
        }

        if let Err(e) = self.socket.send(body) {
            log::error!("rpc client: error sending datagram: {e}");
        }
    }

    fn receive_loop(&self) {
        let mut buf = vec![0u8; codec::MAX_BUFFER_SIZE];
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return;
            }
            match self.socket.recv(&mut buf) {
                Ok(n) => match codec::decode_header(&buf[..n]) {
                    Ok((header, _)) => {
                        if let Some((_, pending)) = self.pending.remove(&header.sequence) {
                            let _ = pending.reply_tx.send(RawReply::Data(buf[..n].to_vec()));
                        }
                    }
                    Err(e) => log::error!("rpc client: error decoding header: {e}"),
                },
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    log::error!("rpc client: error reading from socket: {e}");
                    if self.closing.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
        }
    }

    fn retry_loop(&self) {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(self.config.timeout / 4);

            let mut expired = Vec::new();
            for entry in self.pending.iter() {
                let seq = *entry.key();
                let pending = entry.value();
                if pending.attempts.load(Ordering::SeqCst) >= self.config.retry_limit {
                    expired.push(seq);
                    continue;
                }
                let mut last_try = pending.last_try.lock();
                if last_try.elapsed() >= self.config.timeout {
                    *last_try = Instant::now();
                    drop(last_try);
                    let body = pending.body.clone();
                    drop(entry);
                    self.send_datagram(seq, &body);
                }
            }

            for seq in expired {
                if let Some((_, pending)) = self.pending.remove(&seq) {
                    let attempts = pending.attempts.load(Ordering::SeqCst);
                    let _ = pending.reply_tx.send(RawReply::Unreachable(attempts));
                }
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Field, FieldValue};

    struct Ping;
    struct Pong;

    impl Record for Ping {
        const TYPE_NAME: &'static str = "Ping";
        fn to_fields(&self) -> Vec<Field> {
            vec![]
        }
        fn from_fields(_: Vec<(String, FieldValue)>) -> Result<Self, Error> {
            Ok(Self)
        }
    }

    impl Record for Pong {
        const TYPE_NAME: &'static str = "Pong";
        fn to_fields(&self) -> Vec<Field> {
            vec![]
        }
        fn from_fields(_: Vec<(String, FieldValue)>) -> Result<Self, Error> {
            Ok(Self)
        }
    }

    /// Reserves an address nothing is listening on, so calls made to it
    /// always exhaust their retry budget.
    fn unreachable_addr() -> String {
        let probe = UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
        probe.local_addr().expect("probe local addr").to_string()
    }

    #[test]
    fn test_retry_cap_exceeded_clears_pending_table() {
        let addr = unreachable_addr();
        let config = Config {
            timeout: std::time::Duration::from_millis(20),
            retry_limit: 3,
            ..Config::default()
        };
        let client = Client::dial(&addr, config).expect("dial");

        let err = client.call::<Ping, Pong>("Echo.Ping", &Ping).unwrap_err();
        assert!(matches!(err, Error::Unreachable(n) if n >= 3));
        assert_eq!(client.pending.len(), 0);
    }
}
