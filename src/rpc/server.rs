use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::codec::{self, Header};
use crate::rpc::config::Config;
use crate::Error;

/// A registered method handler.
///
/// Takes the raw body bytes of a request and returns the raw body bytes of
/// the reply, or an error to report back to the caller. Adapter code
/// (`fs::server`) populates this table once at startup; this is the
/// "explicit registration builder" substitute for the source's
/// reflection-based service registry (`pkg/golang/rpc/lab.go`).
pub type Handler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync>;

struct CachedResponse {
    timestamp: Instant,
    body: Vec<u8>,
}

/// An RPC server stub bound to a single UDP socket.
///
/// Holds a table of `"Service.Method"` handlers registered via
/// [`Server::register`], a per-peer reply cache used to suppress duplicate
/// requests under [`crate::rpc::Semantics::AtMostOnce`], and the background
/// threads that accept connections and sweep the expired cache entries.
pub struct Server {
    socket: UdpSocket,
    sending: Mutex<()>,
    methods: DashMap<String, Handler>,
    processed: DashMap<(SocketAddr, u64), CachedResponse>,
    config: Config,
    closing: Arc<AtomicBool>,
}

impl Server {
    /// Binds a new server stub to `addr`.
    pub fn bind(addr: &str, config: Config) -> Result<Arc<Self>, Error> {
        let socket = UdpSocket::bind(addr).map_err(|e| Error::Transport(e.to_string()))?;
        let server = Arc::new(Self {
            socket,
            sending: Mutex::new(()),
            methods: DashMap::new(),
            processed: DashMap::new(),
            config,
            closing: Arc::new(AtomicBool::new(false)),
        });

        let cleanup = Arc::clone(&server);
        std::thread::spawn(move || cleanup.background_clean_up());

        Ok(server)
    }

    /// Registers `handler` under `"service.method"`.
    ///
    /// Returns `Error::NoSuchMethod` wrapped as a string error if the name is
    /// already taken — this mirrors the source's `Register`, which rejects a
    /// duplicate service name.
    pub fn register(&self, service_method: &str, handler: Handler) -> Result<(), Error> {
        if self.methods.contains_key(service_method) {
            return Err(Error::BadEncoding(format!(
                "service method already registered: {service_method}"
            )));
        }
        self.methods.insert(service_method.to_owned(), handler);
        Ok(())
    }

    /// Runs the accept loop, spawning one thread per inbound datagram.
    ///
    /// Blocks the calling thread until [`Server::shutdown`] is called.
    pub fn accept(self: &Arc<Self>) {
        let mut buf = vec![0u8; codec::MAX_BUFFER_SIZE];
        loop {
            if self.closing.load(Ordering::SeqCst) {
                log::info!("rpc server: closing connection");
                return;
            }
            match self.socket.recv_from(&mut buf) {
                Ok((n, addr)) => {
                    let server = Arc::clone(self);
                    let data = buf[..n].to_vec();
                    std::thread::spawn(move || server.serve_datagram(addr, &data));
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    log::error!("rpc server: read udp error: {e}");
                    return;
                }
            }
        }
    }

    /// Signals [`Server::accept`] to return.
    pub fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn serve_datagram(&self, addr: SocketAddr, data: &[u8]) {
        let (header, body) = match codec::decode_header(data) {
            Ok(v) => v,
            Err(e) => {
                log::error!("rpc server: error decoding request: {e}");
                return;
            }
        };

        if self.config.semantics == crate::rpc::Semantics::AtMostOnce {
            let key = (addr, header.sequence);
            if let Some(cached) = self.processed.get(&key) {
                log::info!(
                    "rpc server: duplicated request {}-{}, sending cached result",
                    addr,
                    header.sequence
                );
                self.send_reply(addr, &cached.body);
                return;
            }
        }

        self.handle_request(addr, header, body);
    }

    fn handle_request(&self, addr: SocketAddr, mut header: Header, body: &[u8]) {
        let service_method = header.service_method.clone();
        let reply_body = match self.methods.get(&service_method) {
            Some(handler) => handler(body),
            None => Err(Error::NoSuchMethod(service_method)),
        };

        let reply_buf = match reply_body {
            Ok(body) => self.encode_reply(&header, body),
            Err(e) => {
                header.error = e.wire_string();
                self.encode_reply(&header, Vec::new())
            }
        };

        if self.config.semantics == crate::rpc::Semantics::AtMostOnce {
            self.processed.insert(
                (addr, header.sequence),
                CachedResponse {
                    timestamp: Instant::now(),
                    body: reply_buf.clone(),
                },
            );
        }

        self.send_reply(addr, &reply_buf);
    }

    fn encode_reply(&self, header: &Header, body: Vec<u8>) -> Vec<u8> {
        codec::wrap_message(header, &body)
    }

    fn send_reply(&self, addr: SocketAddr, buf: &[u8]) {
        let _guard = self.sending.lock();

        if fastrand::f64() < self.config.p_drop_server_reply {
            log::info!("rpc server: reply to {addr} sent but dropped (simulated loss)");
            return;
        }

        if let Err(e) = self.socket.send_to(buf, addr) {
            log::error!("rpc server: error writing reply to {addr}: {e}");
        }
    }

    fn background_clean_up(&self) {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(self.config.validity_period / 4);
            self.processed
                .retain(|_, cached| cached.timestamp.elapsed() <= self.config.validity_period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Field, FieldValue};
    use crate::rpc::Semantics;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Noop;
    impl codec::Record for Noop {
        const TYPE_NAME: &'static str = "Noop";
        fn to_fields(&self) -> Vec<Field> {
            vec![]
        }
        fn from_fields(_: Vec<(String, FieldValue)>) -> Result<Self, Error> {
            Ok(Self)
        }
    }

    /// A retransmitted `(peer, sequence)` under `AtMostOnce` must be served
    /// from the reply cache, never re-invoking the handler.
    #[test]
    fn test_at_most_once_suppresses_duplicate_invocations() {
        let config = Config {
            semantics: Semantics::AtMostOnce,
            ..Config::default()
        };
        let server = Server::bind("127.0.0.1:0", config).expect("bind");
        let server_addr = server.socket.local_addr().expect("server local addr");

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        server
            .register(
                "Echo.Ping",
                Box::new(move |_body: &[u8]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(codec::encode_body(&Noop))
                }),
            )
            .expect("register");

        let accept_server = Arc::clone(&server);
        std::thread::spawn(move || accept_server.accept());

        let caller = UdpSocket::bind("127.0.0.1:0").expect("bind caller");
        caller.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        caller.connect(server_addr).expect("connect caller");

        let header = Header {
            service_method: "Echo.Ping".to_owned(),
            sequence: 1,
            error: String::new(),
        };
        let datagram = codec::encode(&header, &Noop);

        let mut buf = [0u8; 1024];
        for _ in 0..6 {
            caller.send(&datagram).expect("send");
            caller.recv(&mut buf).expect("recv reply");
        }

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
