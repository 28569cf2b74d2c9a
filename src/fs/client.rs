//! The file client: mounts volumes under either cache-consistency regime and
//! serves reads/writes out of the local content cache.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::codec;
use crate::fs::cache::Cache;
use crate::fs::descriptor::{self, FileDescriptor};
use crate::fs::records::{
    CreateRequest, CreateResponse, GetAttributeRequest, GetAttributeResponse, MountRequest,
    MountResponse, ReadRequest, ReadResponse, UpdateAttributeRequest, UpdateAttributeResponse,
    UpdateCallbackPromiseRequest, UpdateCallbackPromiseResponse, UnmountRequest, UnmountResponse,
    WriteRequest, WriteResponse,
};
use crate::fs::types::{FileSystemType, Volume};
use crate::rpc;
use crate::Error;

/// Tunables specific to the file client: how often `POLLING` volumes
/// revalidate, and the optional auto-unmount lifetime of a mount.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often a `POLLING` volume revalidates each cached entry.
    pub poll_interval: Duration,
    /// If set, `mount` schedules an automatic `unmount` after this long.
    /// Default behavior (`None`) is "mount until explicit unmount".
    pub duration: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            duration: None,
        }
    }
}

/// A handle returned by [`FileClient::open`]/[`FileClient::create`],
/// identifying one file within one mounted volume.
#[derive(Clone)]
pub struct Fd {
    pub server_path: String,
    fstype: FileSystemType,
}

/// The file client: mounted volumes, the shared content cache, and the two
/// cache-consistency regimes.
pub struct FileClient {
    client_id: String,
    client_addr: String,
    stub: Arc<rpc::Client>,
    cache: Arc<Cache>,
    volumes: Mutex<HashMap<String, Arc<Volume>>>,
    config: ClientConfig,
    closing: Arc<AtomicBool>,
}

impl FileClient {
    /// Dials `server_addr`, binds a local RPC server at `bind_addr` to
    /// receive `FileClient.UpdateCallbackPromise` broadcasts, and returns a
    /// ready-to-mount client.
    pub fn new(
        client_id: &str,
        bind_addr: &str,
        server_addr: &str,
        rpc_config: rpc::Config,
        config: ClientConfig,
    ) -> Result<Arc<Self>, Error> {
        let stub = rpc::Client::dial(server_addr, rpc_config.clone())?;
        let cache = Arc::new(Cache::new());

        let client = Arc::new(Self {
            client_id: client_id.to_owned(),
            client_addr: bind_addr.to_owned(),
            stub,
            cache,
            volumes: Mutex::new(HashMap::new()),
            config,
            closing: Arc::new(AtomicBool::new(false)),
        });

        let callback_server = rpc::Server::bind(bind_addr, rpc_config)?;
        let client_for_handler = Arc::clone(&client);
        callback_server.register(
            "FileClient.UpdateCallbackPromise",
            Box::new(move |body: &[u8]| {
                let req = codec::decode_body::<UpdateCallbackPromiseRequest>(body)?;
                client_for_handler
                    .on_update_callback_promise(&req.file_path, req.is_valid_or_canceled);
                let reply = UpdateCallbackPromiseResponse { is_success: true };
                Ok(codec::encode_body(&reply))
            }),
        )?;
        std::thread::spawn(move || callback_server.accept());

        Ok(client)
    }

    /// Mounts `server_path` under `local_path`, recursively mounting every
    /// child path the server reports. Starts the polling coroutine if
    /// `fstype` is [`FileSystemType::Polling`].
    pub fn mount(
        self: &Arc<Self>,
        server_path: &str,
        local_path: &str,
        fstype: FileSystemType,
    ) -> Result<(), Error> {
        let root = self.mount_recursive(server_path, fstype)?;
        let volume = Arc::new(Volume {
            fstype,
            root: Arc::clone(&root),
        });

        self.volumes
            .lock()
            .insert(local_path.to_owned(), Arc::clone(&volume));

        if fstype == FileSystemType::Polling {
            let client = Arc::clone(self);
            std::thread::spawn(move || client.poll_loop(volume));
        }

        if let Some(duration) = self.config.duration {
            let client = Arc::clone(self);
            let local_path = local_path.to_owned();
            let server_path = server_path.to_owned();
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                let _ = client.unmount(&server_path, &local_path);
            });
        }

        Ok(())
    }

    fn mount_recursive(
        self: &Arc<Self>,
        server_path: &str,
        fstype: FileSystemType,
    ) -> Result<Arc<FileDescriptor>, Error> {
        let reply: MountResponse = self.stub.call(
            "FileServer.Mount",
            &MountRequest {
                client_id: self.client_id.clone(),
                client_addr: self.client_addr.clone(),
                file_path: server_path.to_owned(),
                fstype,
            },
        )?;

        let fd = FileDescriptor::new(reply.is_dir, reply.file_path.clone(), reply.size as u64);
        fd.last_modified.store(reply.last_modified, Ordering::SeqCst);
        let fd = Arc::new(fd);

        for child_path in reply.children_paths.split(':').filter(|p| !p.is_empty()) {
            let child = self.mount_recursive(child_path, fstype)?;
            fd.children.lock().push(child);
        }

        Ok(fd)
    }

    /// Unmounts `local_path`, telling the server to drop this client's
    /// subscription to `server_path`.
    pub fn unmount(&self, server_path: &str, local_path: &str) -> Result<(), Error> {
        let _reply: UnmountResponse = self.stub.call(
            "FileServer.Unmount",
            &UnmountRequest {
                client_id: self.client_id.clone(),
                file_path: server_path.to_owned(),
            },
        )?;
        self.volumes.lock().remove(local_path);
        Ok(())
    }

    /// Finds the mounted volume whose mount point is a prefix of
    /// `local_path`, returning the matched mount point alongside it.
    ///
    /// Mirrors the source's `checkMountingPoint`: a mount covers every path
    /// under its mount point, not just the point itself.
    fn find_volume(&self, local_path: &str) -> Option<(String, Arc<Volume>)> {
        self.volumes
            .lock()
            .iter()
            .find(|(mount_point, _)| local_path.starts_with(mount_point.as_str()))
            .map(|(mount_point, volume)| (mount_point.clone(), Arc::clone(volume)))
    }

    /// Resolves `local_path` through its owning volume, primes the cache
    /// with a fresh `Read`, and attaches a callback promise under session
    /// semantics.
    pub fn open(&self, local_path: &str) -> Result<Fd, Error> {
        let (mount_point, volume) = self
            .find_volume(local_path)
            .ok_or_else(|| Error::NotExist(local_path.to_owned()))?;
        let suffix = local_path.strip_prefix(&mount_point).unwrap_or(local_path);
        let fd = descriptor::search(&volume.root, suffix)
            .ok_or_else(|| Error::NotExist(local_path.to_owned()))?;

        self.prime_cache(&fd.path)?;

        if volume.fstype == FileSystemType::Session {
            fd.attach_callback_promise();
        }

        Ok(Fd {
            server_path: fd.path.clone(),
            fstype: volume.fstype,
        })
    }

    /// Creates `local_path` on the server (idempotent-overwrite if it
    /// already exists) and opens it.
    pub fn create(&self, local_path: &str) -> Result<Fd, Error> {
        let (mount_point, volume) = self
            .find_volume(local_path)
            .ok_or_else(|| Error::NotExist(local_path.to_owned()))?;
        let suffix = local_path.strip_prefix(&mount_point).unwrap_or(local_path);
        let server_path = format!("{}{}", volume.root.path, suffix);

        let reply: CreateResponse = self.stub.call(
            "FileServer.Create",
            &CreateRequest {
                client_id: self.client_id.clone(),
                file_path: server_path.clone(),
            },
        )?;
        if !reply.is_success {
            return Err(Error::NotExist(local_path.to_owned()));
        }

        if descriptor::search(&volume.root, &server_path).is_none() {
            let fd = Arc::new(FileDescriptor::new(false, server_path.clone(), 0));
            fd.last_modified.store(reply.last_modified, Ordering::SeqCst);
            descriptor::add_to_tree(&volume.root, fd);
        }

        self.cache.evict(&server_path);
        self.prime_cache(&server_path)?;

        Ok(Fd {
            server_path,
            fstype: volume.fstype,
        })
    }

    fn prime_cache(&self, server_path: &str) -> Result<(), Error> {
        let stub = &self.stub;
        let client_id = self.client_id.clone();
        let path = server_path.to_owned();
        self.cache.get_or_fill(server_path, move || {
            let reply: ReadResponse = stub.call(
                "FileServer.Read",
                &ReadRequest {
                    client_id: client_id.clone(),
                    file_path: path.clone(),
                },
            )?;
            Ok(reply.data)
        })?;
        Ok(())
    }

    /// Idempotent read: does not touch the server-side seeker.
    pub fn read_at(&self, fd: &Fd, offset: usize, n: usize) -> Result<Vec<u8>, Error> {
        self.prime_cache(&fd.server_path)?;
        let entry = self
            .cache
            .get(&fd.server_path)
            .expect("just primed above");
        let buf = entry.read();
        let end = (offset + n).min(buf.len());
        if offset > buf.len() {
            return Ok(Vec::new());
        }
        Ok(buf[offset..end].to_vec())
    }

    /// Non-idempotent read: advances the server-side seeker by `n` and
    /// returns the resulting disjoint slice.
    pub fn read(&self, fd: &Fd, n: usize) -> Result<Vec<u8>, Error> {
        self.prime_cache(&fd.server_path)?;

        let reply: UpdateAttributeResponse = self.stub.call(
            "FileServer.UpdateAttribute",
            &UpdateAttributeRequest {
                client_id: self.client_id.clone(),
                file_path: fd.server_path.clone(),
                file_seeker_increment: n as i64,
            },
        )?;
        if !reply.is_success {
            return Err(Error::OffsetPastEnd);
        }

        let entry = self
            .cache
            .get(&fd.server_path)
            .expect("just primed above");
        let buf = entry.read();
        let start = reply.file_seeker_position as usize;
        let end = (start + n).min(buf.len());
        if start > buf.len() {
            return Ok(Vec::new());
        }
        Ok(buf[start..end].to_vec())
    }

    /// Splices `data` at `offset` in the local buffer. Under `POLLING` this
    /// writes through immediately; under `SESSION` the write is deferred to
    /// `close`.
    pub fn write(&self, fd: &Fd, offset: usize, data: &[u8]) -> Result<usize, Error> {
        self.prime_cache(&fd.server_path)?;
        let entry = self
            .cache
            .get(&fd.server_path)
            .expect("just primed above");
        entry.splice_at(offset, data);

        if fd.fstype == FileSystemType::Polling {
            self.write_through(&fd.server_path, &entry)?;
        }

        Ok(data.len())
    }

    /// Under session semantics, flushes a dirty buffer back to the server.
    /// A no-op otherwise.
    pub fn close(&self, fd: &Fd) -> Result<(), Error> {
        if fd.fstype != FileSystemType::Session {
            return Ok(());
        }
        let Some(entry) = self.cache.get(&fd.server_path) else {
            return Ok(());
        };
        if entry.is_dirty() {
            self.write_through(&fd.server_path, &entry)?;
        }
        Ok(())
    }

    fn write_through(&self, server_path: &str, entry: &crate::fs::cache::Entry) -> Result<(), Error> {
        let buf = entry.read();
        let reply: WriteResponse = self.stub.call(
            "FileServer.Write",
            &WriteRequest {
                client_id: self.client_id.clone(),
                file_path: server_path.to_owned(),
                data: buf,
            },
        )?;
        if reply.n >= 0 {
            entry.clear_dirty();
        }
        Ok(())
    }

    /// Server-facing notification handler: the file server calls this
    /// (registered at startup by [`FileClient::new`]) when a watched file
    /// changes. Eviction forces the next access to reload; the matching
    /// descriptor's callback promise (if any volume attached one) is marked
    /// invalid too, so a holder of the `Fd` can observe the same fact via
    /// [`descriptor::CallbackPromise::is_valid`].
    fn on_update_callback_promise(&self, file_path: &str, is_valid: bool) {
        if !is_valid {
            self.cache.evict(file_path);
            for volume in self.volumes.lock().values() {
                if let Some(fd) = descriptor::search(&volume.root, file_path) {
                    if let Some(promise) = fd.callback_promise() {
                        promise.set_valid(false);
                    }
                }
            }
        }
    }

    fn poll_loop(self: Arc<Self>, volume: Arc<Volume>) {
        let paths = collect_file_paths(&volume.root);
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(self.config.poll_interval);

            for path in &paths {
                let Some(entry) = self.cache.get(path) else {
                    continue;
                };
                if entry.last_validated().elapsed() < self.config.poll_interval {
                    continue;
                }

                let reply: GetAttributeResponse = match self.stub.call(
                    "FileServer.GetAttribute",
                    &GetAttributeRequest {
                        client_id: self.client_id.clone(),
                        file_path: path.clone(),
                    },
                ) {
                    Ok(r) => r,
                    Err(e) => {
                        log::warn!("file client: poll GetAttribute({path}) failed: {e}");
                        continue;
                    }
                };

                if reply.last_modified == entry.server_last_modified() {
                    entry.mark_validated();
                    continue;
                }

                match self.stub.call::<_, ReadResponse>(
                    "FileServer.Read",
                    &ReadRequest {
                        client_id: self.client_id.clone(),
                        file_path: path.clone(),
                    },
                ) {
                    Ok(read_reply) => {
                        entry.replace(read_reply.data);
                        entry.set_server_last_modified(reply.last_modified);
                    }
                    Err(e) => log::warn!("file client: poll Read({path}) failed: {e}"),
                }
            }
        }
    }
}

/// The server-relative paths of every non-directory descendant of `root`
/// (including `root` itself if it is a file).
fn collect_file_paths(root: &Arc<FileDescriptor>) -> Vec<String> {
    let mut out = Vec::new();
    collect_file_paths_into(root, &mut out);
    out
}

fn collect_file_paths_into(fd: &Arc<FileDescriptor>, out: &mut Vec<String>) {
    if !fd.is_dir {
        out.push(fd.path.clone());
    }
    for child in fd.children.lock().iter() {
        collect_file_paths_into(child, out);
    }
}
