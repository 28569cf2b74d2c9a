//! The file server: exports one or more directory trees over [`crate::rpc`]
//! and notifies session-semantics clients when a watched file changes.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::codec;
use crate::fs::descriptor::{self, FileDescriptor};
use crate::fs::records::{
    CreateRequest, CreateResponse, GetAttributeRequest, GetAttributeResponse, MountRequest,
    MountResponse, ReadRequest, ReadResponse, RemoveRequest, RemoveResponse,
    UpdateAttributeRequest, UpdateAttributeResponse, UpdateCallbackPromiseRequest,
    UpdateCallbackPromiseResponse, UnmountRequest, UnmountResponse, WriteRequest, WriteResponse,
};
use crate::fs::types::FileSystemType;
use crate::rpc;
use crate::store;
use crate::Error;

/// The file server: holds the exported root set and its file-index trees,
/// and implements the eight `FileServer.*` methods.
///
/// Registered on an [`rpc::Server`] via [`FileServer::register_handlers`];
/// callers never invoke the methods below directly over the wire, only
/// through the registered handler table.
pub struct FileServer {
    /// `exported_root_path -> index tree root`, one tree per exported root,
    /// built once at startup by a recursive directory walk.
    roots: Vec<(PathBuf, Arc<FileDescriptor>)>,
    /// Lazily-dialed clients used to broadcast invalidations, keyed by the
    /// subscriber's address. Broadcasts are fire-and-forget: a dial or call
    /// failure here is logged and otherwise ignored.
    broadcast_clients: DashMap<String, Arc<rpc::Client>>,
    broadcast_config: rpc::Config,
}

impl FileServer {
    /// Builds a file server exporting each of `export_roots`, walking each
    /// one to construct its initial index tree.
    pub fn new(export_roots: &[PathBuf]) -> Result<Arc<Self>, Error> {
        let mut roots = Vec::with_capacity(export_roots.len());
        for root in export_roots {
            roots.push((root.clone(), build_index_tree(root)?));
        }

        Ok(Arc::new(Self {
            roots,
            broadcast_clients: DashMap::new(),
            broadcast_config: rpc::Config {
                retry_limit: 3,
                ..rpc::Config::default()
            },
        }))
    }

    /// Registers all eight service methods on `server` under
    /// `"FileServer.<Method>"`.
    pub fn register_handlers(self: &Arc<Self>, server: &rpc::Server) -> Result<(), Error> {
        macro_rules! register {
            ($method:literal, $req:ty, $call:ident) => {{
                let this = Arc::clone(self);
                server.register(
                    concat!("FileServer.", $method),
                    Box::new(move |body: &[u8]| {
                        let req = codec::decode_body::<$req>(body)?;
                        let reply = this.$call(req)?;
                        Ok(codec::encode_body(&reply))
                    }),
                )?;
            }};
        }

        register!("Mount", MountRequest, mount);
        register!("Unmount", UnmountRequest, unmount);
        register!("GetAttribute", GetAttributeRequest, get_attribute);
        register!("UpdateAttribute", UpdateAttributeRequest, update_attribute);
        register!("Create", CreateRequest, create);
        register!("Read", ReadRequest, read);
        register!("Write", WriteRequest, write);
        register!("Remove", RemoveRequest, remove);
        Ok(())
    }

    /// Resolves `file_path` against every exported root by suffix search,
    /// returning the owning root's absolute disk path, its tree root, and
    /// the matched descriptor.
    fn find(&self, file_path: &str) -> Result<(&PathBuf, &Arc<FileDescriptor>, Arc<FileDescriptor>), Error> {
        for (root_path, tree) in &self.roots {
            if let Some(fd) = descriptor::search(tree, file_path) {
                return Ok((root_path, tree, fd));
            }
        }
        Err(Error::NotExist(file_path.to_owned()))
    }

    fn absolute_path(&self, root_path: &PathBuf, fd_path: &str) -> PathBuf {
        root_path.join(fd_path.trim_start_matches('/'))
    }

    fn mount(&self, req: MountRequest) -> Result<MountResponse, Error> {
        let (_, _, fd) = self.find(&req.file_path)?;

        let callback_promise = if req.fstype == FileSystemType::Session {
            fd.subscription
                .as_ref()
                .expect("server descriptors always carry a subscription")
                .subscribe(&req.client_id, &req.client_addr);
            true
        } else {
            false
        };

        Ok(MountResponse {
            is_dir: fd.is_dir,
            file_path: fd.path.clone(),
            children_paths: fd.children_paths_joined(),
            size: fd.size.load(std::sync::atomic::Ordering::SeqCst) as i64,
            last_modified: fd.last_modified.load(std::sync::atomic::Ordering::SeqCst),
            callback_promise,
        })
    }

    fn unmount(&self, req: UnmountRequest) -> Result<UnmountResponse, Error> {
        let (_, _, fd) = self.find(&req.file_path)?;
        if let Some(sub) = &fd.subscription {
            sub.unsubscribe(&req.client_id);
        }
        Ok(UnmountResponse { is_success: true })
    }

    fn get_attribute(&self, req: GetAttributeRequest) -> Result<GetAttributeResponse, Error> {
        let (_, _, fd) = self.find(&req.file_path)?;
        Ok(GetAttributeResponse {
            is_dir: fd.is_dir,
            file_path: fd.path.clone(),
            file_seeker: fd.seeker.load(std::sync::atomic::Ordering::SeqCst) as i64,
            last_modified: fd.last_modified.load(std::sync::atomic::Ordering::SeqCst),
        })
    }

    fn update_attribute(
        &self,
        req: UpdateAttributeRequest,
    ) -> Result<UpdateAttributeResponse, Error> {
        use std::sync::atomic::Ordering;

        let (_, _, fd) = self.find(&req.file_path)?;
        let incr = req.file_seeker_increment as u64;

        loop {
            let current = fd.seeker.load(Ordering::SeqCst);
            let size = fd.size.load(Ordering::SeqCst);
            if current + incr > size {
                return Err(Error::OffsetPastEnd);
            }
            if fd
                .seeker
                .compare_exchange(current, current + incr, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(UpdateAttributeResponse {
                    file_seeker_position: current as i64,
                    is_success: true,
                });
            }
        }
    }

    fn create(&self, req: CreateRequest) -> Result<CreateResponse, Error> {
        let parent_path = dirname(&req.file_path);
        let (root_path, tree, parent_fd) = self.find(&parent_path)?;
        if !parent_fd.is_dir {
            return Err(Error::IsNotDirectory(parent_path));
        }

        let absolute = self.absolute_path(root_path, &req.file_path);
        let already_exists = store::stat(&absolute).is_ok();
        store::create(&absolute)?;
        let last_modified = store::now_unix();

        if !already_exists {
            let fd = FileDescriptor::new_server(false, req.file_path.clone(), 0);
            fd.last_modified.store(last_modified, std::sync::atomic::Ordering::SeqCst);
            parent_fd.children.lock().push(fd);
            if let Some(sub) = &parent_fd.subscription {
                self.broadcast_invalidation(sub, &req.client_id, &parent_fd.path);
            }
        } else {
            fd_in_tree(tree, &req.file_path)
                .map(|fd| fd.size.store(0, std::sync::atomic::Ordering::SeqCst));
        }

        Ok(CreateResponse {
            is_success: true,
            last_modified,
        })
    }

    fn read(&self, req: ReadRequest) -> Result<ReadResponse, Error> {
        let (root_path, _, fd) = self.find(&req.file_path)?;
        if fd.is_dir {
            return Err(Error::IsDirectory(req.file_path));
        }
        let absolute = self.absolute_path(root_path, &fd.path);
        let data = store::read_whole(&absolute)?;
        Ok(ReadResponse { data })
    }

    fn write(&self, req: WriteRequest) -> Result<WriteResponse, Error> {
        let (root_path, _, fd) = self.find(&req.file_path)?;
        if fd.is_dir {
            return Err(Error::IsDirectory(req.file_path));
        }
        let absolute = self.absolute_path(root_path, &fd.path);
        store::overwrite(&absolute, &req.data)?;

        let now = store::now_unix();
        fd.last_modified.store(now, std::sync::atomic::Ordering::SeqCst);
        fd.size.store(req.data.len() as u64, std::sync::atomic::Ordering::SeqCst);

        if let Some(sub) = &fd.subscription {
            self.broadcast_invalidation(sub, &req.client_id, &fd.path);
        }

        Ok(WriteResponse {
            n: req.data.len() as i64,
        })
    }

    fn remove(&self, req: RemoveRequest) -> Result<RemoveResponse, Error> {
        let (root_path, tree, fd) = self.find(&req.file_path)?;
        if fd.is_dir {
            return Err(Error::IsDirectory(req.file_path));
        }
        let absolute = self.absolute_path(root_path, &fd.path);
        std::fs::remove_file(&absolute).map_err(Error::Io)?;

        let removed = descriptor::remove_from_tree(tree, &fd.path);
        let parent_path = dirname(&fd.path);
        if let Some(parent) = descriptor::search(tree, &parent_path) {
            parent
                .last_modified
                .store(store::now_unix(), std::sync::atomic::Ordering::SeqCst);
            if let Some(sub) = &parent.subscription {
                self.broadcast_invalidation(sub, &req.client_id, &parent.path);
            }
        }

        Ok(RemoveResponse {
            is_removed: removed.is_some(),
        })
    }

    /// Fires `FileClient.UpdateCallbackPromise(file_path, is_valid=false)`
    /// at every subscriber except `exclude_client_id`, on a separate thread
    /// per subscriber so the caller's response is never delayed.
    fn broadcast_invalidation(
        &self,
        subscription: &descriptor::Subscription,
        exclude_client_id: &str,
        file_path: &str,
    ) {
        for (client_id, client_addr) in subscription.snapshot_excluding(exclude_client_id) {
            let client = match self.broadcast_clients.get(&client_addr) {
                Some(c) => Arc::clone(&c),
                None => match rpc::Client::dial(&client_addr, self.broadcast_config.clone()) {
                    Ok(c) => {
                        self.broadcast_clients
                            .insert(client_addr.clone(), Arc::clone(&c));
                        c
                    }
                    Err(e) => {
                        log::warn!(
                            "file server: broadcast dial to {client_addr} for {client_id} failed: {e}"
                        );
                        continue;
                    }
                },
            };

            let file_path = file_path.to_owned();
            std::thread::spawn(move || {
                let req = UpdateCallbackPromiseRequest {
                    file_path,
                    is_valid_or_canceled: false,
                };
                if let Err(e) = client
                    .call::<_, UpdateCallbackPromiseResponse>("FileClient.UpdateCallbackPromise", &req)
                {
                    log::warn!("file server: broadcast to {client_id} failed: {e}");
                }
            });
        }
    }
}

fn fd_in_tree(tree: &Arc<FileDescriptor>, path: &str) -> Option<Arc<FileDescriptor>> {
    descriptor::search(tree, path)
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_owned(),
        None => String::new(),
    }
}

/// Walks `root` on disk and builds its index tree.
fn build_index_tree(root: &PathBuf) -> Result<Arc<FileDescriptor>, Error> {
    let root_stat = store::stat(root)?;
    let tree_root = FileDescriptor::new_server(root_stat.is_dir, "", root_stat.size);
    tree_root
        .last_modified
        .store(root_stat.last_modified, std::sync::atomic::Ordering::SeqCst);

    if !root_stat.is_dir {
        return Ok(tree_root);
    }

    let mut entries = store::walk(root)?;
    // Parents must be inserted before their children; sorting by path length
    // is a cheap way to guarantee a shallower entry precedes its descendants.
    entries.sort_by_key(|e| e.relative_path.len());

    for entry in entries {
        let parent_path = dirname(&entry.relative_path);
        let parent = descriptor::search(&tree_root, &parent_path)
            .unwrap_or_else(|| Arc::clone(&tree_root));
        let child = FileDescriptor::new_server(
            entry.stat.is_dir,
            entry.relative_path,
            entry.stat.size,
        );
        child
            .last_modified
            .store(entry.stat.last_modified, std::sync::atomic::Ordering::SeqCst);
        parent.children.lock().push(child);
    }

    Ok(tree_root)
}
