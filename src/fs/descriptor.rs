//! The file-index tree shared, in structurally analogous form, by the file
//! server and each mounted client volume.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// A node in a file-index tree.
///
/// Held independently (structurally analogous, never shared) by the file
/// server and each mounted client volume. Children are owned directly; there
/// are no back-pointers, so a tree can be dropped by dropping its root.
pub struct FileDescriptor {
    /// Whether this node is a directory (its contents live in `children`)
    /// or a plain file (its contents live in the store/cache, keyed by
    /// `path`).
    pub is_dir: bool,
    /// Path relative to the exported root this tree belongs to.
    pub path: String,
    /// File size in bytes; meaningless for directories.
    pub size: AtomicU64,
    /// Non-idempotent read cursor; authoritative only at the server.
    pub seeker: AtomicU64,
    /// Unix seconds; authoritative only at the server.
    pub last_modified: AtomicI64,
    /// Insertion-ordered children of a directory.
    pub children: Mutex<Vec<Arc<FileDescriptor>>>,
    /// Present only on server-held descriptors.
    pub subscription: Option<Subscription>,
    /// Set lazily by `open()` on client-held descriptors whose volume uses
    /// session semantics; absent otherwise. Interior-mutable because `open`
    /// attaches it to a descriptor already shared via `Arc`.
    pub callback_promise: Mutex<Option<Arc<CallbackPromise>>>,
}

impl FileDescriptor {
    /// Builds a fresh descriptor with no subscription and no callback
    /// promise attached; callers add whichever attachment fits their side.
    pub fn new(is_dir: bool, path: impl Into<String>, size: u64) -> Self {
        Self {
            is_dir,
            path: path.into(),
            size: AtomicU64::new(size),
            seeker: AtomicU64::new(0),
            last_modified: AtomicI64::new(0),
            children: Mutex::new(Vec::new()),
            subscription: None,
            callback_promise: Mutex::new(None),
        }
    }

    /// Builds a server-side descriptor, with an attached (initially empty)
    /// subscription set.
    pub fn new_server(is_dir: bool, path: impl Into<String>, size: u64) -> Arc<Self> {
        let mut fd = Self::new(is_dir, path, size);
        fd.subscription = Some(Subscription::new());
        Arc::new(fd)
    }

    /// Attaches a fresh, valid callback promise, as `open()` does under
    /// session semantics. Overwrites any promise already attached.
    pub fn attach_callback_promise(&self) -> Arc<CallbackPromise> {
        let promise = Arc::new(CallbackPromise::new());
        *self.callback_promise.lock() = Some(Arc::clone(&promise));
        promise
    }

    /// The attached callback promise, if any.
    pub fn callback_promise(&self) -> Option<Arc<CallbackPromise>> {
        self.callback_promise.lock().clone()
    }

    /// The colon-joined paths of this descriptor's immediate children, as
    /// carried in `Mount`'s reply.
    pub fn children_paths_joined(&self) -> String {
        self.children
            .lock()
            .iter()
            .map(|c| c.path.clone())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// The server-side subscriber set attached to a descriptor: which clients
/// should be notified when this file (or, for a directory, its listing)
/// changes.
pub struct Subscription {
    clients: Mutex<HashMap<String, String>>,
}

impl Subscription {
    /// An empty subscriber set.
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `client_id`, reachable at `client_addr`, wants
    /// `UpdateCallbackPromise` notifications for this descriptor.
    pub fn subscribe(&self, client_id: &str, client_addr: &str) {
        self.clients
            .lock()
            .insert(client_id.to_owned(), client_addr.to_owned());
    }

    /// Removes `client_id` from the subscriber set, if present.
    pub fn unsubscribe(&self, client_id: &str) {
        self.clients.lock().remove(client_id);
    }

    /// A snapshot of `(client_id, client_addr)` pairs, excluding
    /// `exclude_client_id`, taken under the lock so broadcasting never races
    /// a concurrent subscribe/unsubscribe.
    pub fn snapshot_excluding(&self, exclude_client_id: &str) -> Vec<(String, String)> {
        self.clients
            .lock()
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_client_id)
            .map(|(id, addr)| (id.clone(), addr.clone()))
            .collect()
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

/// The client-side half of the session-semantics regime: whether this
/// client's cached copy of a file is still known-valid.
pub struct CallbackPromise {
    valid: AtomicBool,
}

impl CallbackPromise {
    /// A fresh promise, valid until told otherwise.
    pub fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
        }
    }

    /// Whether the server has not yet reported this file changed since the
    /// promise was attached.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Records the server's `UpdateCallbackPromise` verdict.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }
}

impl Default for CallbackPromise {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first search for the first descriptor whose path ends with
/// `suffix_path`.
///
/// `O(n)` in tree size, acceptable at the teaching scale this service
/// targets.
pub fn search(root: &Arc<FileDescriptor>, suffix_path: &str) -> Option<Arc<FileDescriptor>> {
    if root.path.ends_with(suffix_path) {
        return Some(Arc::clone(root));
    }
    let children = root.children.lock().clone();
    for child in &children {
        if let Some(found) = search(child, suffix_path) {
            return Some(found);
        }
    }
    None
}

/// Finds the parent of `fd` by its `dirname` and appends `fd` as a new
/// child. No-op if the parent cannot be found.
pub fn add_to_tree(root: &Arc<FileDescriptor>, fd: Arc<FileDescriptor>) -> bool {
    let parent_path = dirname(&fd.path);
    match search(root, &parent_path) {
        Some(parent) => {
            parent.children.lock().push(fd);
            true
        }
        None => false,
    }
}

/// Finds the parent of `path` and drops the matching child, returning it.
pub fn remove_from_tree(root: &Arc<FileDescriptor>, path: &str) -> Option<Arc<FileDescriptor>> {
    let parent_path = dirname(path);
    let parent = search(root, &parent_path)?;
    let mut children = parent.children.lock();
    let idx = children.iter().position(|c| c.path == path)?;
    Some(children.remove(idx))
}

/// A small, dependency-free stand-in for `path::Dir` that operates on the
/// slash-separated relative paths this tree stores (never absolute
/// filesystem paths, which are the store's concern, not the tree's).
fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_owned(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &str) -> Arc<FileDescriptor> {
        Arc::new(FileDescriptor::new(false, path, 0))
    }

    #[test]
    fn test_search_finds_by_suffix() {
        let root = Arc::new(FileDescriptor::new(true, "", 0));
        let a = Arc::new(FileDescriptor::new(true, "/a", 0));
        let b = leaf("/a/b.txt");
        a.children.lock().push(b);
        root.children.lock().push(a);

        let found = search(&root, "b.txt").expect("must find b.txt");
        assert_eq!(found.path, "/a/b.txt");
        assert!(search(&root, "missing").is_none());
    }

    #[test]
    fn test_add_and_remove_from_tree() {
        let root = Arc::new(FileDescriptor::new(true, "", 0));
        let dir = Arc::new(FileDescriptor::new(true, "/dir", 0));
        root.children.lock().push(dir);

        let file = leaf("/dir/new.txt");
        assert!(add_to_tree(&root, file));
        assert_eq!(search(&root, "new.txt").unwrap().path, "/dir/new.txt");

        let removed = remove_from_tree(&root, "/dir/new.txt").unwrap();
        assert_eq!(removed.path, "/dir/new.txt");
        assert!(search(&root, "new.txt").is_none());
    }

    #[test]
    fn test_subscription_snapshot_excludes_writer() {
        let sub = Subscription::new();
        sub.subscribe("c1", "127.0.0.1:1");
        sub.subscribe("c2", "127.0.0.1:2");

        let snapshot = sub.snapshot_excluding("c1");
        assert_eq!(snapshot, vec![("c2".to_owned(), "127.0.0.1:2".to_owned())]);
    }

    #[test]
    fn test_callback_promise_defaults_valid() {
        let promise = CallbackPromise::new();
        assert!(promise.is_valid());
        promise.set_valid(false);
        assert!(!promise.is_valid());
    }
}
