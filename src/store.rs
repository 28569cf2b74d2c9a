//! The on-disk backing store, implemented directly against `std::fs`.
//!
//! This is the file server's only point of contact with the real
//! filesystem; `fs::server` never calls `std::fs` directly.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Error;

/// `(is_dir, size, last_modified)` as observed on disk.
pub struct Stat {
    pub is_dir: bool,
    pub size: u64,
    pub last_modified: i64,
}

/// Reads the entire contents of `path`.
pub fn read_whole(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(map_io_error(path))
}

/// Overwrites `path` with `data`, creating it if necessary.
pub fn overwrite(path: &Path, data: &[u8]) -> Result<(), Error> {
    std::fs::write(path, data).map_err(map_io_error(path))
}

/// Creates an empty file at `path`, truncating it if it already exists.
pub fn create(path: &Path) -> Result<(), Error> {
    std::fs::File::create(path)
        .map(|_| ())
        .map_err(map_io_error(path))
}

/// Stats `path`.
pub fn stat(path: &Path) -> Result<Stat, Error> {
    let meta = std::fs::metadata(path).map_err(map_io_error(path))?;
    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(Stat {
        is_dir: meta.is_dir(),
        size: meta.len(),
        last_modified,
    })
}

/// `now` as unix seconds, used to stamp `last_modified` on `Write`.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One entry produced by [`walk`]: its path relative to the walked root, and
/// its stat.
pub struct WalkEntry {
    pub relative_path: String,
    pub stat: Stat,
}

/// Recursively walks `root`, returning every descendant in no particular
/// order (directories included). Used once at server startup to build the
/// initial index tree for an exported root.
pub fn walk(root: &Path) -> Result<Vec<WalkEntry>, Error> {
    let mut out = Vec::new();
    walk_into(root, root, &mut out)?;
    Ok(out)
}

fn walk_into(root: &Path, dir: &Path, out: &mut Vec<WalkEntry>) -> Result<(), Error> {
    for entry in std::fs::read_dir(dir).map_err(map_io_error(dir))? {
        let entry = entry.map_err(map_io_error(dir))?;
        let path = entry.path();
        let relative_path = relative_slash_path(root, &path);
        let stat = stat(&path)?;
        let is_dir = stat.is_dir;
        out.push(WalkEntry { relative_path, stat });
        if is_dir {
            walk_into(root, &path, out)?;
        }
    }
    Ok(())
}

/// Converts `path` into a slash-separated path relative to `root`, matching
/// the tree's path convention regardless of host path separator.
fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

fn map_io_error(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotExist(path.display().to_string())
        } else {
            Error::Io(e)
        }
    }
}
