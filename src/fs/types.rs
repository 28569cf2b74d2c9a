//! Shared types describing a client's mounted volumes.

use crate::Error;

/// The two selectable cache-consistency regimes a [`Volume`] may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemType {
    /// Andrew-style session semantics: callback promises, write-on-close.
    Session,
    /// Sun-NFS-style timestamp polling: one-copy update, write-through.
    Polling,
}

impl FileSystemType {
    /// The literal token carried in `Mount`'s `fstype` field.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Session => "SESSION",
            Self::Polling => "POLLING",
        }
    }

    /// Parses a wire token produced by [`FileSystemType::as_wire_str`].
    pub fn from_wire_str(s: &str) -> Result<Self, Error> {
        match s {
            "SESSION" => Ok(Self::Session),
            "POLLING" => Ok(Self::Polling),
            other => Err(Error::BadEncoding(format!("unknown file system type {other:?}"))),
        }
    }
}

/// A client-side mount: the consistency regime in effect and the root of
/// the mounted descriptor tree.
pub struct Volume {
    /// The consistency regime this volume was mounted under.
    pub fstype: FileSystemType,
    /// Root of the mounted descriptor tree.
    pub root: std::sync::Arc<crate::fs::descriptor::FileDescriptor>,
}
