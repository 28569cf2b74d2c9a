use thiserror::Error;

/// Error types returned by this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The datagram ended before the length prefix it announced.
    #[error("incomplete message (got {buffer_len} bytes, expected {expected})")]
    IncompleteMessage {
        /// The length of the buffer provided.
        buffer_len: usize,
        /// The length the prefix claimed.
        expected: usize,
    },

    /// A length-prefixed field's length would read past the end of the
    /// buffer, or a field type tag is not one of `string|bool|int64|[]byte`.
    #[error("invalid length or field encoding in message")]
    InvalidLength,

    /// `decode` found a body whose type name has no registered decoder, or
    /// whose fields don't match what the caller expected.
    #[error("bad encoding: {0}")]
    BadEncoding(String),

    /// A field's bytes are not valid UTF-8 where a string was expected.
    #[error("invalid utf-8 in field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// `service_method` did not contain exactly one `.` separator.
    #[error("malformed method name {0:?}")]
    MalformedMethod(String),

    /// No service is registered under that name, or it has no such method.
    #[error("no such method {0:?}")]
    NoSuchMethod(String),

    /// The stub has been closed; the call could not be completed.
    #[error("rpc stub is shut down")]
    Shutdown,

    /// The retry cap was exceeded without a matching reply.
    #[error("rpc peer unreachable after {0} attempts")]
    Unreachable(u64),

    /// A datagram read or write failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A path did not resolve under any exported root, or a lookup by path
    /// suffix found nothing.
    #[error("no such file or directory: {0}")]
    NotExist(String),

    /// An operation that requires creating a fresh entry found one already
    /// there.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An operation expecting a plain file was given a directory.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// An operation expecting a directory was given a plain file.
    #[error("is not a directory: {0}")]
    IsNotDirectory(String),

    /// A read or write offset exceeds the file's length.
    #[error("offset past end of file")]
    OffsetPastEnd,

    /// The backing store rejected the operation.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer reported a non-empty `header.error` that [`Error::from_wire_string`]
    /// could not match back to one of the kinds above.
    #[error("remote error: {0}")]
    Remote(String),
}

impl Error {
    /// The stringified kind carried on the wire in `Header::error`.
    ///
    /// Matches the source's convention of sending `err.Error()` verbatim: an
    /// empty string denotes success and is never produced by this function.
    pub fn wire_string(&self) -> String {
        self.to_string()
    }

    /// Reconstructs the error kind a peer reported in a non-empty
    /// `header.error`.
    ///
    /// The wire carries only `wire_string`'s `Display` output, so this is
    /// necessarily a best-effort parse of known prefixes; anything that
    /// doesn't match one of this crate's own message formats comes back as
    /// [`Error::Remote`] rather than being silently misreported as some
    /// other kind.
    pub fn from_wire_string(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix("no such file or directory: ") {
            return Self::NotExist(rest.to_owned());
        }
        if let Some(rest) = s.strip_prefix("already exists: ") {
            return Self::AlreadyExists(rest.to_owned());
        }
        if let Some(rest) = s.strip_prefix("is not a directory: ") {
            return Self::IsNotDirectory(rest.to_owned());
        }
        if let Some(rest) = s.strip_prefix("is a directory: ") {
            return Self::IsDirectory(rest.to_owned());
        }
        if s == "offset past end of file" {
            return Self::OffsetPastEnd;
        }
        if let Some(rest) = s.strip_prefix("no such method ") {
            return Self::NoSuchMethod(unquote(rest));
        }
        if let Some(rest) = s.strip_prefix("malformed method name ") {
            return Self::MalformedMethod(unquote(rest));
        }
        if let Some(rest) = s.strip_prefix("bad encoding: ") {
            return Self::BadEncoding(rest.to_owned());
        }
        if let Some(rest) = s.strip_prefix("i/o error: ") {
            return Self::Io(std::io::Error::new(std::io::ErrorKind::Other, rest.to_owned()));
        }
        if s == "rpc stub is shut down" {
            return Self::Shutdown;
        }
        Self::Remote(s.to_owned())
    }
}

/// Strips a leading and trailing `"` from a `{:?}`-formatted string field,
/// if both are present.
fn unquote(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_string_round_trips_known_kinds() {
        let cases = [
            Error::NotExist("/a/b.txt".to_owned()),
            Error::AlreadyExists("/a/b.txt".to_owned()),
            Error::IsDirectory("/a".to_owned()),
            Error::IsNotDirectory("/a/b.txt".to_owned()),
            Error::OffsetPastEnd,
            Error::NoSuchMethod("FileServer.Bogus".to_owned()),
            Error::MalformedMethod("NoDot".to_owned()),
            Error::BadEncoding("expected body type \"Ping\", got \"Pong\"".to_owned()),
            Error::Shutdown,
        ];

        for want in cases {
            let got = Error::from_wire_string(&want.wire_string());
            assert_eq!(got.wire_string(), want.wire_string());
        }
    }

    #[test]
    fn test_from_wire_string_unknown_kind_becomes_remote() {
        let got = Error::from_wire_string("something a future server version invented");
        assert!(matches!(got, Error::Remote(_)));
    }
}
