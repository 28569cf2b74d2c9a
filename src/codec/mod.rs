//! Wire encoding for `(Header, Body)` messages.
//!
//! Every datagram exchanged between a client and server stub carries exactly
//! one message:
//!
//! ```text
//! u32 header_len | header_bytes | u32 body_len | body_bytes
//! ```
//!
//! `header_bytes` holds the length-prefixed `service.Method` name, a
//! little-endian `u64` sequence number and a length-prefixed error string
//! (empty on success). `body_bytes` holds a length-prefixed type name
//! followed by a `u32` total field length and then each field: a
//! length-prefixed name, a length-prefixed type tag (one of
//! `string|bool|int64|[]byte`) and a length-prefixed payload.
//!
//! This stands in for the source's reflection-based encoder
//! (`reflect.TypeOf`/`FieldByName` walking a struct's fields at runtime): the
//! [`Record`] trait is an explicit registration a type opts into once, and
//! `encode_body`/`decode_body` do the walking generically instead of via
//! runtime introspection.

mod field;

pub use field::{Field, FieldValue};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::Error;
use field::{read_lp_bytes, read_lp_string, write_lp_bytes};

/// Largest message this codec will attempt to decode, and the size of the
/// recv buffer both stubs allocate per socket.
///
/// Matches the source's datagram cap (50 KiB) rather than raising it: a
/// single UDP datagram tops out at 65507 bytes on IPv4 anyway, so a larger
/// buffer would only waste memory per accept-loop thread, not admit bigger
/// messages.
pub const MAX_BUFFER_SIZE: usize = 50 * 1024;

/// The fixed envelope carried by every message, independent of its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// `"Service.Method"`, the name of the remote procedure.
    pub service_method: String,
    /// Sequence number assigned by the client stub; echoed by the server.
    pub sequence: u64,
    /// Empty on success; otherwise the stringified error.
    pub error: String,
}

impl Header {
    pub(crate) fn serialised_len(&self) -> usize {
        4 + self.service_method.len() + 8 + 4 + self.error.len()
    }

    pub(crate) fn serialise_into(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        write_lp_bytes(&mut *buf, self.service_method.as_bytes())?;
        buf.write_u64::<LittleEndian>(self.sequence)?;
        write_lp_bytes(&mut *buf, self.error.as_bytes())?;
        Ok(())
    }

    fn parse(buf: &[u8]) -> Result<Self, Error> {
        let mut c = Cursor::new(buf);
        let service_method = read_lp_string(&mut c)?;
        let sequence = c.read_u64::<LittleEndian>().map_err(|_| Error::InvalidLength)?;
        let error = read_lp_string(&mut c)?;
        Ok(Self {
            service_method,
            sequence,
            error,
        })
    }

    /// Splits `"Service.Method"` into its two parts.
    pub fn split_service_method(&self) -> Result<(&str, &str), Error> {
        self.service_method
            .split_once('.')
            .filter(|(svc, method)| !svc.is_empty() && !method.is_empty())
            .ok_or_else(|| Error::MalformedMethod(self.service_method.clone()))
    }
}

/// A type that can be carried as a message body.
///
/// Implementors name themselves (`TYPE_NAME`) and expose their fields as an
/// ordered list of `(name, value)` pairs; `encode_body`/`decode_body` use
/// this to build and parse the wire representation without runtime
/// reflection.
pub trait Record: Sized {
    /// The name written into the body's type-name preamble.
    const TYPE_NAME: &'static str;

    /// Returns this value's fields, in wire order.
    fn to_fields(&self) -> Vec<Field>;

    /// Reconstructs a value from its wire fields, in the order `to_fields`
    /// produced them.
    fn from_fields(fields: Vec<(String, FieldValue)>) -> Result<Self, Error>;
}

/// Encodes `body`'s type name and fields into a standalone body buffer, with
/// no header attached.
///
/// Used directly by server method handlers, which receive and return raw
/// body bytes so the dispatch loop never needs to know their concrete type.
pub fn encode_body<T: Record>(body: &T) -> Vec<u8> {
    let fields = body.to_fields();

    let mut body_buf = Vec::new();
    write_lp_bytes(&mut body_buf, T::TYPE_NAME.as_bytes()).expect("write to Vec cannot fail");

    let mut fields_buf = Vec::new();
    for (name, value) in &fields {
        write_lp_bytes(&mut fields_buf, name.as_bytes()).expect("write to Vec cannot fail");
        write_lp_bytes(&mut fields_buf, value.type_tag().as_bytes())
            .expect("write to Vec cannot fail");
        write_lp_bytes(&mut fields_buf, &value.payload()).expect("write to Vec cannot fail");
    }
    body_buf
        .write_u32::<LittleEndian>(fields_buf.len() as u32)
        .expect("write to Vec cannot fail");
    body_buf.extend_from_slice(&fields_buf);
    body_buf
}

/// Encodes `header` and `body` into a single datagram payload.
pub fn encode<T: Record>(header: &Header, body: &T) -> Vec<u8> {
    let body_buf = encode_body(body);

    let mut out = Vec::with_capacity(4 + header.serialised_len() + 4 + body_buf.len());
    out.write_u32::<LittleEndian>(header.serialised_len() as u32)
        .expect("write to Vec cannot fail");
    header
        .serialise_into(&mut out)
        .expect("write to Vec cannot fail");
    out.write_u32::<LittleEndian>(body_buf.len() as u32)
        .expect("write to Vec cannot fail");
    out.extend_from_slice(&body_buf);
    out
}

/// Wraps an already-encoded body buffer (as produced by [`encode_body`] or
/// returned by a server [`crate::rpc::Handler`]) with `header` into a full
/// datagram payload.
pub fn wrap_message(header: &Header, body_buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + header.serialised_len() + 4 + body_buf.len());
    out.write_u32::<LittleEndian>(header.serialised_len() as u32)
        .expect("write to Vec cannot fail");
    header
        .serialise_into(&mut out)
        .expect("write to Vec cannot fail");
    out.write_u32::<LittleEndian>(body_buf.len() as u32)
        .expect("write to Vec cannot fail");
    out.extend_from_slice(body_buf);
    out
}

/// Decodes a datagram payload into its header and a typed body.
///
/// Returns `Error::BadEncoding` if the body's type name does not match
/// `T::TYPE_NAME`.
pub fn decode<T: Record>(buf: &[u8]) -> Result<(Header, T), Error> {
    let (header, body_buf) = decode_header(buf)?;
    let body = decode_body::<T>(body_buf)?;
    Ok((header, body))
}

/// Decodes only the header, returning it alongside the remaining body bytes.
///
/// Used by the server dispatch loop, which must read `service_method` before
/// it knows which concrete `Record` type to decode the body as.
pub fn decode_header(buf: &[u8]) -> Result<(Header, &[u8]), Error> {
    if buf.len() > MAX_BUFFER_SIZE {
        return Err(Error::InvalidLength);
    }
    let mut c = Cursor::new(buf);

    let header_len = c.read_u32::<LittleEndian>().map_err(|_| Error::IncompleteMessage {
        buffer_len: buf.len(),
        expected: 4,
    })? as usize;
    let header_bytes = read_lp_span(&mut c, header_len, buf)?;
    let header = Header::parse(header_bytes)?;

    let body_len = c.read_u32::<LittleEndian>().map_err(|_| Error::IncompleteMessage {
        buffer_len: buf.len(),
        expected: c.position() as usize + 4,
    })? as usize;
    let body_bytes = read_lp_span(&mut c, body_len, buf)?;

    Ok((header, body_bytes))
}

/// Decodes a body buffer (as returned by [`decode_header`]) into `T`.
pub fn decode_body<T: Record>(buf: &[u8]) -> Result<T, Error> {
    let mut c = Cursor::new(buf);
    let type_name = read_lp_string(&mut c)?;
    if type_name != T::TYPE_NAME {
        return Err(Error::BadEncoding(format!(
            "expected body type {:?}, got {:?}",
            T::TYPE_NAME,
            type_name
        )));
    }

    let fields_len = c.read_u32::<LittleEndian>().map_err(|_| Error::InvalidLength)? as usize;
    let fields_buf = read_lp_span(&mut c, fields_len, buf)?;
    let mut fc = Cursor::new(fields_buf);

    let mut fields = Vec::new();
    while (fc.position() as usize) < fields_buf.len() {
        let name = read_lp_string(&mut fc)?;
        let tag = read_lp_string(&mut fc)?;
        let payload = read_lp_bytes(&mut fc)?;
        fields.push((name, FieldValue::from_wire(&tag, payload)?));
    }

    T::from_fields(fields)
}

fn read_lp_span<'a>(c: &mut Cursor<&'a [u8]>, len: usize, whole: &'a [u8]) -> Result<&'a [u8], Error> {
    let start = c.position() as usize;
    let end = start.checked_add(len).ok_or(Error::InvalidLength)?;
    if end > whole.len() {
        return Err(Error::IncompleteMessage {
            buffer_len: whole.len(),
            expected: end,
        });
    }
    c.set_position(end as u64);
    Ok(&whole[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping {
        message: String,
        count: i64,
    }

    impl Record for Ping {
        const TYPE_NAME: &'static str = "Ping";

        fn to_fields(&self) -> Vec<Field> {
            vec![
                ("message", FieldValue::Str(self.message.clone())),
                ("count", FieldValue::Int64(self.count)),
            ]
        }

        fn from_fields(fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
            let mut message = None;
            let mut count = None;
            for (name, value) in fields {
                match name.as_str() {
                    "message" => message = Some(value.into_string()?),
                    "count" => count = Some(value.into_i64()?),
                    _ => {}
                }
            }
            Ok(Self {
                message: message.ok_or(Error::InvalidLength)?,
                count: count.ok_or(Error::InvalidLength)?,
            })
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let header = Header {
            service_method: "Echo.Ping".to_owned(),
            sequence: 7,
            error: String::new(),
        };
        let body = Ping {
            message: "hello".to_owned(),
            count: 3,
        };

        let buf = encode(&header, &body);
        let (got_header, got_body) = decode::<Ping>(&buf).unwrap();

        assert_eq!(got_header, header);
        assert_eq!(got_body.message, "hello");
        assert_eq!(got_body.count, 3);
    }

    #[test]
    fn test_decode_rejects_mismatched_type_name() {
        struct Other;
        impl Record for Other {
            const TYPE_NAME: &'static str = "Other";
            fn to_fields(&self) -> Vec<Field> {
                vec![]
            }
            fn from_fields(_: Vec<(String, FieldValue)>) -> Result<Self, Error> {
                Ok(Self)
            }
        }

        let header = Header {
            service_method: "Echo.Ping".to_owned(),
            sequence: 1,
            error: String::new(),
        };
        let body = Ping {
            message: "x".to_owned(),
            count: 0,
        };
        let buf = encode(&header, &body);

        assert!(matches!(decode::<Other>(&buf), Err(Error::BadEncoding(_))));
    }

    #[test]
    fn test_decode_header_rejects_truncated_buffer() {
        let err = decode_header(&[1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::IncompleteMessage { .. }));
    }

    proptest::proptest! {
        /// `encode ∘ decode = identity` for arbitrary header and body field
        /// values, the round-trip invariant every registered record type
        /// must satisfy.
        #[test]
        fn test_encode_decode_round_trips_arbitrary(
            service in "[a-zA-Z]{1,16}",
            method in "[a-zA-Z]{1,16}",
            sequence in proptest::prelude::any::<u64>(),
            message in ".*",
            count in proptest::prelude::any::<i64>(),
        ) {
            let header = Header {
                service_method: format!("{service}.{method}"),
                sequence,
                error: String::new(),
            };
            let body = Ping { message: message.clone(), count };

            let buf = encode(&header, &body);
            let (got_header, got_body) = decode::<Ping>(&buf).unwrap();

            proptest::prop_assert_eq!(got_header, header);
            proptest::prop_assert_eq!(got_body.message, message);
            proptest::prop_assert_eq!(got_body.count, count);
        }
    }

    #[test]
    fn test_split_service_method() {
        let h = Header {
            service_method: "FileServer.Read".to_owned(),
            sequence: 0,
            error: String::new(),
        };
        assert_eq!(h.split_service_method().unwrap(), ("FileServer", "Read"));

        let bad = Header {
            service_method: "NoDot".to_owned(),
            sequence: 0,
            error: String::new(),
        };
        assert!(matches!(
            bad.split_service_method(),
            Err(Error::MalformedMethod(_))
        ));
    }
}
