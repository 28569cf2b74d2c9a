//! The closed set of request/reply records exchanged by the eight
//! `FileServer` methods and the one `FileClient` method.

use crate::codec::{Field, FieldValue, Record};
use crate::fs::types::FileSystemType;
use crate::Error;

/// Pulls the value named `name` out of a decoded field list.
///
/// Fields are carried positionally on the wire but matched by name here, per
/// the codec's contract (`decode` "reconstructs a fresh value whose declared
/// field names match").
fn take(fields: &mut Vec<(String, FieldValue)>, name: &str) -> Result<FieldValue, Error> {
    let idx = fields
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| Error::BadEncoding(format!("missing field {name:?}")))?;
    Ok(fields.remove(idx).1)
}

/// `FileServer.Mount` request: a client asking to mount `file_path` under
/// the given cache-consistency regime.
pub struct MountRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// The address the server should target with broadcasts for this
    /// client, e.g. under [`FileSystemType::Session`].
    pub client_addr: String,
    /// Server-relative path of the root to mount.
    pub file_path: String,
    /// The cache-consistency regime the client wants for this mount.
    pub fstype: FileSystemType,
}

impl Record for MountRequest {
    const TYPE_NAME: &'static str = "MountRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("client_addr", FieldValue::Str(self.client_addr.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
            (
                "fstype",
                FieldValue::Str(self.fstype.as_wire_str().to_owned()),
            ),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            client_addr: take(&mut fields, "client_addr")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
            fstype: FileSystemType::from_wire_str(&take(&mut fields, "fstype")?.into_string()?)?,
        })
    }
}

/// `FileServer.Mount` reply: the mounted root's attributes, used to seed the
/// client's descriptor tree.
pub struct MountResponse {
    /// Whether the mounted root is a directory.
    pub is_dir: bool,
    /// Server-relative path of the mounted root.
    pub file_path: String,
    /// Colon-joined paths of the root's immediate children, if a directory.
    pub children_paths: String,
    /// File size in bytes; meaningless for directories.
    pub size: i64,
    /// Unix seconds the root was last modified.
    pub last_modified: i64,
    /// Whether the server granted a callback promise for this mount.
    pub callback_promise: bool,
}

impl Record for MountResponse {
    const TYPE_NAME: &'static str = "MountResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("is_dir", FieldValue::Bool(self.is_dir)),
            ("file_path", FieldValue::Str(self.file_path.clone())),
            (
                "children_paths",
                FieldValue::Str(self.children_paths.clone()),
            ),
            ("size", FieldValue::Int64(self.size)),
            ("last_modified", FieldValue::Int64(self.last_modified)),
            ("callback_promise", FieldValue::Bool(self.callback_promise)),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            is_dir: take(&mut fields, "is_dir")?.into_bool()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
            children_paths: take(&mut fields, "children_paths")?.into_string()?,
            size: take(&mut fields, "size")?.into_i64()?,
            last_modified: take(&mut fields, "last_modified")?.into_i64()?,
            callback_promise: take(&mut fields, "callback_promise")?.into_bool()?,
        })
    }
}

/// `FileServer.Unmount` request.
pub struct UnmountRequest {
    /// The unmounting client's identifier.
    pub client_id: String,
    /// Server-relative path of the root being unmounted.
    pub file_path: String,
}

impl Record for UnmountRequest {
    const TYPE_NAME: &'static str = "UnmountRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
        })
    }
}

/// `FileServer.Unmount` reply.
pub struct UnmountResponse {
    /// Whether the unmount succeeded.
    pub is_success: bool,
}

impl Record for UnmountResponse {
    const TYPE_NAME: &'static str = "UnmountResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![("is_success", FieldValue::Bool(self.is_success))]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            is_success: take(&mut fields, "is_success")?.into_bool()?,
        })
    }
}

/// `FileServer.GetAttribute` request, used by the polling regime to
/// revalidate a cache entry.
pub struct GetAttributeRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// Server-relative path of the file.
    pub file_path: String,
}

impl Record for GetAttributeRequest {
    const TYPE_NAME: &'static str = "GetAttributeRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
        })
    }
}

/// `FileServer.GetAttribute` reply.
pub struct GetAttributeResponse {
    /// Whether the file is a directory.
    pub is_dir: bool,
    /// Server-relative path of the file.
    pub file_path: String,
    /// The server's authoritative non-idempotent read cursor.
    pub file_seeker: i64,
    /// Unix seconds the file was last modified.
    pub last_modified: i64,
}

impl Record for GetAttributeResponse {
    const TYPE_NAME: &'static str = "GetAttributeResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("is_dir", FieldValue::Bool(self.is_dir)),
            ("file_path", FieldValue::Str(self.file_path.clone())),
            ("file_seeker", FieldValue::Int64(self.file_seeker)),
            ("last_modified", FieldValue::Int64(self.last_modified)),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            is_dir: take(&mut fields, "is_dir")?.into_bool()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
            file_seeker: take(&mut fields, "file_seeker")?.into_i64()?,
            last_modified: take(&mut fields, "last_modified")?.into_i64()?,
        })
    }
}

/// `FileServer.UpdateAttribute` request: advances the server's authoritative
/// read cursor for a non-idempotent read.
pub struct UpdateAttributeRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// Server-relative path of the file.
    pub file_path: String,
    /// How far to advance the cursor.
    pub file_seeker_increment: i64,
}

impl Record for UpdateAttributeRequest {
    const TYPE_NAME: &'static str = "UpdateAttributeRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
            (
                "file_seeker_increment",
                FieldValue::Int64(self.file_seeker_increment),
            ),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
            file_seeker_increment: take(&mut fields, "file_seeker_increment")?.into_i64()?,
        })
    }
}

/// `FileServer.UpdateAttribute` reply.
pub struct UpdateAttributeResponse {
    /// The cursor's new position.
    pub file_seeker_position: i64,
    /// Whether the advance succeeded.
    pub is_success: bool,
}

impl Record for UpdateAttributeResponse {
    const TYPE_NAME: &'static str = "UpdateAttributeResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            (
                "file_seeker_position",
                FieldValue::Int64(self.file_seeker_position),
            ),
            ("is_success", FieldValue::Bool(self.is_success)),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            file_seeker_position: take(&mut fields, "file_seeker_position")?.into_i64()?,
            is_success: take(&mut fields, "is_success")?.into_bool()?,
        })
    }
}

/// `FileServer.Create` request.
pub struct CreateRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// Server-relative path of the file to create.
    pub file_path: String,
}

impl Record for CreateRequest {
    const TYPE_NAME: &'static str = "CreateRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
        })
    }
}

/// `FileServer.Create` reply.
pub struct CreateResponse {
    /// Whether the create succeeded.
    pub is_success: bool,
    /// Unix seconds the new file was stamped with.
    pub last_modified: i64,
}

impl Record for CreateResponse {
    const TYPE_NAME: &'static str = "CreateResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("is_success", FieldValue::Bool(self.is_success)),
            ("last_modified", FieldValue::Int64(self.last_modified)),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            is_success: take(&mut fields, "is_success")?.into_bool()?,
            last_modified: take(&mut fields, "last_modified")?.into_i64()?,
        })
    }
}

/// `FileServer.Read` request: a whole-file fetch used to fill or refresh the
/// client cache.
pub struct ReadRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// Server-relative path of the file.
    pub file_path: String,
}

impl Record for ReadRequest {
    const TYPE_NAME: &'static str = "ReadRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
        })
    }
}

/// `FileServer.Read` reply.
pub struct ReadResponse {
    /// The file's full content.
    pub data: Vec<u8>,
}

impl Record for ReadResponse {
    const TYPE_NAME: &'static str = "ReadResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![("data", FieldValue::Bytes(self.data.clone()))]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            data: take(&mut fields, "data")?.into_bytes()?,
        })
    }
}

/// `FileServer.Write` request: a whole-file flush of a dirty client cache
/// entry.
pub struct WriteRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// Server-relative path of the file.
    pub file_path: String,
    /// The new full content to persist.
    pub data: Vec<u8>,
}

impl Record for WriteRequest {
    const TYPE_NAME: &'static str = "WriteRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
            ("data", FieldValue::Bytes(self.data.clone())),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
            data: take(&mut fields, "data")?.into_bytes()?,
        })
    }
}

/// `FileServer.Write` reply.
pub struct WriteResponse {
    /// Bytes written.
    pub n: i64,
}

impl Record for WriteResponse {
    const TYPE_NAME: &'static str = "WriteResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![("n", FieldValue::Int64(self.n))]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            n: take(&mut fields, "n")?.into_i64()?,
        })
    }
}

/// `FileServer.Remove` request.
pub struct RemoveRequest {
    /// The requesting client's identifier.
    pub client_id: String,
    /// Server-relative path of the file to remove.
    pub file_path: String,
}

impl Record for RemoveRequest {
    const TYPE_NAME: &'static str = "RemoveRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("client_id", FieldValue::Str(self.client_id.clone())),
            ("file_path", FieldValue::Str(self.file_path.clone())),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            client_id: take(&mut fields, "client_id")?.into_string()?,
            file_path: take(&mut fields, "file_path")?.into_string()?,
        })
    }
}

/// `FileServer.Remove` reply.
pub struct RemoveResponse {
    /// Whether a file was found and removed.
    pub is_removed: bool,
}

impl Record for RemoveResponse {
    const TYPE_NAME: &'static str = "RemoveResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![("is_removed", FieldValue::Bool(self.is_removed))]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            is_removed: take(&mut fields, "is_removed")?.into_bool()?,
        })
    }
}

/// `FileClient.UpdateCallbackPromise` request: the server notifying a
/// session-semantics client that its cached copy of `file_path` is stale.
pub struct UpdateCallbackPromiseRequest {
    /// Server-relative path of the file that changed.
    pub file_path: String,
    /// `true` if the promise is still valid (unused by the current server,
    /// which only ever invalidates); `false` marks the client's copy stale.
    pub is_valid_or_canceled: bool,
}

impl Record for UpdateCallbackPromiseRequest {
    const TYPE_NAME: &'static str = "UpdateCallbackPromiseRequest";

    fn to_fields(&self) -> Vec<Field> {
        vec![
            ("file_path", FieldValue::Str(self.file_path.clone())),
            (
                "is_valid_or_canceled",
                FieldValue::Bool(self.is_valid_or_canceled),
            ),
        ]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            file_path: take(&mut fields, "file_path")?.into_string()?,
            is_valid_or_canceled: take(&mut fields, "is_valid_or_canceled")?.into_bool()?,
        })
    }
}

/// `FileClient.UpdateCallbackPromise` reply.
pub struct UpdateCallbackPromiseResponse {
    /// Whether the client processed the notification.
    pub is_success: bool,
}

impl Record for UpdateCallbackPromiseResponse {
    const TYPE_NAME: &'static str = "UpdateCallbackPromiseResponse";

    fn to_fields(&self) -> Vec<Field> {
        vec![("is_success", FieldValue::Bool(self.is_success))]
    }

    fn from_fields(mut fields: Vec<(String, FieldValue)>) -> Result<Self, Error> {
        Ok(Self {
            is_success: take(&mut fields, "is_success")?.into_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_mount_request_round_trip() {
        let req = MountRequest {
            client_id: "c1".to_owned(),
            client_addr: "127.0.0.1:9000".to_owned(),
            file_path: "/a/b.txt".to_owned(),
            fstype: FileSystemType::Session,
        };
        let body_buf = codec::encode_body(&req);
        let got = codec::decode_body::<MountRequest>(&body_buf).unwrap();
        assert_eq!(got.client_id, "c1");
        assert_eq!(got.fstype, FileSystemType::Session);
    }

    #[test]
    fn test_read_response_round_trip_with_binary_data() {
        let resp = ReadResponse {
            data: vec![0, 1, 2, 255, 254],
        };
        let body_buf = codec::encode_body(&resp);
        let got = codec::decode_body::<ReadResponse>(&body_buf).unwrap();
        assert_eq!(got.data, resp.data);
    }
}
