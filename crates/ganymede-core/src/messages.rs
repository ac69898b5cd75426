//! Control messages exchanged between the client and the directory server.

use serde::{Deserialize, Serialize};

use crate::invid::Invid;
use crate::query::Query;

/// Protocol version announced at login.
pub const PROTOCOL_VERSION: &str = "ganymede-v1";

/// Request id reserved for server-initiated pushes.
pub const PUSH_ID: u64 = 0;

/// Opaque server-side reference to one schema type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef(pub String);

/// One schema type as listed for the tree roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub type_ref: TypeRef,
    pub label: String,
    pub can_create: bool,
    pub can_inactivate: bool,
    /// Embedded types only exist inside other objects and are never roots.
    #[serde(default)]
    pub embedded: bool,
}

/// Listing row for one object instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub invid: Invid,
    pub label: String,
    pub editable: bool,
    #[serde(default)]
    pub inactive: bool,
}

/// One field in an object's detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub value: String,
    pub editable: bool,
}

/// Everything the server returns for an object detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectView {
    pub invid: Invid,
    pub label: String,
    pub fields: Vec<FieldValue>,
}

/// Structured result of a server or receiver operation.
///
/// A failed status is a policy decision, not a transport fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub ok: bool,
    pub title: String,
    pub message: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            ok: true,
            title: String::new(),
            message: String::new(),
        }
    }

    pub fn failure(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Every message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // client -> server
    Login {
        version: String,
        username: String,
        password: String,
    },
    Logout,
    ListTypes,
    TypeId(TypeRef),
    Query(Query),
    ViewObject(Invid),
    UploadStart { name: String, size: u64 },
    UploadChunk {
        upload_id: u64,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    UploadKeepalive { upload_id: u64 },
    UploadEnd { upload_id: u64, completed: bool },
    /// Ask the server to push a file; `transfer_id` is chosen by the client.
    FetchFile { transfer_id: u64, name: String },
    /// Receiver verdict on a pushed transfer; sent as a push after a
    /// rejected chunk or after `FileEnd`.
    FileStatus { transfer_id: u64, status: Status },
    Ping(u64),

    // server -> client replies
    /// Login accepted; carries the server-side session id.
    LoginOk { session_id: String },
    /// The server produced no session for these credentials.
    LoginNone { reason: Option<String> },
    Types(Vec<TypeSummary>),
    TypeIdIs(u16),
    Rows(Vec<ObjectHandle>),
    View(ObjectView),
    UploadReady { upload_id: u64 },
    /// The server will push `size` bytes for the requested file.
    FileReady { size: u64 },
    /// Upload call result: `None` means continue.
    UploadStatus(Option<Status>),
    /// Generic failure reply to any request.
    Refused(Status),
    Done,
    Pong(u64),

    // server -> client pushes
    Disconnected { reason: String },
    ServerMessage { text: String },
    FileChunk {
        transfer_id: u64,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    FileKeepalive { transfer_id: u64 },
    FileEnd { transfer_id: u64, completed: bool },
}

impl Message {
    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::ListTypes => "list_types",
            Self::TypeId(_) => "type_id",
            Self::Query(_) => "query",
            Self::ViewObject(_) => "view_object",
            Self::UploadStart { .. } => "upload_start",
            Self::UploadChunk { .. } => "upload_chunk",
            Self::UploadKeepalive { .. } => "upload_keepalive",
            Self::UploadEnd { .. } => "upload_end",
            Self::FetchFile { .. } => "fetch_file",
            Self::FileStatus { .. } => "file_status",
            Self::Ping(_) => "ping",
            Self::LoginOk { .. } => "login_ok",
            Self::LoginNone { .. } => "login_none",
            Self::Types(_) => "types",
            Self::TypeIdIs(_) => "type_id_is",
            Self::Rows(_) => "rows",
            Self::View(_) => "view",
            Self::UploadReady { .. } => "upload_ready",
            Self::FileReady { .. } => "file_ready",
            Self::UploadStatus(_) => "upload_status",
            Self::Refused(_) => "refused",
            Self::Done => "done",
            Self::Pong(_) => "pong",
            Self::Disconnected { .. } => "disconnected",
            Self::ServerMessage { .. } => "server_message",
            Self::FileChunk { .. } => "file_chunk",
            Self::FileKeepalive { .. } => "file_keepalive",
            Self::FileEnd { .. } => "file_end",
        }
    }

    /// Whether the server sends this unprompted.
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. }
                | Self::ServerMessage { .. }
                | Self::FileChunk { .. }
                | Self::FileKeepalive { .. }
                | Self::FileEnd { .. }
        )
    }

    /// Transfer id of a pushed file message.
    pub fn transfer_id(&self) -> Option<u64> {
        match self {
            Self::FileChunk { transfer_id, .. }
            | Self::FileKeepalive { transfer_id }
            | Self::FileEnd { transfer_id, .. } => Some(*transfer_id),
            _ => None,
        }
    }
}

/// A message plus the request id correlating it with its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub msg: Message,
}
