//! Capability interfaces of the remote directory server.
//!
//! [`SessionHandle`](crate::session::SessionHandle) and the tree/loader code
//! only talk to the server through these traits, so the WebSocket proxy in
//! [`transport`](crate::transport) can be swapped for an in-process fake.

use std::sync::Arc;

use async_trait::async_trait;
use ganymede_core::{GResult, Invid, ObjectHandle, ObjectView, Query, TypeRef, TypeSummary};

use crate::callback::Callback;
use crate::file_transfer::ByteReceiver;

/// Entry point of the server: the only call available before login.
#[async_trait]
pub trait Server: Send + Sync {
    /// Authenticate and register `callback` for server pushes.
    ///
    /// `Ok(None)` means the server produced no session for these
    /// credentials; transport failures come back as `Err`.
    async fn login(
        &self,
        callback: Arc<dyn Callback>,
        username: &str,
        password: &str,
    ) -> GResult<Option<Arc<dyn RemoteSession>>>;
}

/// Calls available on an authenticated session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn logout(&self) -> GResult<()>;

    /// Every schema type visible to this session.
    async fn list_types(&self) -> GResult<Vec<TypeSummary>>;

    /// Numeric id behind an opaque type reference.
    async fn type_id(&self, type_ref: &TypeRef) -> GResult<u16>;

    async fn query(&self, query: &Query) -> GResult<Vec<ObjectHandle>>;

    async fn view_object(&self, invid: Invid) -> GResult<ObjectView>;

    /// Start pushing a file to the server; chunks go through the returned receiver.
    async fn open_upload(&self, name: &str, size: u64) -> GResult<Arc<dyn ByteReceiver>>;

    /// Ask the server to push the file `name` into `receiver`.
    ///
    /// Returns the announced size once the server has accepted; the bytes
    /// arrive afterwards through the receiver.
    async fn fetch_file(&self, name: &str, receiver: Arc<dyn ByteReceiver>) -> GResult<u64>;
}
