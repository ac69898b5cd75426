//! In-process fakes of the server capabilities for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ganymede_core::{
    FieldValue, GResult, GanymedeError, Invid, ObjectHandle, ObjectView, Query, TypeRef,
    TypeSummary,
};

use crate::callback::Callback;
use crate::file_transfer::{ByteReceiver, FileReceiver, MemorySink};
use crate::server::{RemoteSession, Server};

#[derive(Clone)]
enum LoginMode {
    Accept { username: String, password: String },
    Unreachable,
    Broken,
}

/// Fake server handing out one shared [`MockSession`].
#[derive(Clone)]
pub struct MockServer {
    mode: LoginMode,
    session: Arc<MockSession>,
    last_callback: Arc<Mutex<Option<Arc<dyn Callback>>>>,
}

impl MockServer {
    /// Accepts exactly this username/password pair.
    pub fn accepting(username: &str, password: &str) -> Self {
        Self::with_mode(LoginMode::Accept {
            username: username.into(),
            password: password.into(),
        })
    }

    /// Every login fails as if the network were down.
    pub fn unreachable() -> Self {
        Self::with_mode(LoginMode::Unreachable)
    }

    /// Every login fails with a garbled reply.
    pub fn broken() -> Self {
        Self::with_mode(LoginMode::Broken)
    }

    fn with_mode(mode: LoginMode) -> Self {
        Self {
            mode,
            session: MockSession::with_sample_schema(),
            last_callback: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session(&self) -> Arc<MockSession> {
        self.session.clone()
    }

    /// Callback registered by the most recent successful login.
    pub fn last_callback(&self) -> Option<Arc<dyn Callback>> {
        self.last_callback.lock().unwrap().clone()
    }
}

#[async_trait]
impl Server for MockServer {
    async fn login(
        &self,
        callback: Arc<dyn Callback>,
        username: &str,
        password: &str,
    ) -> GResult<Option<Arc<dyn RemoteSession>>> {
        match &self.mode {
            LoginMode::Unreachable => Err(GanymedeError::Connectivity("connection refused".into())),
            LoginMode::Broken => Err(GanymedeError::InvalidMessage("unexpected reply".into())),
            LoginMode::Accept {
                username: u,
                password: p,
            } => {
                if u != username || p != password {
                    return Ok(None);
                }
                *self.last_callback.lock().unwrap() = Some(callback);
                Ok(Some(self.session.clone()))
            }
        }
    }
}

/// Fake session over a small user/group schema.
///
/// Type 3 ("user") has four objects, two of them editable; type 4
/// ("group") has one. The "missing" reference does not resolve.
#[derive(Default)]
pub struct MockSession {
    logouts: AtomicUsize,
    list_calls: AtomicUsize,
    type_id_calls: AtomicUsize,
    query_calls: AtomicUsize,
    view_delay: Mutex<Duration>,
    fail_views: AtomicBool,
    logout_delay: Mutex<Duration>,
    uploads: Mutex<Vec<MemorySink>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    stall_files: AtomicBool,
}

impl MockSession {
    pub fn with_sample_schema() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn type_id_calls(&self) -> usize {
        self.type_id_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn set_view_delay(&self, delay: Duration) {
        *self.view_delay.lock().unwrap() = delay;
    }

    pub fn fail_views(&self, fail: bool) {
        self.fail_views.store(fail, Ordering::SeqCst);
    }

    pub fn set_logout_delay(&self, delay: Duration) {
        *self.logout_delay.lock().unwrap() = delay;
    }

    /// Make `name` available to `fetch_file`.
    pub fn add_file(&self, name: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(name.into(), data);
    }

    /// Accept fetches but never push any bytes.
    pub fn stall_files(&self, stall: bool) {
        self.stall_files.store(stall, Ordering::SeqCst);
    }

    /// Sinks behind every upload opened so far.
    pub fn uploads(&self) -> Vec<MemorySink> {
        self.uploads.lock().unwrap().clone()
    }

    fn rows(type_id: u16) -> Vec<ObjectHandle> {
        let row = |num: u32, label: &str, editable: bool| ObjectHandle {
            invid: Invid::new(type_id, num),
            label: label.into(),
            editable,
            inactive: false,
        };
        match type_id {
            3 => vec![
                row(4, "root", false),
                row(2, "carol", true),
                row(1, "alice", true),
                row(3, "bob", false),
            ],
            4 => vec![row(1, "staff", true)],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn logout(&self) -> GResult<()> {
        let delay = *self.logout_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_types(&self) -> GResult<Vec<TypeSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let summary = |r: &str, label: &str, embedded: bool| TypeSummary {
            type_ref: TypeRef(r.into()),
            label: label.into(),
            can_create: !embedded,
            can_inactivate: r == "user",
            embedded,
        };
        Ok(vec![
            summary("user", "Users", false),
            summary("address", "Addresses", true),
            summary("group", "Groups", false),
        ])
    }

    async fn type_id(&self, type_ref: &TypeRef) -> GResult<u16> {
        self.type_id_calls.fetch_add(1, Ordering::SeqCst);
        match type_ref.0.as_str() {
            "user" => Ok(3),
            "group" => Ok(4),
            "address" => Ok(5),
            other => Err(GanymedeError::RemoteBusiness {
                title: "Unknown type".into(),
                message: format!("no type '{other}'"),
            }),
        }
    }

    async fn query(&self, query: &Query) -> GResult<Vec<ObjectHandle>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::rows(query.type_id)
            .into_iter()
            .filter(|h| query.include_non_editable || h.editable)
            .collect())
    }

    async fn view_object(&self, invid: Invid) -> GResult<ObjectView> {
        let delay = *self.view_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_views.load(Ordering::SeqCst) {
            return Err(GanymedeError::Connectivity("view fetch dropped".into()));
        }
        let field = |name: &str, value: &str, editable: bool| FieldValue {
            name: name.into(),
            value: value.into(),
            editable,
        };
        Ok(ObjectView {
            invid,
            label: format!("object {invid}"),
            fields: vec![
                field("uid", "1001", false),
                field("shell", "/bin/sh", true),
                field("created", "2024-01-01", false),
                field("fullname", "Alice Example", true),
            ],
        })
    }

    async fn open_upload(&self, name: &str, size: u64) -> GResult<Arc<dyn ByteReceiver>> {
        let sink = MemorySink::new();
        self.uploads.lock().unwrap().push(sink.clone());
        let receiver: Arc<dyn ByteReceiver> =
            FileReceiver::with_limit(name, Box::new(sink), Duration::from_secs(60), size);
        Ok(receiver)
    }

    async fn fetch_file(&self, name: &str, receiver: Arc<dyn ByteReceiver>) -> GResult<u64> {
        let Some(data) = self.files.lock().unwrap().get(name).cloned() else {
            return Err(GanymedeError::RemoteBusiness {
                title: "No such file".into(),
                message: format!("'{name}' is not available"),
            });
        };
        let size = data.len() as u64;
        if !self.stall_files.load(Ordering::SeqCst) {
            tokio::spawn(async move {
                for chunk in data.chunks(64) {
                    if receiver.send_bytes(chunk).await.ok().flatten().is_some() {
                        let _ = receiver.end(false).await;
                        return;
                    }
                }
                let _ = receiver.end(true).await;
            });
        }
        Ok(size)
    }
}
