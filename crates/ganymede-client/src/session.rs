//! Session lifecycle: login, the live session handle, logout and forced
//! disconnect cleanup.
//!
//! A [`Client`] owns at most one live [`SessionHandle`]. Components that need
//! remote access receive an `Arc<SessionHandle>` explicitly; once the session
//! is destroyed every call through the handle fails with
//! [`GanymedeError::ProtocolState`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ganymede_core::{
    GResult, GanymedeError, Invid, ObjectHandle, ObjectView, Query, TypeRef, TypeSummary,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::callback::CallbackEndpoint;
use crate::config::ClientConfig;
use crate::file_transfer::{ByteReceiver, FileReceiver, FileSink};
use crate::loader::{spawn_object_view, AsyncLoader, LoadState};
use crate::notify::{LogNotifier, Notice, Notifier, ProcessExit, Terminator};
use crate::resource::ResourceRegistry;
use crate::server::{RemoteSession, Server};

/// The authenticated connection; the only path to remote calls.
pub struct SessionHandle {
    username: String,
    remote: Arc<dyn RemoteSession>,
    alive: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(username: String, remote: Arc<dyn RemoteSession>) -> Self {
        Self {
            username,
            remote,
            alive: AtomicBool::new(true),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether the session has not yet been logged out or disconnected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the session dead. Returns `true` on the first call only.
    pub(crate) fn invalidate(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    fn remote(&self) -> GResult<&Arc<dyn RemoteSession>> {
        if self.is_alive() {
            Ok(&self.remote)
        } else {
            Err(GanymedeError::ProtocolState(format!(
                "session for '{}' has ended",
                self.username
            )))
        }
    }

    pub async fn list_types(&self) -> GResult<Vec<TypeSummary>> {
        self.remote()?.list_types().await
    }

    pub async fn type_id(&self, type_ref: &TypeRef) -> GResult<u16> {
        self.remote()?.type_id(type_ref).await
    }

    pub async fn query(&self, query: &Query) -> GResult<Vec<ObjectHandle>> {
        let rows = self.remote()?.query(query).await?;
        debug!(type_id = query.type_id, rows = rows.len(), "query returned");
        Ok(rows)
    }

    pub async fn view_object(&self, invid: Invid) -> GResult<ObjectView> {
        self.remote()?.view_object(invid).await
    }

    /// Open a channel for pushing a file of `size` bytes to the server.
    pub async fn open_upload(&self, name: &str, size: u64) -> GResult<Arc<dyn ByteReceiver>> {
        self.remote()?.open_upload(name, size).await
    }

    /// Have the server push the file `name` into `receiver`.
    pub async fn fetch_file(&self, name: &str, receiver: Arc<dyn ByteReceiver>) -> GResult<u64> {
        self.remote()?.fetch_file(name, receiver).await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("username", &self.username)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub(crate) struct ClientInner {
    server: Arc<dyn Server>,
    config: ClientConfig,
    notifier: Arc<dyn Notifier>,
    terminator: Arc<dyn Terminator>,
    live: Mutex<Option<Arc<SessionHandle>>>,
    resources: ResourceRegistry,
}

impl ClientInner {
    /// Cleanup after the server forced a disconnect, then end the process.
    pub(crate) async fn forced_shutdown(&self, reason: String) {
        if let Some(session) = self.live.lock().await.take() {
            session.invalidate();
            info!(username = %session.username(), "session destroyed by server");
        }

        let disposed = self.resources.dispose_all().await;
        debug!(disposed, "released open resources");

        self.notifier.notify(Notice::Disconnected {
            reason: reason.clone(),
        });
        self.terminator.terminate(&reason);
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }
}

/// Owner of the connection to one directory server.
///
/// Cheap to clone; clones share the same live session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// A client that reports through the log and exits the process on a
    /// forced disconnect.
    pub fn new(server: Arc<dyn Server>, config: ClientConfig) -> Self {
        Self::with_hooks(server, config, Arc::new(LogNotifier), Arc::new(ProcessExit))
    }

    pub fn with_hooks(
        server: Arc<dyn Server>,
        config: ClientConfig,
        notifier: Arc<dyn Notifier>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                server,
                config,
                notifier,
                terminator,
                live: Mutex::new(None),
                resources: ResourceRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Authenticate and make the resulting session the live one.
    ///
    /// Each failure is reported through the notifier exactly once and also
    /// returned; none of them end the process.
    pub async fn login(&self, username: &str, password: &str) -> GResult<Arc<SessionHandle>> {
        let mut live = self.inner.live.lock().await;
        if live.as_ref().is_some_and(|s| s.is_alive()) {
            return Err(GanymedeError::ProtocolState(
                "a session is already open; log out first".into(),
            ));
        }

        let callback = Arc::new(CallbackEndpoint::new(Arc::downgrade(&self.inner)));
        let result = self.inner.server.login(callback, username, password).await;

        match result {
            Ok(Some(remote)) => {
                let session = Arc::new(SessionHandle::new(username.to_string(), remote));
                *live = Some(session.clone());
                info!(%username, "logged in");
                Ok(session)
            }
            Ok(None) => {
                let reason = "the server did not accept these credentials".to_string();
                debug!(%username, "login returned no session");
                self.inner.notifier.notify(Notice::AuthFailed {
                    username: username.to_string(),
                    reason: reason.clone(),
                });
                Err(GanymedeError::AuthFailed(reason))
            }
            Err(e) if e.is_connectivity() => {
                debug!(%username, error = %e, "could not reach server");
                self.inner.notifier.notify(Notice::Connectivity {
                    reason: e.to_string(),
                });
                Err(e)
            }
            Err(GanymedeError::AuthFailed(reason)) => {
                self.inner.notifier.notify(Notice::AuthFailed {
                    username: username.to_string(),
                    reason: reason.clone(),
                });
                Err(GanymedeError::AuthFailed(reason))
            }
            Err(e) => {
                error!(%username, error = %e, "unexpected login failure");
                self.inner.notifier.notify(Notice::LoginFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// The live session, if any.
    pub async fn session(&self) -> GResult<Arc<SessionHandle>> {
        match self.inner.live.lock().await.as_ref() {
            Some(session) if session.is_alive() => Ok(session.clone()),
            _ => Err(GanymedeError::ProtocolState("not logged in".into())),
        }
    }

    /// Log out of the live session and release everything opened under it.
    ///
    /// The session is dead before the remote call starts, so a concurrent
    /// login never sees two live sessions.
    pub async fn logout(&self) -> GResult<()> {
        let session = {
            let mut live = self.inner.live.lock().await;
            let session = live
                .take()
                .filter(|s| s.is_alive())
                .ok_or_else(|| GanymedeError::ProtocolState("not logged in".into()))?;
            session.invalidate();
            session
        };

        self.inner.resources.dispose_all().await;
        let result = session.remote.logout().await;

        match &result {
            Ok(()) => info!(username = %session.username(), "logged out"),
            Err(e) => warn!(username = %session.username(), error = %e, "remote logout failed"),
        }
        result
    }

    /// Start loading the detail view for `invid` in the background.
    ///
    /// Returns immediately with the loader showing its placeholder. A failed
    /// load is reported through the notifier.
    pub async fn open_view(&self, invid: Invid) -> GResult<Arc<AsyncLoader<ObjectView>>> {
        let session = self.session().await?;
        let loader = spawn_object_view(session, invid, self.inner.config.load_ceiling());
        self.inner.resources.register(&loader);

        let notifier = self.inner.notifier.clone();
        loader.on_complete(move |state| {
            if let LoadState::Failed(reason) = state {
                notifier.notify(Notice::Fatal {
                    context: format!("loading object {invid}"),
                    reason,
                });
            }
        });
        Ok(loader)
    }

    /// Ask the server for the file `name` and receive it into `sink`.
    ///
    /// Returns once the server has accepted; wait on
    /// [`FileReceiver::finished`] for the outcome. A server that goes quiet
    /// for a whole lease abandons the transfer.
    pub async fn receive_file(
        &self,
        name: &str,
        sink: Box<dyn FileSink>,
    ) -> GResult<Arc<FileReceiver>> {
        let session = self.session().await?;
        let receiver = FileReceiver::new(name, sink, self.inner.config.file_lease());
        self.inner.resources.register(&receiver);

        match session.fetch_file(name, receiver.clone()).await {
            Ok(size) => {
                debug!(%name, size, "server is sending file");
                Ok(receiver)
            }
            Err(e) => {
                let _ = receiver.end(false).await;
                Err(e)
            }
        }
    }

    /// Number of open views and transfers still tracked.
    pub fn open_resources(&self) -> usize {
        self.inner.resources.live_count()
    }
}
