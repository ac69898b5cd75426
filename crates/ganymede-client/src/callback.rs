//! Client-hosted endpoint the server invokes to push events.

use std::sync::Weak;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::notify::Notice;
use crate::session::ClientInner;

/// Events the server pushes to the client. Both calls are fire-and-forget
/// and must return promptly: the server waits on them.
pub trait Callback: Send + Sync {
    /// The server is ending this session.
    fn disconnected(&self, reason: String);

    /// Text the server wants shown to the user.
    fn message_received(&self, text: String);
}

/// The [`Callback`] registered with the server at login.
pub struct CallbackEndpoint {
    client: Weak<ClientInner>,
    runtime: Handle,
}

impl CallbackEndpoint {
    /// Must be created from within a tokio runtime; cleanup tasks are
    /// spawned on it.
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self {
            client,
            runtime: Handle::current(),
        }
    }
}

impl Callback for CallbackEndpoint {
    fn disconnected(&self, reason: String) {
        let Some(client) = self.client.upgrade() else {
            debug!(%reason, "disconnect for a client that no longer exists");
            return;
        };

        info!(%reason, "server forced disconnect");
        // Cleanup may block on remote calls and disposal; never make the
        // server wait for it.
        self.runtime.spawn(async move {
            client.forced_shutdown(reason).await;
        });
    }

    fn message_received(&self, text: String) {
        match self.client.upgrade() {
            Some(client) => client.notifier().notify(Notice::ServerMessage { text }),
            None => warn!(%text, "server message dropped, client is gone"),
        }
    }
}
