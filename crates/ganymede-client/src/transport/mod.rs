//! Network proxy for the directory server.
//!
//! Only WebSocket URLs are accepted:
//! - `ws://host:port/path` → plain WebSocket
//! - `wss://host:port/path` → WebSocket over TLS

pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use ganymede_core::{GResult, GanymedeError, Message, PROTOCOL_VERSION};
use tracing::{debug, info};

use crate::callback::Callback;
use crate::config::ClientConfig;
use crate::server::{RemoteSession, Server};

pub use websocket::{Connection, RemoteUpload, WsRemoteSession};

/// Check that `url` uses a scheme this client can speak.
pub fn validate_url(url: &str) -> GResult<()> {
    let lower = url.to_lowercase();
    let rest = lower
        .strip_prefix("ws://")
        .or_else(|| lower.strip_prefix("wss://"))
        .ok_or_else(|| {
            GanymedeError::Connectivity(format!(
                "unsupported URL scheme: {url} (expected ws:// or wss://)"
            ))
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(GanymedeError::Connectivity(format!("no host in URL: {url}")));
    }
    Ok(())
}

/// [`Server`] reached over a WebSocket; every login opens its own connection.
#[derive(Debug, Clone)]
pub struct WsServer {
    config: ClientConfig,
}

impl WsServer {
    pub fn new(config: ClientConfig) -> GResult<Self> {
        validate_url(&config.server)?;
        Ok(Self { config })
    }

    pub fn url(&self) -> &str {
        &self.config.server
    }
}

#[async_trait]
impl Server for WsServer {
    async fn login(
        &self,
        callback: Arc<dyn Callback>,
        username: &str,
        password: &str,
    ) -> GResult<Option<Arc<dyn RemoteSession>>> {
        let conn = Connection::open(&self.config, callback).await?;

        let reply = conn
            .call(Message::Login {
                version: PROTOCOL_VERSION.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            })
            .await;

        match reply {
            Ok(Message::LoginOk { session_id }) => {
                info!(%username, %session_id, "server accepted login");
                Ok(Some(Arc::new(WsRemoteSession::new(conn, session_id))))
            }
            Ok(Message::LoginNone { reason }) => {
                debug!(%username, reason = reason.as_deref().unwrap_or("-"), "no session");
                conn.close().await;
                Ok(None)
            }
            Ok(other) => {
                conn.close().await;
                Err(GanymedeError::InvalidMessage(format!(
                    "unexpected reply to login: {}",
                    other.kind()
                )))
            }
            Err(GanymedeError::RemoteBusiness { title, message }) => {
                conn.close().await;
                Err(GanymedeError::AuthFailed(format!("{title}: {message}")))
            }
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }
}
