//! CLI subcommand implementations.

pub mod download;
pub mod list;
pub mod show_config;
pub mod types;
pub mod upload;
pub mod view;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use ganymede_client::{
    Client, ClientConfig, GanymedeError, ProcessExit, SessionHandle, WsServer,
};
use tracing::{debug, warn};

use crate::console::ConsoleNotifier;

/// Environment variable consulted before prompting for a password.
pub const PASSWORD_ENV: &str = "GANYMEDE_PASSWORD";

/// Login failure the console notifier has already shown to the user.
#[derive(Debug, thiserror::Error)]
#[error("login to {server} failed")]
pub struct LoginFailed {
    pub server: String,
    #[source]
    pub source: GanymedeError,
}

/// A logged-in client plus its live session.
pub struct Login {
    pub client: Client,
    pub session: Arc<SessionHandle>,
}

impl Login {
    /// Validate the URL, resolve credentials and log in.
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let server = WsServer::new(config.clone()).context("invalid server URL")?;

        let username = if config.username.is_empty() {
            Input::<String>::new()
                .with_prompt("Username")
                .interact_text()
                .context("failed to read username")?
        } else {
            config.username.clone()
        };

        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) => {
                debug!("using password from {PASSWORD_ENV}");
                password
            }
            Err(_) => Password::new()
                .with_prompt(format!("Password for {username}"))
                .interact()
                .context("failed to read password")?,
        };

        let url = server.url().to_string();
        let client = Client::with_hooks(
            Arc::new(server),
            config.clone(),
            Arc::new(ConsoleNotifier),
            Arc::new(ProcessExit),
        );
        let session = client
            .login(&username, &password)
            .await
            .map_err(|source| LoginFailed { server: url, source })?;

        Ok(Self { client, session })
    }

    /// Log out; a failed remote logout is only logged.
    pub async fn close(self) {
        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "logout failed");
        }
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}
