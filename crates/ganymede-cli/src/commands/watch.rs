//! `ganymede watch`: stay logged in and print server messages.
//!
//! Ends on Ctrl-C, after `--for` seconds, or when the server disconnects
//! the session (which exits the process).

use std::time::Duration;

use anyhow::{Context, Result};
use ganymede_client::ClientConfig;
use tracing::info;

use super::Login;

pub async fn run(config: &ClientConfig, seconds: Option<u64>) -> Result<()> {
    let login = Login::open(config).await?;
    eprintln!(
        "Watching {} as {}; press Ctrl-C to stop.",
        config.server,
        login.session.username()
    );

    match seconds {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                signal = tokio::signal::ctrl_c() => signal.context("failed to listen for Ctrl-C")?,
            }
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?,
    }

    info!("watch ended");
    login.close().await;
    Ok(())
}
