//! Terminal rendering of notices.

use ganymede_client::{Notice, Notifier};
use tracing::{info, warn};

/// Prints server messages to stdout and every other notice to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::ServerMessage { text } => {
                info!(%text, "server message");
                println!("[server] {text}");
            }
            Notice::Disconnected { reason } => {
                warn!(%reason, "disconnected by server");
                eprintln!("ganymede: disconnected by server: {reason}");
            }
            Notice::AuthFailed { username, reason } => {
                eprintln!("ganymede: login as {username} rejected: {reason}");
            }
            Notice::Connectivity { reason } => {
                eprintln!("ganymede: cannot reach server: {reason}");
            }
            Notice::LoginFailed { reason } => eprintln!("ganymede: login failed: {reason}"),
            Notice::Fatal { context, reason } => eprintln!("ganymede: {context}: {reason}"),
        }
    }
}
