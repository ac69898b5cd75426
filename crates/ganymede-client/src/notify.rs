//! User-facing notifications and process termination.
//!
//! The interactive surface implements these capabilities; the library only
//! reports through them.

use tracing::{error, info, warn};

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Credentials were rejected.
    AuthFailed { username: String, reason: String },
    /// The server could not be reached.
    Connectivity { reason: String },
    /// Login failed for any other reason.
    LoginFailed { reason: String },
    /// Text pushed by the server.
    ServerMessage { text: String },
    /// The server ended the session.
    Disconnected { reason: String },
    /// An operation aborted on a broken invariant.
    Fatal { context: String, reason: String },
}

/// Reports notices to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::AuthFailed { username, reason } => {
                warn!(%username, %reason, "login rejected")
            }
            Notice::Connectivity { reason } => warn!(%reason, "server unreachable"),
            Notice::LoginFailed { reason } => warn!(%reason, "login failed"),
            Notice::ServerMessage { text } => info!(%text, "message from server"),
            Notice::Disconnected { reason } => warn!(%reason, "disconnected by server"),
            Notice::Fatal { context, reason } => error!(%context, %reason, "operation aborted"),
        }
    }
}

/// Ends the process after a forced disconnect.
pub trait Terminator: Send + Sync {
    fn terminate(&self, reason: &str);
}

/// Exits the process with status 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, reason: &str) {
        info!(%reason, "terminating after forced disconnect");
        std::process::exit(0);
    }
}
