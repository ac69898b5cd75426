//! ganymede-client: session core of the Ganymede directory client.
//!
//! - [`session`]: login, the single live [`SessionHandle`], logout and
//!   cleanup after a server-forced disconnect
//! - [`callback`]: the endpoint the server uses to push events
//! - [`tree`]: lazily expanded cache of schema types and their objects
//! - [`loader`]: detail views populated in the background
//! - [`file_transfer`]: chunked transfers with exactly-once finalization
//! - [`transport`]: the WebSocket proxy for a real server

pub mod callback;
pub mod config;
pub mod file_transfer;
pub mod loader;
pub mod notify;
pub mod resource;
pub mod server;
pub mod session;
pub mod transport;
pub mod tree;

#[cfg(test)]
mod mock;

pub use callback::{Callback, CallbackEndpoint};
pub use config::ClientConfig;
pub use file_transfer::{
    upload, ByteReceiver, DiskSink, FileReceiver, FileSink, MemorySink, TransferOutcome,
    TransferReport, UploadReport,
};
pub use loader::{spawn_object_view, AsyncLoader, LoadState};
pub use notify::{LogNotifier, Notice, Notifier, ProcessExit, Terminator};
pub use resource::{Disposable, ResourceRegistry};
pub use server::{RemoteSession, Server};
pub use session::{Client, SessionHandle};
pub use transport::WsServer;
pub use tree::{ObjectInstanceNode, ObjectTypeNode, TreeCache};

pub use ganymede_core::{GResult, GanymedeError};
