//! Chunked file transfer with exactly-once finalization.
//!
//! The sender pushes byte ranges through a [`ByteReceiver`] and finishes with
//! a single `end(completed)`. [`FileReceiver`] is the local receiving side: it
//! writes chunks to a [`FileSink`] and finalizes the sink exactly once, either
//! because the sender called `end` or because the sender went quiet for a
//! whole lease period, which counts as `end(false)`.
//!
//! [`upload`] is the sending side, usable against a local receiver or the
//! server's upload proxy.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ganymede_core::{GResult, GanymedeError, Status};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::resource::Disposable;

/// Receiving end of a chunked transfer.
///
/// `Ok(None)` from a send means "continue"; `Ok(Some(status))` tells the
/// sender to stop. `Err` is a transport failure.
#[async_trait]
pub trait ByteReceiver: Send + Sync {
    async fn send_bytes(&self, buf: &[u8]) -> GResult<Option<Status>> {
        self.send_bytes_range(buf, 0, buf.len()).await
    }

    /// Send `buf[offset..offset + len]`.
    async fn send_bytes_range(
        &self,
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> GResult<Option<Status>>;

    /// Finish the transfer: `true` for success, `false` for an abort.
    async fn end(&self, completed: bool) -> GResult<Option<Status>>;

    /// Renew the receiver's lease without sending data.
    async fn keepalive(&self) -> GResult<()> {
        Ok(())
    }
}

/// How a transfer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The sender called `end(true)`.
    Completed,
    /// The sender called `end(false)`.
    Aborted,
    /// The lease ran out before the sender called `end`.
    Abandoned,
}

/// Summary produced once a receiver is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    pub bytes: u64,
}

/// Local destination of received bytes.
#[async_trait]
pub trait FileSink: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> GResult<()>;

    /// Called exactly once per transfer.
    async fn finalize(&mut self, outcome: TransferOutcome) -> GResult<()>;
}

/// Sink that keeps everything in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
    outcome: Arc<Mutex<Option<TransferOutcome>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn outcome(&self) -> Option<TransferOutcome> {
        *self.outcome.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn write_chunk(&mut self, data: &[u8]) -> GResult<()> {
        self.data
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(data);
        Ok(())
    }

    async fn finalize(&mut self, outcome: TransferOutcome) -> GResult<()> {
        *self.outcome.lock().unwrap_or_else(|p| p.into_inner()) = Some(outcome);
        Ok(())
    }
}

/// Sink writing to a file; a transfer that does not complete leaves no file.
#[derive(Debug)]
pub struct DiskSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl DiskSink {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> GResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileSink for DiskSink {
    async fn write_chunk(&mut self, data: &[u8]) -> GResult<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            GanymedeError::ProtocolState(format!("{} already closed", self.path.display()))
        })?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn finalize(&mut self, outcome: TransferOutcome) -> GResult<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        if outcome == TransferOutcome::Completed {
            file.flush().await?;
            file.sync_all().await?;
            return Ok(());
        }

        drop(file);
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "could not remove partial file");
        }
        Ok(())
    }
}

struct ReceiverState {
    sink: Option<Box<dyn FileSink>>,
    received: u64,
}

/// Transfer state shared by a [`FileReceiver`] and its lease watchdog.
///
/// The watchdog owns this strongly, so a receiver dropped before `end`
/// still gets finalized.
struct Transfer {
    name: String,
    state: tokio::sync::Mutex<ReceiverState>,
    limit: Option<u64>,
    lease: Duration,
    deadline: Mutex<Instant>,
    report: watch::Sender<Option<TransferReport>>,
    released: Notify,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Transfer {
    fn is_finished(&self) -> bool {
        self.report.borrow().is_some()
    }

    fn renew_lease(&self) {
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now() + self.lease;
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run finalization if it has not run yet. Returns `None` when another
    /// path already finalized.
    async fn finish(&self, outcome: TransferOutcome) -> Option<GResult<()>> {
        let (mut sink, bytes) = {
            let mut state = self.state.lock().await;
            let sink = state.sink.take()?;
            (sink, state.received)
        };

        let result = sink.finalize(outcome).await;
        match &result {
            Ok(()) => info!(name = %self.name, ?outcome, bytes, "transfer finalized"),
            Err(e) => warn!(name = %self.name, ?outcome, error = %e, "finalization failed"),
        }
        self.report.send_replace(Some(TransferReport { outcome, bytes }));

        if outcome != TransferOutcome::Abandoned {
            if let Some(watchdog) = self.watchdog.lock().unwrap_or_else(|p| p.into_inner()).take() {
                watchdog.abort();
            }
        }
        Some(result)
    }

    /// Sender vanished: finalize as `end(false)`.
    async fn abandon(&self, why: &str) {
        if self.finish(TransferOutcome::Abandoned).await.is_some() {
            warn!(
                name = %self.name,
                lease_secs = self.lease.as_secs(),
                why,
                "transfer abandoned"
            );
        }
    }
}

/// Sleep until the lease deadline; finalize as abandoned if nobody renewed
/// it, or at once when the last receiver handle goes away.
async fn watch_lease(transfer: Arc<Transfer>) {
    loop {
        if transfer.is_finished() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(transfer.deadline()) => {
                if Instant::now() >= transfer.deadline() {
                    transfer.abandon("sender went silent").await;
                    return;
                }
            }
            _ = transfer.released.notified() => {
                transfer.abandon("receiver dropped before end").await;
                return;
            }
        }
    }
}

/// Local receiver for one incoming transfer.
pub struct FileReceiver {
    inner: Arc<Transfer>,
}

impl std::fmt::Debug for FileReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReceiver")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl FileReceiver {
    /// Receiver with no size limit; the lease watchdog starts immediately.
    pub fn new(name: impl Into<String>, sink: Box<dyn FileSink>, lease: Duration) -> Arc<Self> {
        Self::build(name.into(), sink, lease, None)
    }

    /// Receiver that rejects data past `limit` bytes.
    pub fn with_limit(
        name: impl Into<String>,
        sink: Box<dyn FileSink>,
        lease: Duration,
        limit: u64,
    ) -> Arc<Self> {
        Self::build(name.into(), sink, lease, Some(limit))
    }

    fn build(
        name: String,
        sink: Box<dyn FileSink>,
        lease: Duration,
        limit: Option<u64>,
    ) -> Arc<Self> {
        let (report, _rx) = watch::channel(None);
        let inner = Arc::new(Transfer {
            name,
            state: tokio::sync::Mutex::new(ReceiverState {
                sink: Some(sink),
                received: 0,
            }),
            limit,
            lease,
            deadline: Mutex::new(Instant::now() + lease),
            report,
            released: Notify::new(),
            watchdog: Mutex::new(None),
        });

        let watchdog = tokio::spawn(watch_lease(inner.clone()));
        *inner.watchdog.lock().unwrap_or_else(|p| p.into_inner()) = Some(watchdog);
        Arc::new(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether finalization has already run.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// The final report, once there is one.
    pub fn report(&self) -> Option<TransferReport> {
        self.inner.report.borrow().clone()
    }

    /// Wait for finalization, whichever way it happens.
    pub async fn finished(&self) -> TransferReport {
        let mut rx = self.inner.report.subscribe();
        loop {
            if let Some(report) = rx.borrow_and_update().clone() {
                return report;
            }
            if rx.changed().await.is_err() {
                // Sender lives in self.inner; unreachable while we hold &self.
                return TransferReport {
                    outcome: TransferOutcome::Abandoned,
                    bytes: 0,
                };
            }
        }
    }
}

#[async_trait]
impl ByteReceiver for FileReceiver {
    async fn send_bytes_range(
        &self,
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> GResult<Option<Status>> {
        let Some(chunk) = offset.checked_add(len).and_then(|end| buf.get(offset..end)) else {
            return Ok(Some(Status::failure(
                "Bad chunk",
                format!("range {offset}+{len} outside a {} byte buffer", buf.len()),
            )));
        };

        let transfer = &self.inner;
        transfer.renew_lease();
        let mut state = transfer.state.lock().await;
        let received = state.received;
        let Some(sink) = state.sink.as_mut() else {
            return Ok(Some(Status::failure(
                "Transfer closed",
                format!("{} has already ended", transfer.name),
            )));
        };

        if let Some(limit) = transfer.limit {
            if received + chunk.len() as u64 > limit {
                return Ok(Some(Status::failure(
                    "Too large",
                    format!("{} exceeds the {limit} byte limit", transfer.name),
                )));
            }
        }

        if let Err(e) = sink.write_chunk(chunk).await {
            return Ok(Some(Status::failure("Write failed", e.to_string())));
        }
        state.received += chunk.len() as u64;
        debug!(name = %transfer.name, bytes = state.received, "chunk received");
        Ok(None)
    }

    async fn end(&self, completed: bool) -> GResult<Option<Status>> {
        let outcome = if completed {
            TransferOutcome::Completed
        } else {
            TransferOutcome::Aborted
        };

        Ok(match self.inner.finish(outcome).await {
            None => Some(Status::failure(
                "Transfer closed",
                format!("{} has already ended", self.inner.name),
            )),
            Some(Ok(())) => None,
            Some(Err(e)) => Some(Status::failure("Finalize failed", e.to_string())),
        })
    }

    async fn keepalive(&self) -> GResult<()> {
        self.inner.renew_lease();
        Ok(())
    }
}

#[async_trait]
impl Disposable for FileReceiver {
    fn describe(&self) -> String {
        format!("transfer {}", self.inner.name)
    }

    async fn dispose(&self) {
        let _ = self.end(false).await;
    }
}

impl Drop for FileReceiver {
    fn drop(&mut self) {
        // Stored permit: the watchdog sees it even if it is not waiting yet.
        self.inner.released.notify_one();
    }
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub bytes: u64,
    pub chunks: u64,
}

/// Stream `source` to `receiver` in `chunk_size` pieces.
///
/// Stops early on a rejection status. `end` is called exactly once whatever
/// happens: `end(true)` after the last chunk, `end(false)` after a rejection,
/// read error or transport error.
pub async fn upload<R, F>(
    mut source: R,
    receiver: &dyn ByteReceiver,
    chunk_size: usize,
    mut on_progress: F,
) -> GResult<UploadReport>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let mut buf = vec![0u8; chunk_size];
    let mut report = UploadReport { bytes: 0, chunks: 0 };

    loop {
        let n = match read_chunk(&mut source, &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                abort(receiver).await;
                return Err(e);
            }
        };
        if n == 0 {
            break;
        }

        match receiver.send_bytes_range(&buf, 0, n).await {
            Ok(None) => {
                report.bytes += n as u64;
                report.chunks += 1;
                on_progress(report.bytes);
            }
            Ok(Some(status)) => {
                warn!(title = %status.title, message = %status.message, "receiver rejected chunk");
                abort(receiver).await;
                return Err(GanymedeError::RemoteBusiness {
                    title: status.title,
                    message: status.message,
                });
            }
            Err(e) => {
                abort(receiver).await;
                return Err(e);
            }
        }
    }

    match receiver.end(true).await? {
        Some(status) if !status.ok => Err(GanymedeError::RemoteBusiness {
            title: status.title,
            message: status.message,
        }),
        _ => {
            info!(bytes = report.bytes, chunks = report.chunks, "upload complete");
            Ok(report)
        }
    }
}

/// Fill `buf` as far as the source allows; 0 means EOF.
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> GResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn abort(receiver: &dyn ByteReceiver) {
    if let Err(e) = receiver.end(false).await {
        debug!(error = %e, "end(false) after failed upload also failed");
    }
}
