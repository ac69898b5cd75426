//! WebSocket connection carrying request/reply envelopes and server pushes.
//!
//! Each binary WebSocket message holds one or more length-prefixed CBOR
//! [`Envelope`]s. Requests get a fresh non-zero id and the reply echoes it;
//! id 0 marks a push. Session pushes are delivered to the [`Callback`] in
//! arrival order; file pushes go to the receiver registered for their
//! transfer id, and the receiver's verdict is pushed back as `FileStatus`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ganymede_core::messages::PUSH_ID;
use ganymede_core::{
    frame_encode, Envelope, FrameDecoder, GResult, GanymedeError, Invid, Message, ObjectHandle,
    ObjectView, Query, Status, TypeRef, TypeSummary,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::callback::Callback;
use crate::config::ClientConfig;
use crate::file_transfer::ByteReceiver;
use crate::server::RemoteSession;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Message>>>>;
type Transfers = Arc<Mutex<HashMap<u64, Arc<dyn ByteReceiver>>>>;

/// One open WebSocket to the server.
pub struct Connection {
    url: String,
    outgoing: mpsc::Sender<WsMessage>,
    pending: Pending,
    transfers: Transfers,
    next_id: AtomicU64,
    next_transfer: AtomicU64,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to `config.server` and start the reader, writer and
    /// keepalive tasks. Pushes go to `callback`.
    pub async fn open(config: &ClientConfig, callback: Arc<dyn Callback>) -> GResult<Arc<Self>> {
        let url = config.server.clone();
        let (ws, _response) = time::timeout(config.request_timeout(), connect_async(url.as_str()))
            .await
            .map_err(|_| GanymedeError::Timeout)?
            .map_err(|e| GanymedeError::Connectivity(format!("WebSocket connect error: {e}")))?;
        info!(%url, "connected");

        let (sink, stream) = ws.split();
        let (outgoing, outgoing_rx) = mpsc::channel::<WsMessage>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let transfers: Transfers = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(write_loop(sink, outgoing_rx, connected.clone()));
        let reader = tokio::spawn(read_loop(
            stream,
            Router {
                callback,
                transfers: transfers.clone(),
                outgoing: outgoing.clone(),
            },
            pending.clone(),
            connected.clone(),
        ));

        let conn = Arc::new(Self {
            url,
            outgoing,
            pending,
            transfers,
            next_id: AtomicU64::new(PUSH_ID + 1),
            next_transfer: AtomicU64::new(1),
            connected,
            request_timeout: config.request_timeout(),
            tasks: Mutex::new(vec![writer, reader]),
        });

        if let Some(interval) = config.ping_interval() {
            let keepalive = tokio::spawn(keepalive_loop(Arc::downgrade(&conn), interval));
            conn.tasks
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(keepalive);
        }
        Ok(conn)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send `msg` and wait for the matching reply.
    ///
    /// A `Refused` reply becomes [`GanymedeError::RemoteBusiness`].
    pub async fn call(&self, msg: Message) -> GResult<Message> {
        if !self.is_connected() {
            return Err(GanymedeError::Connectivity(format!(
                "connection to {} is closed",
                self.url
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = msg.kind();
        let frame = frame_encode(&Envelope { id, msg })?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, tx);

        if self.outgoing.send(WsMessage::Binary(frame)).await.is_err() {
            self.forget(id);
            return Err(GanymedeError::Connectivity("writer task has stopped".into()));
        }

        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Message::Refused(status))) => {
                debug!(id, kind, title = %status.title, "request refused");
                Err(GanymedeError::RemoteBusiness {
                    title: status.title,
                    message: status.message,
                })
            }
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GanymedeError::Connectivity(format!(
                "connection lost while waiting for {kind} reply"
            ))),
            Err(_) => {
                self.forget(id);
                warn!(id, kind, "request timed out");
                Err(GanymedeError::Timeout)
            }
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
    }

    /// Route pushes for a new transfer id to `receiver` until it ends.
    fn register_transfer(&self, receiver: Arc<dyn ByteReceiver>) -> u64 {
        let transfer_id = self.next_transfer.fetch_add(1, Ordering::Relaxed);
        self.transfers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(transfer_id, receiver);
        transfer_id
    }

    fn drop_transfer(&self, transfer_id: u64) {
        self.transfers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&transfer_id);
    }

    /// Treat the peer as gone: refuse new calls and fail the waiting ones.
    fn mark_down(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clear();
            let _ = self.outgoing.try_send(WsMessage::Close(None));
            warn!(url = %self.url, "connection marked down");
        }
    }

    /// Send a close frame and stop accepting calls.
    pub async fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.outgoing.send(WsMessage::Close(None)).await;
            debug!(url = %self.url, "connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outgoing: mpsc::Receiver<WsMessage>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg) = outgoing.recv().await {
        let closing = matches!(msg, WsMessage::Close(_));
        if let Err(e) = sink.send(msg).await {
            warn!(error = %e, "WebSocket write error");
            break;
        }
        if closing {
            break;
        }
    }
    connected.store(false, Ordering::Release);
    debug!("writer loop ended");
}

/// Destinations for pushes arriving on one connection.
struct Router {
    callback: Arc<dyn Callback>,
    transfers: Transfers,
    outgoing: mpsc::Sender<WsMessage>,
}

impl Router {
    async fn deliver(&self, msg: Message) {
        if let Some(transfer_id) = msg.transfer_id() {
            self.deliver_file(transfer_id, msg).await;
            return;
        }
        match msg {
            Message::Disconnected { reason } => self.callback.disconnected(reason),
            Message::ServerMessage { text } => self.callback.message_received(text),
            other => warn!(kind = other.kind(), "unexpected push"),
        }
    }

    async fn deliver_file(&self, transfer_id: u64, msg: Message) {
        let receiver = self
            .transfers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&transfer_id)
            .cloned();
        let Some(receiver) = receiver else {
            debug!(transfer_id, kind = msg.kind(), "push for unknown transfer");
            self.report(
                transfer_id,
                Status::failure("Unknown transfer", format!("no receiver for {transfer_id}")),
            )
            .await;
            return;
        };

        let verdict = match msg {
            Message::FileChunk { data, .. } => match receiver.send_bytes(&data).await {
                Ok(None) => return,
                Ok(Some(status)) => {
                    // The sender must stop; finalize now instead of waiting
                    // for the lease.
                    let _ = receiver.end(false).await;
                    status
                }
                Err(e) => {
                    let _ = receiver.end(false).await;
                    Status::failure("Receive failed", e.to_string())
                }
            },
            Message::FileKeepalive { .. } => {
                if let Err(e) = receiver.keepalive().await {
                    debug!(transfer_id, error = %e, "keepalive not applied");
                }
                return;
            }
            Message::FileEnd { completed, .. } => match receiver.end(completed).await {
                Ok(status) => status.unwrap_or_else(Status::success),
                Err(e) => Status::failure("Finalize failed", e.to_string()),
            },
            _ => return,
        };

        self.transfers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&transfer_id);
        self.report(transfer_id, verdict).await;
    }

    async fn report(&self, transfer_id: u64, status: Status) {
        let env = Envelope {
            id: PUSH_ID,
            msg: Message::FileStatus {
                transfer_id,
                status,
            },
        };
        match frame_encode(&env) {
            Ok(frame) => {
                let _ = self.outgoing.send(WsMessage::Binary(frame)).await;
            }
            Err(e) => warn!(transfer_id, error = %e, "could not encode file status"),
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    router: Router,
    pending: Pending,
    connected: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();

    while let Some(msg) = stream.next().await {
        let data = match msg {
            Ok(WsMessage::Binary(data)) => data,
            Ok(WsMessage::Ping(payload)) => {
                let _ = router.outgoing.send(WsMessage::Pong(payload)).await;
                continue;
            }
            Ok(WsMessage::Close(_)) => {
                debug!("WebSocket close frame received");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(error = %e, "WebSocket read error");
                break;
            }
        };

        let frames = match decoder.feed::<Envelope>(&data) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "frame stream out of sync, buffer dropped");
                continue;
            }
        };

        for frame in frames {
            let Envelope { id, msg } = match frame {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    continue;
                }
            };

            if id == PUSH_ID {
                if msg.is_push() {
                    router.deliver(msg).await;
                } else {
                    warn!(kind = msg.kind(), "reply without a request id");
                }
                continue;
            }
            let waiter = pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(msg);
                }
                None => debug!(id, kind = msg.kind(), "reply for unknown request"),
            }
        }
    }

    connected.store(false, Ordering::Release);
    // Dropping the senders fails every outstanding call.
    pending.lock().unwrap_or_else(|p| p.into_inner()).clear();
    // Receivers left without a sender fall to their leases.
    router
        .transfers
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clear();
    debug!("reader loop ended");
}

async fn keepalive_loop(conn: Weak<Connection>, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.tick().await; // first tick is immediate
    let mut ping_id: u64 = 0;

    loop {
        ticker.tick().await;
        let Some(conn) = conn.upgrade() else { break };
        if !conn.is_connected() {
            break;
        }

        ping_id += 1;
        match conn.call(Message::Ping(ping_id)).await {
            Ok(Message::Pong(id)) if id == ping_id => {}
            Ok(other) => warn!(kind = other.kind(), "unexpected reply to ping"),
            Err(e) => {
                warn!(url = %conn.url(), error = %e, "keepalive ping failed");
                conn.mark_down();
                break;
            }
        }
    }
    debug!("keepalive loop ended");
}

fn unexpected(request: &str, reply: &Message) -> GanymedeError {
    GanymedeError::InvalidMessage(format!(
        "unexpected reply to {request}: {}",
        reply.kind()
    ))
}

/// Authenticated session carried by a [`Connection`].
pub struct WsRemoteSession {
    conn: Arc<Connection>,
    session_id: String,
}

impl WsRemoteSession {
    pub fn new(conn: Arc<Connection>, session_id: String) -> Self {
        Self { conn, session_id }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl RemoteSession for WsRemoteSession {
    async fn logout(&self) -> GResult<()> {
        let reply = self.conn.call(Message::Logout).await;
        self.conn.close().await;
        debug!(session_id = %self.session_id(), url = %self.conn.url(), "logout sent");
        match reply? {
            Message::Done => Ok(()),
            other => Err(unexpected("logout", &other)),
        }
    }

    async fn list_types(&self) -> GResult<Vec<TypeSummary>> {
        match self.conn.call(Message::ListTypes).await? {
            Message::Types(types) => Ok(types),
            other => Err(unexpected("list_types", &other)),
        }
    }

    async fn type_id(&self, type_ref: &TypeRef) -> GResult<u16> {
        match self.conn.call(Message::TypeId(type_ref.clone())).await? {
            Message::TypeIdIs(id) => Ok(id),
            other => Err(unexpected("type_id", &other)),
        }
    }

    async fn query(&self, query: &Query) -> GResult<Vec<ObjectHandle>> {
        match self.conn.call(Message::Query(query.clone())).await? {
            Message::Rows(rows) => Ok(rows),
            other => Err(unexpected("query", &other)),
        }
    }

    async fn view_object(&self, invid: Invid) -> GResult<ObjectView> {
        match self.conn.call(Message::ViewObject(invid)).await? {
            Message::View(view) => Ok(view),
            other => Err(unexpected("view_object", &other)),
        }
    }

    async fn open_upload(&self, name: &str, size: u64) -> GResult<Arc<dyn ByteReceiver>> {
        let msg = Message::UploadStart {
            name: name.to_string(),
            size,
        };
        match self.conn.call(msg).await? {
            Message::UploadReady { upload_id } => {
                debug!(%name, size, upload_id, "upload opened");
                Ok(Arc::new(RemoteUpload {
                    conn: self.conn.clone(),
                    upload_id,
                }))
            }
            other => Err(unexpected("upload_start", &other)),
        }
    }

    async fn fetch_file(&self, name: &str, receiver: Arc<dyn ByteReceiver>) -> GResult<u64> {
        // Registered before the request goes out: pushes may follow the
        // reply immediately.
        let transfer_id = self.conn.register_transfer(receiver);
        let msg = Message::FetchFile {
            transfer_id,
            name: name.to_string(),
        };
        match self.conn.call(msg).await {
            Ok(Message::FileReady { size }) => {
                debug!(%name, size, transfer_id, "file push accepted");
                Ok(size)
            }
            Ok(other) => {
                self.conn.drop_transfer(transfer_id);
                Err(unexpected("fetch_file", &other))
            }
            Err(e) => {
                self.conn.drop_transfer(transfer_id);
                Err(e)
            }
        }
    }
}

/// Server-side receiver for one upload.
pub struct RemoteUpload {
    conn: Arc<Connection>,
    upload_id: u64,
}

impl RemoteUpload {
    fn status(request: &str, reply: Message) -> GResult<Option<Status>> {
        match reply {
            Message::UploadStatus(status) => Ok(status),
            other => Err(unexpected(request, &other)),
        }
    }
}

#[async_trait]
impl ByteReceiver for RemoteUpload {
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
        let reply = self
            .conn
            .call(Message::UploadChunk {
                upload_id: self.upload_id,
                data: chunk.to_vec(),
            })
            .await?;
        Self::status("upload_chunk", reply)
    }

    async fn end(&self, completed: bool) -> GResult<Option<Status>> {
        let reply = self
            .conn
            .call(Message::UploadEnd {
                upload_id: self.upload_id,
                completed,
            })
            .await?;
        Self::status("upload_end", reply)
    }

    async fn keepalive(&self) -> GResult<()> {
        match self
            .conn
            .call(Message::UploadKeepalive {
                upload_id: self.upload_id,
            })
            .await?
        {
            Message::Done => Ok(()),
            other => Err(unexpected("upload_keepalive", &other)),
        }
    }
}
