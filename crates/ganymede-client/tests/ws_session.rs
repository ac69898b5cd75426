//! End-to-end tests against an in-process WebSocket directory server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ganymede_client::{
    upload, ByteReceiver, Client, ClientConfig, GanymedeError, LoadState, MemorySink, Notice,
    Notifier, Terminator, TransferOutcome, TreeCache, WsServer,
};
use ganymede_core::messages::PUSH_ID;
use ganymede_core::{
    frame_encode, Envelope, FieldValue, FrameDecoder, Invid, Message, ObjectHandle, ObjectView,
    Status, TypeRef, TypeSummary,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Default)]
struct Recorder {
    notices: Mutex<Vec<Notice>>,
    terminations: Mutex<Vec<String>>,
}

impl Notifier for Recorder {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

impl Terminator for Recorder {
    fn terminate(&self, reason: &str) {
        self.terminations.lock().unwrap().push(reason.to_string());
    }
}

/// What the fake server saw from the client.
#[derive(Default)]
struct Seen {
    uploaded: Mutex<Vec<u8>>,
    file_statuses: Mutex<Vec<(u64, Status)>>,
}

/// Handle on the fake server: inject pushes, inspect uploads.
struct FakeServer {
    url: String,
    pushes: broadcast::Sender<Message>,
    seen: Arc<Seen>,
}

/// Served by `FetchFile`.
const EXPORT: &[u8] = b"dn: uid=alice,ou=people\nuid: alice\n\ndn: uid=bob,ou=people\nuid: bob\n";

async fn spawn_server() -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (pushes, _) = broadcast::channel(16);
    let seen = Arc::new(Seen::default());

    let push_tx = pushes.clone();
    let store = seen.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let pushes = push_tx.subscribe();
            let store = store.clone();
            tokio::spawn(serve_connection(tcp, pushes, store));
        }
    });

    FakeServer {
        url: format!("ws://{addr}/ganymede"),
        pushes,
        seen,
    }
}

async fn serve_connection(
    tcp: tokio::net::TcpStream,
    mut pushes: broadcast::Receiver<Message>,
    seen: Arc<Seen>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let mut decoder = FrameDecoder::new();

    loop {
        tokio::select! {
            frame = read.next() => {
                let data = match frame {
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                for env in decoder.feed::<Envelope>(&data).unwrap() {
                    let out = respond(env.unwrap(), &seen);
                    if !out.is_empty() && write.send(WsMessage::Binary(out)).await.is_err() {
                        return;
                    }
                }
            }
            push = pushes.recv() => {
                let Ok(msg) = push else { continue };
                let frame = frame_encode(&Envelope { id: PUSH_ID, msg }).unwrap();
                if write.send(WsMessage::Binary(frame)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn push(msg: Message) -> Vec<u8> {
    frame_encode(&Envelope { id: PUSH_ID, msg }).unwrap()
}

/// Bytes of one WebSocket message answering `env`; it may hold several
/// frames, or none.
fn respond(env: Envelope, seen: &Seen) -> Vec<u8> {
    let Envelope { id, msg } = env;
    let mut out = Vec::new();
    let reply = match msg {
        Message::Login { password, .. } if password == "secret" => Message::LoginOk {
            session_id: "s-1".into(),
        },
        Message::Login { .. } => Message::LoginNone {
            reason: Some("bad password".into()),
        },
        Message::Logout => Message::Done,
        Message::ListTypes => Message::Types(vec![TypeSummary {
            type_ref: TypeRef("user".into()),
            label: "Users".into(),
            can_create: true,
            can_inactivate: true,
            embedded: false,
        }]),
        Message::TypeId(_) => Message::TypeIdIs(3),
        Message::Query(q) => Message::Rows(vec![
            ObjectHandle {
                invid: Invid::new(q.type_id, 2),
                label: "bob".into(),
                editable: true,
                inactive: false,
            },
            ObjectHandle {
                invid: Invid::new(q.type_id, 1),
                label: "alice".into(),
                editable: true,
                inactive: false,
            },
        ]),
        Message::ViewObject(invid) if invid.num == 0 => {
            Message::Refused(Status::failure("Permissions", "not visible to you"))
        }
        Message::ViewObject(invid) => {
            if invid.num == 42 {
                // A frame the client cannot decode, sharing the message
                // with the real reply.
                out.extend_from_slice(&3u32.to_be_bytes());
                out.extend_from_slice(&[0xff, 0xff, 0xff]);
            }
            Message::View(ObjectView {
                invid,
                label: "alice".into(),
                fields: vec![FieldValue {
                    name: "shell".into(),
                    value: "/bin/zsh".into(),
                    editable: true,
                }],
            })
        }
        Message::UploadStart { .. } => Message::UploadReady { upload_id: 1 },
        Message::UploadChunk { data, .. } => {
            seen.uploaded.lock().unwrap().extend_from_slice(&data);
            Message::UploadStatus(None)
        }
        Message::UploadEnd { .. } => Message::UploadStatus(None),
        Message::UploadKeepalive { .. } => Message::Done,
        Message::FetchFile { transfer_id, name } if name == "export.ldif" => {
            out.extend(frame_encode(&Envelope {
                id,
                msg: Message::FileReady {
                    size: EXPORT.len() as u64,
                },
            })
            .unwrap());
            for chunk in EXPORT.chunks(16) {
                out.extend(push(Message::FileChunk {
                    transfer_id,
                    data: chunk.to_vec(),
                }));
            }
            out.extend(push(Message::FileKeepalive { transfer_id }));
            out.extend(push(Message::FileEnd {
                transfer_id,
                completed: true,
            }));
            return out;
        }
        Message::FetchFile { name, .. } => {
            Message::Refused(Status::failure("No such file", name))
        }
        Message::FileStatus {
            transfer_id,
            status,
        } => {
            seen.file_statuses.lock().unwrap().push((transfer_id, status));
            return out;
        }
        Message::Ping(id) => Message::Pong(id),
        other => Message::Refused(Status::failure("Unsupported", other.kind())),
    };
    out.extend(frame_encode(&Envelope { id, msg: reply }).unwrap());
    out
}

fn client_for(server: &FakeServer) -> (Client, Arc<Recorder>) {
    let config = ClientConfig {
        server: server.url.clone(),
        request_timeout_secs: 5,
        ..Default::default()
    };
    let recorder = Arc::new(Recorder::default());
    let ws = WsServer::new(config.clone()).unwrap();
    let client = Client::with_hooks(Arc::new(ws), config, recorder.clone(), recorder.clone());
    (client, recorder)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn login_browse_and_logout() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);

    let session = client.login("alice", "secret").await.unwrap();
    let mut tree = TreeCache::new(session.clone());
    tree.load_roots().await.unwrap();

    let labels: Vec<String> = tree
        .expand("Users")
        .await
        .unwrap()
        .iter()
        .map(|c| c.label().to_string())
        .collect();
    assert_eq!(labels, vec!["alice", "bob"]);

    client.logout().await.unwrap();
    assert!(!session.is_alive());
}

#[tokio::test]
async fn rejected_credentials_yield_auth_failure() {
    let server = spawn_server().await;
    let (client, recorder) = client_for(&server);

    let err = client.login("alice", "guess").await.unwrap_err();
    assert!(matches!(err, GanymedeError::AuthFailed(_)));
    assert!(matches!(
        recorder.notices.lock().unwrap().as_slice(),
        [Notice::AuthFailed { .. }]
    ));
}

#[tokio::test]
async fn nobody_listening_is_a_connectivity_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = FakeServer {
        url: format!("ws://{addr}/ganymede"),
        pushes: broadcast::channel(1).0,
        seen: Arc::default(),
    };
    let (client, recorder) = client_for(&server);

    let err = client.login("alice", "secret").await.unwrap_err();
    assert!(err.is_connectivity());
    assert!(matches!(
        recorder.notices.lock().unwrap().as_slice(),
        [Notice::Connectivity { .. }]
    ));
}

#[tokio::test]
async fn refused_view_is_a_business_error() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);
    let session = client.login("alice", "secret").await.unwrap();

    let err = session.view_object(Invid::new(3, 0)).await.unwrap_err();
    assert!(matches!(err, GanymedeError::RemoteBusiness { ref title, .. } if title == "Permissions"));

    let view = client.open_view(Invid::new(3, 1)).await.unwrap();
    assert!(matches!(view.wait_for_load().await, LoadState::Loaded(_)));
}

#[tokio::test]
async fn server_messages_arrive_in_order() {
    let server = spawn_server().await;
    let (client, recorder) = client_for(&server);
    client.login("alice", "secret").await.unwrap();

    for text in ["backup at 02:00", "backup done"] {
        server
            .pushes
            .send(Message::ServerMessage { text: text.into() })
            .unwrap();
    }

    wait_until(|| recorder.notices.lock().unwrap().len() == 2).await;
    assert_eq!(
        *recorder.notices.lock().unwrap(),
        vec![
            Notice::ServerMessage {
                text: "backup at 02:00".into()
            },
            Notice::ServerMessage {
                text: "backup done".into()
            },
        ]
    );
}

#[tokio::test]
async fn forced_disconnect_terminates() {
    let server = spawn_server().await;
    let (client, recorder) = client_for(&server);
    let session = client.login("alice", "secret").await.unwrap();

    server
        .pushes
        .send(Message::Disconnected {
            reason: "server shutting down".into(),
        })
        .unwrap();

    wait_until(|| !recorder.terminations.lock().unwrap().is_empty()).await;
    assert!(!session.is_alive());
    assert!(client.session().await.is_err());
    assert_eq!(
        *recorder.terminations.lock().unwrap(),
        vec!["server shutting down".to_string()]
    );
}

#[tokio::test]
async fn upload_reaches_server() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);
    let session = client.login("alice", "secret").await.unwrap();

    let data: Vec<u8> = (0..5000u32).map(|i| (i % 97) as u8).collect();
    let receiver = session.open_upload("users.csv", data.len() as u64).await.unwrap();
    receiver.keepalive().await.unwrap();
    let report = upload(&data[..], &*receiver, 1024, |_| {}).await.unwrap();

    assert_eq!(report.chunks, 5);
    assert_eq!(*server.seen.uploaded.lock().unwrap(), data);
}

#[tokio::test]
async fn reply_survives_a_bad_frame_in_the_same_message() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);
    let session = client.login("alice", "secret").await.unwrap();

    let view = tokio::time::timeout(Duration::from_secs(2), session.view_object(Invid::new(3, 42)))
        .await
        .expect("reply delivered without waiting for the request timeout")
        .unwrap();
    assert_eq!(view.invid, Invid::new(3, 42));
}

#[tokio::test]
async fn server_pushes_a_requested_file() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);
    client.login("alice", "secret").await.unwrap();

    let sink = MemorySink::new();
    let receiver = client
        .receive_file("export.ldif", Box::new(sink.clone()))
        .await
        .unwrap();
    let report = receiver.finished().await;

    assert_eq!(report.outcome, TransferOutcome::Completed);
    assert_eq!(sink.contents(), EXPORT);

    wait_until(|| !server.seen.file_statuses.lock().unwrap().is_empty()).await;
    let statuses = server.seen.file_statuses.lock().unwrap().clone();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].1.ok);
}

#[tokio::test]
async fn unknown_file_is_refused_and_aborted() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);
    client.login("alice", "secret").await.unwrap();

    let sink = MemorySink::new();
    let err = client
        .receive_file("missing.ldif", Box::new(sink.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, GanymedeError::RemoteBusiness { ref title, .. } if title == "No such file"));
    assert_eq!(sink.outcome(), Some(TransferOutcome::Aborted));
}

#[tokio::test]
async fn push_for_unknown_transfer_is_answered_with_a_failure() {
    let server = spawn_server().await;
    let (client, _) = client_for(&server);
    client.login("alice", "secret").await.unwrap();

    server
        .pushes
        .send(Message::FileChunk {
            transfer_id: 99,
            data: b"stray".to_vec(),
        })
        .unwrap();

    wait_until(|| !server.seen.file_statuses.lock().unwrap().is_empty()).await;
    let (transfer_id, status) = server.seen.file_statuses.lock().unwrap()[0].clone();
    assert_eq!(transfer_id, 99);
    assert!(!status.ok);
}

/// Server that accepts the login and then never answers again.
async fn spawn_mute_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let (mut write, mut read) = ws.split();
        let mut decoder = FrameDecoder::new();
        let mut logged_in = false;
        while let Some(Ok(frame)) = read.next().await {
            let WsMessage::Binary(data) = frame else { continue };
            for env in decoder.feed::<Envelope>(&data).unwrap() {
                let env = env.unwrap();
                if logged_in {
                    continue;
                }
                logged_in = true;
                let reply = Envelope {
                    id: env.id,
                    msg: Message::LoginOk {
                        session_id: "s-mute".into(),
                    },
                };
                write
                    .send(WsMessage::Binary(frame_encode(&reply).unwrap()))
                    .await
                    .unwrap();
            }
        }
    });
    format!("ws://{addr}/ganymede")
}

#[tokio::test]
async fn unanswered_keepalive_fails_later_calls_fast() {
    let url = spawn_mute_server().await;
    let config = ClientConfig {
        server: url,
        request_timeout_secs: 1,
        ping_interval_secs: 1,
        ..Default::default()
    };
    let recorder = Arc::new(Recorder::default());
    let ws = WsServer::new(config.clone()).unwrap();
    let client = Client::with_hooks(Arc::new(ws), config, recorder.clone(), recorder);
    let session = client.login("alice", "secret").await.unwrap();

    // First ping at 1s, its timeout at 2s.
    tokio::time::sleep(Duration::from_millis(3000)).await;

    let started = std::time::Instant::now();
    let err = session.list_types().await.unwrap_err();
    assert!(matches!(err, GanymedeError::Connectivity(_)), "{err}");
    assert!(started.elapsed() < Duration::from_millis(500));
}
