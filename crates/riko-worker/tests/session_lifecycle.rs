//! End-to-end controller tests against a scripted in-memory socket.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use riko_core::{Envelope, LOGGED_OUT_CODE, MANUAL_STOP_CODE};
use riko_db::{CredentialStore, Db};
use riko_worker::{
    ChatSync, Connection, ContactSync, GroupMetadata, MessageSync, MessageUpdateSync, Projector,
    ProtocolConnector, ProtocolSocket, SessionController, SocketError, SocketEvent, SocketResult,
    StartOutcome, WorkerError,
};

/// What one `connect` attempt does: come up and emit a script of events,
/// or be refused outright.
enum Connect {
    Up(Vec<SocketEvent>),
    Refused,
}

struct FakeConnector {
    scripts: Mutex<VecDeque<Connect>>,
    senders: Mutex<Vec<mpsc::Sender<SocketEvent>>>,
    sockets: Mutex<Vec<Arc<FakeSocket>>>,
    auths: Mutex<Vec<bool>>,
    refused: AtomicUsize,
    registered: bool,
    silent_close: bool,
}

impl FakeConnector {
    fn new(scripts: Vec<Connect>) -> Arc<Self> {
        Self::build(scripts, true, false)
    }

    fn new_unregistered(scripts: Vec<Connect>) -> Arc<Self> {
        Self::build(scripts, false, false)
    }

    fn new_silent_close(scripts: Vec<Connect>) -> Arc<Self> {
        Self::build(scripts, true, true)
    }

    fn build(scripts: Vec<Connect>, registered: bool, silent_close: bool) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            senders: Mutex::new(Vec::new()),
            sockets: Mutex::new(Vec::new()),
            auths: Mutex::new(Vec::new()),
            refused: AtomicUsize::new(0),
            registered,
            silent_close,
        })
    }

    fn connects(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    fn socket(&self, index: usize) -> Arc<FakeSocket> {
        self.sockets.lock().unwrap()[index].clone()
    }

    fn sender(&self, index: usize) -> mpsc::Sender<SocketEvent> {
        self.senders.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ProtocolConnector for FakeConnector {
    async fn connect(&self, auth: Option<Value>) -> SocketResult<Connection> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Connect::Up(Vec::new()));
        let script = match script {
            Connect::Up(events) => events,
            Connect::Refused => {
                self.refused.fetch_add(1, Ordering::SeqCst);
                return Err(SocketError::Protocol("connection refused".into()));
            }
        };

        let (tx, rx) = mpsc::channel(100);
        let socket = Arc::new(FakeSocket {
            events: tx.clone(),
            send_calls: AtomicUsize::new(0),
            registered: self.registered,
            silent_close: self.silent_close,
        });

        self.senders.lock().unwrap().push(tx.clone());
        self.sockets.lock().unwrap().push(socket.clone());
        self.auths.lock().unwrap().push(auth.is_some());

        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(Connection { socket, events: rx })
    }
}

struct FakeSocket {
    events: mpsc::Sender<SocketEvent>,
    send_calls: AtomicUsize,
    registered: bool,
    /// Swallow close() without ever emitting the close event.
    silent_close: bool,
}

#[async_trait]
impl ProtocolSocket for FakeSocket {
    async fn send_text(&self, _jid: &str, _text: &str) -> SocketResult<String> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("SENT-{n}"))
    }

    async fn is_registered(&self, _jid: &str) -> SocketResult<bool> {
        Ok(self.registered)
    }

    async fn fetch_status(&self, _jid: &str) -> SocketResult<Option<String>> {
        Ok(Some("hey there".into()))
    }

    async fn profile_picture_url(&self, jid: &str) -> SocketResult<Option<String>> {
        Ok(Some(format!("https://pps.example/{jid}.jpg")))
    }

    async fn group_metadata(&self, jid: &str) -> SocketResult<GroupMetadata> {
        Ok(GroupMetadata {
            jid: jid.to_owned(),
            subject: Some("Fake Group".into()),
            size: Some(3),
            ..Default::default()
        })
    }

    async fn download_media(&self, _payload: &Value) -> SocketResult<Vec<u8>> {
        Ok(b"media-bytes".to_vec())
    }

    async fn logout(&self) -> SocketResult<()> {
        self.events.send(SocketEvent::Close { code: Some(LOGGED_OUT_CODE) }).await.ok();
        Ok(())
    }

    async fn close(&self) -> SocketResult<()> {
        if !self.silent_close {
            self.events.send(SocketEvent::Close { code: Some(MANUAL_STOP_CODE) }).await.ok();
        }
        Ok(())
    }
}

struct Harness {
    controller: Arc<SessionController>,
    connector: Arc<FakeConnector>,
    db: Arc<Db>,
    #[allow(dead_code)]
    notifications: mpsc::Receiver<Envelope>,
    media_root: PathBuf,
}

async fn harness(connector: Arc<FakeConnector>) -> Harness {
    let db = Arc::new(Db::in_memory().await.unwrap());
    db.create_device("dev1").await.unwrap();

    let media_root =
        std::env::temp_dir().join(format!("riko-test-{}", uuid::Uuid::new_v4()));
    let creds = CredentialStore::new(db.clone(), "dev1");
    let projector = Projector::new(db.clone(), "dev1", media_root.clone());
    let (notification_tx, notifications) = mpsc::channel(1000);

    let controller = SessionController::new(
        "dev1",
        db.clone(),
        creds,
        connector.clone(),
        projector,
        notification_tx,
    );

    Harness { controller, connector, db, notifications, media_root }
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn wait_for_status(db: &Arc<Db>, status: &str) {
    let db = db.clone();
    let status = status.to_owned();
    wait_for(&format!("device status {status}"), || {
        let db = db.clone();
        let status = status.clone();
        async move { db.get_device("dev1").await.unwrap().unwrap().status == status }
    })
    .await;
}

fn open_event() -> SocketEvent {
    SocketEvent::Open { jid: "5511000000000:7@s.whatsapp.net".into(), name: Some("Me".into()) }
}

#[tokio::test]
async fn manual_stop_closes_without_reconnect() {
    let mut h = harness(FakeConnector::new(vec![Connect::Up(vec![open_event()])])).await;

    assert_eq!(h.controller.start().await.unwrap(), StartOutcome::Started);
    wait_for_status(&h.db, "open").await;

    h.controller.stop().await.unwrap();
    wait_for_status(&h.db, "close").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connector.connects(), 1, "manual stop must not reconnect");

    let device = h.db.get_device("dev1").await.unwrap().unwrap();
    assert!(device.stopped_at.is_some());
    assert!(!h.controller.is_connected().await);

    // The stopped notification is already enqueued when stop() returns.
    let mut drained = Vec::new();
    while let Ok(envelope) = h.notifications.try_recv() {
        drained.push(envelope.command);
    }
    assert!(drained.iter().any(|command| command == riko_core::notify::STOPPED));
}

#[tokio::test]
async fn logged_out_purges_credentials_and_pairs_from_scratch() {
    let h = harness(FakeConnector::new(vec![
        Connect::Up(vec![open_event()]),
        Connect::Up(vec![SocketEvent::Qr { qr: "2@pairing-payload".into() }]),
    ]))
    .await;

    h.db.write_credential("dev1", "creds", "{\"me\":{}}").await.unwrap();
    h.db.write_credential("dev1", "pre-key-1", "{}").await.unwrap();

    h.controller.start().await.unwrap();
    wait_for_status(&h.db, "open").await;

    h.controller.logout().await.unwrap();
    wait_for_status(&h.db, "logged_out").await;

    assert_eq!(h.db.count_credentials("dev1").await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connector.connects(), 1, "logout must not reconnect");

    // Re-pairing starts from scratch: no auth state, QR is emitted again.
    assert_eq!(h.controller.start().await.unwrap(), StartOutcome::Started);
    wait_for_status(&h.db, "receiving_qr").await;
    let device = h.db.get_device("dev1").await.unwrap().unwrap();
    assert_eq!(device.qr.as_deref(), Some("2@pairing-payload"));
    assert!(!h.connector.auths.lock().unwrap()[1], "second connect must carry no auth");
}

#[tokio::test]
async fn transient_disconnect_reconnects_until_open() {
    let h = harness(FakeConnector::new(vec![
        Connect::Up(vec![open_event(), SocketEvent::Close { code: Some(515) }]),
        Connect::Up(vec![open_event()]),
    ]))
    .await;

    h.controller.start().await.unwrap();

    let connector = h.connector.clone();
    wait_for("automatic reconnect", || {
        let connector = connector.clone();
        async move { connector.connects() == 2 }
    })
    .await;
    wait_for_status(&h.db, "open").await;
    assert!(h.controller.is_connected().await);
}

// Runs in real time: sqlite work happens on OS threads tokio cannot see, so a
// paused clock auto-advances past the pool's acquire timeout and every query
// spuriously times out.
#[tokio::test]
async fn reconnect_retries_past_a_refused_attempt() {
    let h = harness(FakeConnector::new(vec![
        Connect::Up(vec![open_event(), SocketEvent::Close { code: Some(515) }]),
        Connect::Refused,
        Connect::Up(vec![open_event()]),
    ]))
    .await;

    h.controller.start().await.unwrap();

    let connector = h.connector.clone();
    wait_for("reconnect past the refusal", || {
        let connector = connector.clone();
        async move { connector.connects() == 2 }
    })
    .await;
    wait_for_status(&h.db, "open").await;
    assert_eq!(h.connector.refused.load(Ordering::SeqCst), 1);
    assert!(h.controller.is_connected().await);
}

#[tokio::test]
async fn refused_start_resets_status_to_close() {
    let h = harness(FakeConnector::new(vec![Connect::Refused])).await;

    assert!(h.controller.start().await.is_err());

    let device = h.db.get_device("dev1").await.unwrap().unwrap();
    assert_eq!(device.status, "close");
    assert!(!h.controller.is_connected().await);
}

// Real time for the same reason as above; waits out the full stop timeout.
#[tokio::test]
async fn unresponsive_close_times_out_but_proceeds_as_closed() {
    let h =
        harness(FakeConnector::new_silent_close(vec![Connect::Up(vec![open_event()])])).await;

    h.controller.start().await.unwrap();
    wait_for_status(&h.db, "open").await;

    let result = h.controller.stop().await;
    assert!(matches!(result, Err(WorkerError::StopTimeout)));

    // The handle is dropped and the row records the close regardless.
    assert!(!h.controller.is_connected().await);
    let device = h.db.get_device("dev1").await.unwrap().unwrap();
    assert_eq!(device.status, "close");
}

#[tokio::test]
async fn concurrent_starts_yield_one_socket() {
    let h = harness(FakeConnector::new(vec![Connect::Up(vec![open_event()])])).await;

    let (first, second) = tokio::join!(h.controller.start(), h.controller.start());
    let outcomes = [first.unwrap(), second.unwrap()];
    assert!(outcomes.contains(&StartOutcome::Started));
    assert!(outcomes.contains(&StartOutcome::AlreadyStarted));
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test]
async fn unregistered_destination_fails_without_sending() {
    let h = harness(FakeConnector::new_unregistered(vec![Connect::Up(vec![open_event()])])).await;

    h.controller.start().await.unwrap();
    wait_for_status(&h.db, "open").await;

    let result = h.controller.send_text("999@s.whatsapp.net", "hello").await;
    assert!(matches!(result, Err(WorkerError::Unregistered(_))));
    assert_eq!(h.connector.socket(0).send_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_for_unknown_device_fails() {
    let db = Arc::new(Db::in_memory().await.unwrap());
    let creds = CredentialStore::new(db.clone(), "ghost");
    let projector = Projector::new(db.clone(), "ghost", std::env::temp_dir());
    let (notification_tx, _notifications) = mpsc::channel(10);
    let controller = SessionController::new(
        "ghost",
        db,
        creds,
        FakeConnector::new(vec![]),
        projector,
        notification_tx,
    );

    assert!(matches!(controller.start().await, Err(WorkerError::DeviceNotFound(_))));
}

#[tokio::test]
async fn event_batches_project_into_rows() {
    let h = harness(FakeConnector::new(vec![Connect::Up(vec![open_event()])])).await;
    h.controller.start().await.unwrap();
    wait_for_status(&h.db, "open").await;

    let events = h.connector.sender(0);

    events
        .send(SocketEvent::ContactsUpsert {
            contacts: vec![ContactSync {
                jid: "5511888888888:3@s.whatsapp.net".into(),
                name: Some("Bia".into()),
                ..Default::default()
            }],
        })
        .await
        .unwrap();

    let text_message = MessageSync {
        key_id: "MSG-1".into(),
        remote_jid: "5511888888888@s.whatsapp.net".into(),
        push_name: Some("Bia".into()),
        timestamp: Some(1_700_000_000),
        message: json!({ "conversation": "oi" }),
        ..Default::default()
    };
    let image_message = MessageSync {
        key_id: "MSG-2".into(),
        remote_jid: "5511888888888@s.whatsapp.net".into(),
        timestamp: Some(1_700_000_010),
        message: json!({
            "imageMessage": { "caption": "pic", "mimetype": "image/jpeg", "width": 100, "height": 80 }
        }),
        ..Default::default()
    };
    events
        .send(SocketEvent::MessagesUpsert {
            messages: vec![text_message.clone(), image_message, text_message],
        })
        .await
        .unwrap();
    events
        .send(SocketEvent::ChatsUpsert {
            chats: vec![ChatSync {
                jid: "5511888888888@s.whatsapp.net".into(),
                unread_delta: 2,
                ..Default::default()
            }],
        })
        .await
        .unwrap();

    let db = h.db.clone();
    wait_for("projected rows", || {
        let db = db.clone();
        async move {
            db.get_message("MSG-2", "5511888888888@s.whatsapp.net").await.unwrap().is_some()
                && db.get_chat("dev1", "5511888888888@s.whatsapp.net").await.unwrap().is_some()
        }
    })
    .await;

    // duplicate delivery of MSG-1 kept a single row
    assert_eq!(h.db.count_messages("dev1", "5511888888888@s.whatsapp.net").await.unwrap(), 2);

    let image = h.db.get_message("MSG-2", "5511888888888@s.whatsapp.net").await.unwrap().unwrap();
    assert_eq!(image.content_type, "image");
    let media_path = image.media_path.expect("media path recorded");
    assert!(media_path.starts_with("5511888888888@s.whatsapp.net/"));
    assert!(media_path.ends_with(".jpeg"));
    let bytes = tokio::fs::read(h.media_root.join(&media_path)).await.unwrap();
    assert_eq!(bytes, b"media-bytes");

    let contact = h.db.get_contact("5511888888888@s.whatsapp.net").await.unwrap().unwrap();
    assert_eq!(contact.name.as_deref(), Some("Bia"));
    assert_eq!(contact.status_text.as_deref(), Some("hey there"));

    // a read update decrements the unread counter
    events
        .send(SocketEvent::MessagesUpdate {
            updates: vec![MessageUpdateSync {
                key_id: "MSG-1".into(),
                remote_jid: "5511888888888@s.whatsapp.net".into(),
                status_code: Some(4),
                ..Default::default()
            }],
        })
        .await
        .unwrap();

    let db = h.db.clone();
    wait_for("read status applied", || {
        let db = db.clone();
        async move {
            db.get_message("MSG-1", "5511888888888@s.whatsapp.net")
                .await
                .unwrap()
                .map(|m| m.status == "read")
                .unwrap_or(false)
        }
    })
    .await;
    let chat = h.db.get_chat("dev1", "5511888888888@s.whatsapp.net").await.unwrap().unwrap();
    assert_eq!(chat.unread_count, 1);

    // a revoke soft-deletes instead of rewriting content
    events
        .send(SocketEvent::MessagesUpdate {
            updates: vec![MessageUpdateSync {
                key_id: "MSG-1".into(),
                remote_jid: "5511888888888@s.whatsapp.net".into(),
                message: Some(json!({ "protocolMessage": { "type": "REVOKE" } })),
                ..Default::default()
            }],
        })
        .await
        .unwrap();

    let db = h.db.clone();
    wait_for("revoke applied", || {
        let db = db.clone();
        async move {
            db.get_message("MSG-1", "5511888888888@s.whatsapp.net")
                .await
                .unwrap()
                .map(|m| m.deleted_at.is_some())
                .unwrap_or(false)
        }
    })
    .await;

    tokio::fs::remove_dir_all(&h.media_root).await.ok();
}
