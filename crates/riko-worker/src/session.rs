//! Owns one device's protocol connection lifecycle: connect, classify
//! disconnects, reconnect on transient failures, and feed the event stream
//! into the projector.

use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, warn};

use riko_core::{DeviceStatus, DisconnectKind, Envelope, canonical_jid, notify};
use riko_db::{CredentialStore, Db};

use crate::error::{Result, WorkerError};
use crate::projector::Projector;
use crate::socket::{ProtocolConnector, ProtocolSocket, SocketEvent};

/// Bound on waiting for the close transition after a stop/logout request.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on automatic reconnect attempts after one transient disconnect;
/// the counter resets once a connection lands.
const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const CREDS_NAME: &str = "creds";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyStarted,
}

pub struct SessionController {
    device_id: String,
    db: Arc<Db>,
    creds: CredentialStore,
    connector: Arc<dyn ProtocolConnector>,
    projector: Projector,
    live: Mutex<Option<Arc<dyn ProtocolSocket>>>,
    stop_requested: AtomicBool,
    /// Bumped on every close transition; stop/logout wait on it.
    closed_tx: watch::Sender<u64>,
    notification_tx: mpsc::Sender<Envelope>,
}

impl SessionController {
    pub fn new(
        device_id: impl Into<String>,
        db: Arc<Db>,
        creds: CredentialStore,
        connector: Arc<dyn ProtocolConnector>,
        projector: Projector,
        notification_tx: mpsc::Sender<Envelope>,
    ) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(0);
        Arc::new(Self {
            device_id: device_id.into(),
            db,
            creds,
            connector,
            projector,
            live: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            closed_tx,
            notification_tx,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn is_connected(&self) -> bool {
        self.live.lock().await.is_some()
    }

    /// Idempotent: a second call while a socket is live reports
    /// `AlreadyStarted` instead of opening a second connection.
    ///
    /// Boxed rather than `async fn`: the close handler re-enters `start`
    /// through a spawned task, and the resulting recursive opaque future
    /// cannot satisfy the spawn's `Send` bound.
    pub fn start(
        self: &Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<StartOutcome>> + Send>> {
        let this = self.clone();
        Box::pin(async move { this.start_inner().await })
    }

    async fn start_inner(self: Arc<Self>) -> Result<StartOutcome> {
        let mut live = self.live.lock().await;
        if live.is_some() {
            info!(device_id = %self.device_id, "start requested while already connected");
            return Ok(StartOutcome::AlreadyStarted);
        }

        if self.db.get_device(&self.device_id).await?.is_none() {
            return Err(WorkerError::DeviceNotFound(self.device_id.clone()));
        }

        self.stop_requested.store(false, Ordering::SeqCst);

        let auth = self.creds.read(CREDS_NAME).await.unwrap_or_else(|error| {
            // Unreadable auth state falls back to pairing from scratch.
            warn!(device_id = %self.device_id, %error, "could not read stored credentials");
            None
        });

        self.set_status(DeviceStatus::Connecting).await;

        let connection = match self.connector.connect(auth).await {
            Ok(connection) => connection,
            Err(error) => {
                // The row must not claim an attempt that is over.
                self.set_status(DeviceStatus::Close).await;
                return Err(error.into());
            }
        };
        *live = Some(connection.socket);
        drop(live);

        self.db.mark_device_started(&self.device_id).await.ok();

        let this = self.clone();
        tokio::spawn(async move {
            this.event_loop(connection.events).await;
        });

        info!(device_id = %self.device_id, "session connecting");
        Ok(StartOutcome::Started)
    }

    /// Issue a protocol-level close and wait for the close transition,
    /// bounded by [`STOP_TIMEOUT`]. On timeout the controller proceeds as
    /// closed anyway.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let Some(socket) = self.live.lock().await.clone() else {
            return Err(WorkerError::NotConnected);
        };

        self.stop_requested.store(true, Ordering::SeqCst);
        let mut closed_rx = self.closed_tx.subscribe();

        if let Err(error) = socket.close().await {
            warn!(device_id = %self.device_id, %error, "protocol close failed");
        }

        self.wait_closed(&mut closed_rx).await
    }

    /// Protocol-level logout. The resulting close carries the logged-out
    /// code, which purges credentials in the close handler.
    pub async fn logout(self: &Arc<Self>) -> Result<()> {
        let Some(socket) = self.live.lock().await.clone() else {
            return Err(WorkerError::NotConnected);
        };

        let mut closed_rx = self.closed_tx.subscribe();

        if let Err(error) = socket.logout().await {
            warn!(device_id = %self.device_id, %error, "protocol logout failed");
        }

        self.wait_closed(&mut closed_rx).await
    }

    pub async fn restart(self: &Arc<Self>) -> Result<StartOutcome> {
        match self.stop().await {
            Ok(()) | Err(WorkerError::NotConnected) => {}
            Err(error) => return Err(error),
        }
        self.start().await
    }

    /// Validates the destination is registered before attempting delivery.
    pub async fn send_text(self: &Arc<Self>, to: &str, text: &str) -> Result<String> {
        let Some(socket) = self.live.lock().await.clone() else {
            return Err(WorkerError::NotConnected);
        };

        let jid = canonical_jid(to);
        if !socket.is_registered(&jid).await? {
            return Err(WorkerError::Unregistered(jid));
        }

        let key_id = socket.send_text(&jid, text).await?;
        Ok(key_id)
    }

    async fn wait_closed(&self, closed_rx: &mut watch::Receiver<u64>) -> Result<()> {
        match tokio::time::timeout(STOP_TIMEOUT, closed_rx.changed()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(WorkerError::StopTimeout),
            Err(_) => {
                // Unresponsive socket: drop it and proceed as closed.
                warn!(device_id = %self.device_id, "close transition timed out");
                *self.live.lock().await = None;
                self.set_status(DeviceStatus::Close).await;
                Err(WorkerError::StopTimeout)
            }
        }
    }

    async fn event_loop(self: Arc<Self>, mut events: mpsc::Receiver<SocketEvent>) {
        let mut saw_close = false;

        while let Some(event) = events.recv().await {
            match event {
                SocketEvent::Qr { qr } => self.on_qr(qr).await,
                SocketEvent::Open { jid, name } => self.on_open(jid, name.as_deref()).await,
                SocketEvent::CredsUpdate { name, value } => {
                    // Write-through before the key can be needed again; a
                    // crash then loses at most the in-flight batch.
                    self.creds.write(&name, &value).await;
                }
                SocketEvent::ContactsUpsert { contacts } => {
                    if let Some(socket) = self.live.lock().await.clone() {
                        self.projector.contacts_upsert(&socket, &contacts).await;
                    }
                }
                SocketEvent::ChatsUpsert { chats } => {
                    self.projector.chats_upsert(&chats).await;
                }
                SocketEvent::MessagesUpsert { messages } => {
                    if let Some(socket) = self.live.lock().await.clone() {
                        self.projector.messages_upsert(&socket, &messages).await;
                    }
                }
                SocketEvent::MessagesUpdate { updates } => {
                    self.projector.messages_update(&updates).await;
                }
                SocketEvent::MessageReactions { reactions } => {
                    self.projector.message_reactions(&reactions).await;
                }
                SocketEvent::GroupsUpsert { groups } => {
                    if let Some(socket) = self.live.lock().await.clone() {
                        self.projector.groups_upsert(&socket, &groups).await;
                    }
                }
                SocketEvent::Close { code } => {
                    saw_close = true;
                    self.on_close(code).await;
                    break;
                }
            }
        }

        // A dropped stream without a close event is a dead socket.
        if !saw_close && self.live.lock().await.is_some() {
            self.on_close(None).await;
        }
    }

    async fn on_qr(&self, qr: String) {
        info!(device_id = %self.device_id, "pairing code received");
        self.db.set_device_qr(&self.device_id, Some(&qr)).await.ok();
        self.set_status(DeviceStatus::ReceivingQr).await;
        self.notify(
            Envelope::ok(notify::QR_UPDATED).with_data(json!({
                "deviceId": self.device_id,
                "qr": qr,
            })),
        )
        .await;
    }

    async fn on_open(&self, jid: String, name: Option<&str>) {
        info!(device_id = %self.device_id, "connection open");
        self.db.set_device_qr(&self.device_id, None).await.ok();
        self.set_status(DeviceStatus::Open).await;

        let owner = canonical_jid(&jid);
        if let Err(error) = self.db.set_device_owner(&self.device_id, &owner).await {
            warn!(device_id = %self.device_id, %error, "could not persist owner jid");
        }
        // Owner contact is best-effort; a failure here must not fail the
        // open transition.
        if let Some(socket) = self.live.lock().await.clone() {
            if let Err(error) = self.projector.upsert_owner_contact(&socket, &owner, name).await {
                warn!(device_id = %self.device_id, %error, "owner contact upsert failed");
            }
        }
    }

    async fn on_close(self: &Arc<Self>, code: Option<u16>) {
        *self.live.lock().await = None;

        let kind = if self.stop_requested.load(Ordering::SeqCst) {
            DisconnectKind::ManualStop
        } else {
            DisconnectKind::classify(code)
        };

        info!(device_id = %self.device_id, ?code, ?kind, "connection closed");

        match kind {
            DisconnectKind::ManualStop => {
                self.set_status(DeviceStatus::Close).await;
                self.db.mark_device_stopped(&self.device_id).await.ok();
                // Enqueue before the close barrier: callers of stop() may
                // drain notifications the moment it returns.
                self.notify(Envelope::ok(notify::STOPPED).with_data(json!({
                    "deviceId": self.device_id,
                })))
                .await;
                self.closed_tx.send_modify(|n| *n += 1);
            }
            DisconnectKind::LoggedOut => {
                self.db.set_device_qr(&self.device_id, None).await.ok();
                self.set_status(DeviceStatus::LoggedOut).await;
                self.db.mark_device_stopped(&self.device_id).await.ok();
                if let Err(error) = self.creds.clear_all().await {
                    error!(device_id = %self.device_id, %error, "failed to purge credentials");
                }
                self.closed_tx.send_modify(|n| *n += 1);
            }
            DisconnectKind::Transient => {
                self.set_status(DeviceStatus::Close).await;
                self.closed_tx.send_modify(|n| *n += 1);

                let this = self.clone();
                tokio::spawn(async move {
                    this.reconnect().await;
                });
            }
        }
    }

    /// Self-heal after a transient disconnect: re-enter `start` (with a
    /// fresh auth read) up to [`RECONNECT_ATTEMPTS`] times with linear
    /// backoff. A manual stop in the meantime abandons the loop; a
    /// successful attempt re-arms it for the next disconnect.
    async fn reconnect(self: Arc<Self>) {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            if self.stop_requested.load(Ordering::SeqCst) {
                return;
            }
            match self.start().await {
                Ok(_) => return,
                Err(error) => {
                    warn!(
                        device_id = %self.device_id,
                        attempt,
                        %error,
                        "automatic reconnect failed"
                    );
                }
            }
            tokio::time::sleep(RECONNECT_DELAY * attempt).await;
        }
        error!(device_id = %self.device_id, "automatic reconnect exhausted its attempts");
    }

    async fn set_status(&self, status: DeviceStatus) {
        if let Err(error) = self.db.set_device_status(&self.device_id, status).await {
            warn!(device_id = %self.device_id, %error, "could not persist device status");
        }
        self.notify(Envelope::ok(notify::CONNECTION_UPDATE).with_data(json!({
            "deviceId": self.device_id,
            "status": status.as_str(),
        })))
        .await;
    }

    async fn notify(&self, envelope: Envelope) {
        if self.notification_tx.send(envelope).await.is_err() {
            warn!(device_id = %self.device_id, "notification channel closed");
        }
    }
}
