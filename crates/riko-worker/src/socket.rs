//! Seam between the session controller and the protocol library. The wire
//! and crypto layers live behind these traits; production connects through
//! the sidecar bridge, tests inject an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("socket is closed")]
    Closed,

    #[error("timed out waiting for the protocol layer")]
    Timeout,
}

pub type SocketResult<T> = std::result::Result<T, SocketError>;

/// A live connection: the socket handle plus its event stream.
pub struct Connection {
    pub socket: Arc<dyn ProtocolSocket>,
    pub events: mpsc::Receiver<SocketEvent>,
}

#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// Open a connection, resuming from `auth` when present. A fresh
    /// connection (no auth) starts the pairing flow and emits QR events.
    async fn connect(&self, auth: Option<Value>) -> SocketResult<Connection>;
}

#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    /// Send a text message, returning the protocol key id of the sent
    /// message.
    async fn send_text(&self, jid: &str, text: &str) -> SocketResult<String>;

    /// Registration check for a destination identity.
    async fn is_registered(&self, jid: &str) -> SocketResult<bool>;

    async fn fetch_status(&self, jid: &str) -> SocketResult<Option<String>>;

    async fn profile_picture_url(&self, jid: &str) -> SocketResult<Option<String>>;

    async fn group_metadata(&self, jid: &str) -> SocketResult<GroupMetadata>;

    /// Retrieve the bytes of a media node previously observed in a message.
    async fn download_media(&self, payload: &Value) -> SocketResult<Vec<u8>>;

    /// Protocol-level logout; the socket will emit `Close` with the
    /// logged-out code.
    async fn logout(&self) -> SocketResult<()>;

    /// Protocol-level close; the socket will emit `Close`.
    async fn close(&self) -> SocketResult<()>;
}

/// Events emitted by a live socket, in delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum SocketEvent {
    Qr { qr: String },
    Open { jid: String, name: Option<String> },
    Close { code: Option<u16> },
    CredsUpdate { name: String, value: Value },
    ContactsUpsert { contacts: Vec<ContactSync> },
    ChatsUpsert { chats: Vec<ChatSync> },
    MessagesUpsert { messages: Vec<MessageSync> },
    MessagesUpdate { updates: Vec<MessageUpdateSync> },
    MessageReactions { reactions: Vec<ReactionSync> },
    GroupsUpsert { groups: Vec<GroupSync> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSync {
    pub jid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
    #[serde(default)]
    pub verified_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSync {
    pub jid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Incremental unread count reported for this batch, not a total.
    #[serde(default)]
    pub unread_delta: i64,
    #[serde(default)]
    pub read_only: Option<bool>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default)]
    pub last_activity_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSync {
    pub key_id: String,
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// The raw protocol `message` node; decoded once by the projector.
    #[serde(default)]
    pub message: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdateSync {
    pub key_id: String,
    pub remote_jid: String,
    /// Protocol ack level, when this update carries one.
    #[serde(default)]
    pub status_code: Option<i64>,
    /// Explicit revoke stub type on the update.
    #[serde(default)]
    pub revoke_stub: bool,
    /// Replacement message node, when present (revokes arrive this way too).
    #[serde(default)]
    pub message: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSync {
    pub key_id: String,
    pub remote_jid: String,
    pub reactor_jid: String,
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSync {
    pub jid: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub owner_jid: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub ephemeral_seconds: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub jid: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub owner_jid: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub ephemeral_seconds: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}
