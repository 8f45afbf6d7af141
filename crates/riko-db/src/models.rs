use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub status: String,
    pub qr: Option<String>,
    pub owner_jid: Option<String>,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialRow {
    pub id: i64,
    pub device_id: String,
    pub name: String,
    pub data: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub id: i64,
    pub jid: String,
    pub name: Option<String>,
    pub notify_name: Option<String>,
    pub verified_name: Option<String>,
    pub avatar_path: Option<String>,
    pub status_text: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chat {
    pub id: i64,
    pub device_id: String,
    pub jid: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub unread_count: i64,
    pub read_only: bool,
    pub archived: bool,
    pub last_activity_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub device_id: String,
    pub key_id: String,
    pub remote_jid: String,
    pub from_me: bool,
    pub participant: Option<String>,
    pub push_name: Option<String>,
    pub content_type: String,
    pub text: Option<String>,
    pub media_path: Option<String>,
    pub media_mimetype: Option<String>,
    pub media_width: Option<i64>,
    pub media_height: Option<i64>,
    pub media_seconds: Option<i64>,
    pub status: String,
    pub view_once: bool,
    pub forwarded: bool,
    pub parent_key_id: Option<String>,
    pub reactions: Option<String>,
    pub sent_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub device_id: String,
    pub jid: String,
    pub subject: Option<String>,
    pub owner_jid: Option<String>,
    pub size: Option<i64>,
    pub ephemeral_seconds: Option<i64>,
    pub description: Option<String>,
    pub avatar_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Incoming contact fields. Blank/absent fields never erase stored data.
#[derive(Debug, Clone, Default)]
pub struct ContactUpsert {
    pub jid: String,
    pub name: Option<String>,
    pub notify_name: Option<String>,
    pub verified_name: Option<String>,
    pub avatar_path: Option<String>,
    pub status_text: Option<String>,
}

/// Incoming chat fields. `unread_delta` is added to the stored counter.
#[derive(Debug, Clone, Default)]
pub struct ChatUpsert {
    pub jid: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub unread_delta: i64,
    pub read_only: Option<bool>,
    pub archived: Option<bool>,
    pub last_activity_at: Option<i64>,
}

/// Fields of a message delivery, keyed by `(key_id, remote_jid)`.
#[derive(Debug, Clone, Default)]
pub struct MessageUpsert {
    pub key_id: String,
    pub remote_jid: String,
    pub from_me: bool,
    pub participant: Option<String>,
    pub push_name: Option<String>,
    pub content_type: String,
    pub text: Option<String>,
    pub media_path: Option<String>,
    pub media_mimetype: Option<String>,
    pub media_width: Option<i64>,
    pub media_height: Option<i64>,
    pub media_seconds: Option<i64>,
    pub view_once: bool,
    pub forwarded: bool,
    pub parent_key_id: Option<String>,
    pub sent_at: Option<i64>,
}

/// Incoming group metadata. Absent fields never null out stored ones.
#[derive(Debug, Clone, Default)]
pub struct GroupUpsert {
    pub jid: String,
    pub subject: Option<String>,
    pub owner_jid: Option<String>,
    pub size: Option<i64>,
    pub ephemeral_seconds: Option<i64>,
    pub description: Option<String>,
    pub avatar_path: Option<String>,
}
