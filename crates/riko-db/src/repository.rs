use directories::ProjectDirs;
use riko_core::{DeviceStatus, MessageStatus};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::PathBuf;

use crate::error::{DbError, Result};
use crate::models::{
    Chat, ChatUpsert, Contact, ContactUpsert, Device, Group, GroupUpsert, Message, MessageUpsert,
};

pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new() -> Result<Self> {
        let db_path = Self::db_path()?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db = Self::new_with_path(&db_path.display().to_string()).await?;
        tracing::info!("database initialized at: {}", db_path.display());
        Ok(db)
    }

    pub async fn new_with_path(path: &str) -> Result<Self> {
        let db_url = format!("sqlite:{path}?mode=rwc");
        let pool = SqlitePool::connect(&db_url).await?;
        sqlx::raw_sql(crate::schema::SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database, for tests and tooling.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::raw_sql(crate::schema::SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn db_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("RIKO_DB_PATH") {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("dev", "riko", "riko").ok_or(DbError::NoProjectDirs)?;
        Ok(dirs.data_dir().join("riko.db"))
    }

    // --- devices -----------------------------------------------------------

    pub async fn create_device(&self, id: &str) -> Result<Device> {
        let now = now();
        sqlx::query(
            "INSERT INTO devices (id, created_at, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_device(id)
            .await?
            .ok_or_else(|| DbError::DeviceNotFound(id.to_string()))
    }

    pub async fn get_device(&self, id: &str) -> Result<Option<Device>> {
        Ok(sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn set_device_status(&self, id: &str, status: DeviceStatus) -> Result<()> {
        sqlx::query("UPDATE devices SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_device_qr(&self, id: &str, qr: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE devices SET qr = ?, updated_at = ? WHERE id = ?")
            .bind(qr)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_device_started(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE devices SET started_at = ?, stopped_at = NULL, updated_at = ? WHERE id = ?")
            .bind(now())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_device_stopped(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE devices SET stopped_at = ?, updated_at = ? WHERE id = ?")
            .bind(now())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_device_owner(&self, id: &str, owner_jid: &str) -> Result<()> {
        sqlx::query("UPDATE devices SET owner_jid = ?, updated_at = ? WHERE id = ?")
            .bind(owner_jid)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- contacts ----------------------------------------------------------

    /// Upsert keyed by jid. Only non-empty incoming fields overwrite stored
    /// ones; a blank never erases data already observed.
    pub async fn upsert_contact(&self, contact: &ContactUpsert) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"INSERT INTO contacts (jid, name, notify_name, verified_name, avatar_path, status_text, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(jid) DO UPDATE SET
                 name = COALESCE(NULLIF(excluded.name, ''), name),
                 notify_name = COALESCE(NULLIF(excluded.notify_name, ''), notify_name),
                 verified_name = COALESCE(NULLIF(excluded.verified_name, ''), verified_name),
                 avatar_path = COALESCE(NULLIF(excluded.avatar_path, ''), avatar_path),
                 status_text = COALESCE(NULLIF(excluded.status_text, ''), status_text),
                 updated_at = excluded.updated_at"#,
        )
        .bind(&contact.jid)
        .bind(&contact.name)
        .bind(&contact.notify_name)
        .bind(&contact.verified_name)
        .bind(&contact.avatar_path)
        .bind(&contact.status_text)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn link_device_contact(&self, device_id: &str, contact_jid: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO device_contacts (device_id, contact_jid) VALUES (?, ?)",
        )
        .bind(device_id)
        .bind(contact_jid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_contact(&self, jid: &str) -> Result<Option<Contact>> {
        Ok(sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE jid = ?")
            .bind(jid)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_device_contacts(&self, device_id: &str) -> Result<Vec<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(
            "SELECT c.* FROM contacts c
             JOIN device_contacts dc ON dc.contact_jid = c.jid
             WHERE dc.device_id = ? ORDER BY c.name",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- chats -------------------------------------------------------------

    /// Upsert keyed by `(device_id, jid)`. The unread counter is additive:
    /// the protocol reports per-batch deltas, never an absolute total.
    pub async fn upsert_chat(&self, device_id: &str, chat: &ChatUpsert) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"INSERT INTO chats (device_id, jid, display_name, description, unread_count, read_only, archived, last_activity_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, MAX(0, ?), ?, ?, ?, ?, ?)
               ON CONFLICT(device_id, jid) DO UPDATE SET
                 display_name = COALESCE(NULLIF(excluded.display_name, ''), display_name),
                 description = COALESCE(NULLIF(excluded.description, ''), description),
                 unread_count = MAX(0, unread_count + ?),
                 read_only = COALESCE(?, read_only),
                 archived = COALESCE(?, archived),
                 last_activity_at = COALESCE(excluded.last_activity_at, last_activity_at),
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(&chat.jid)
        .bind(&chat.display_name)
        .bind(&chat.description)
        .bind(chat.unread_delta)
        .bind(chat.read_only.unwrap_or(false))
        .bind(chat.archived.unwrap_or(false))
        .bind(chat.last_activity_at)
        .bind(now)
        .bind(now)
        .bind(chat.unread_delta)
        .bind(chat.read_only)
        .bind(chat.archived)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create the chat row on first reference and bump its last activity.
    pub async fn touch_chat(&self, device_id: &str, jid: &str, activity_at: Option<i64>) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"INSERT INTO chats (device_id, jid, last_activity_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(device_id, jid) DO UPDATE SET
                 last_activity_at = MAX(COALESCE(last_activity_at, 0), COALESCE(excluded.last_activity_at, 0)),
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(jid)
        .bind(activity_at.unwrap_or(now))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn decrement_chat_unread(&self, device_id: &str, jid: &str, by: i64) -> Result<()> {
        sqlx::query(
            "UPDATE chats SET unread_count = MAX(0, unread_count - ?), updated_at = ?
             WHERE device_id = ? AND jid = ?",
        )
        .bind(by)
        .bind(now())
        .bind(device_id)
        .bind(jid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_chat(&self, device_id: &str, jid: &str) -> Result<Option<Chat>> {
        Ok(sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE device_id = ? AND jid = ?")
            .bind(device_id)
            .bind(jid)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_chats(&self, device_id: &str) -> Result<Vec<Chat>> {
        Ok(sqlx::query_as::<_, Chat>(
            "SELECT * FROM chats WHERE device_id = ?
             ORDER BY COALESCE(last_activity_at, updated_at) DESC",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?)
    }

    // --- messages ----------------------------------------------------------

    /// Idempotent upsert keyed by `(key_id, remote_jid)`; a re-delivered
    /// event updates the row with its fields instead of duplicating it.
    pub async fn upsert_message(&self, device_id: &str, msg: &MessageUpsert) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"INSERT INTO messages (device_id, key_id, remote_jid, from_me, participant, push_name,
                                     content_type, text, media_path, media_mimetype, media_width,
                                     media_height, media_seconds, view_once, forwarded, parent_key_id,
                                     sent_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(key_id, remote_jid) DO UPDATE SET
                 from_me = excluded.from_me,
                 participant = COALESCE(excluded.participant, participant),
                 push_name = COALESCE(NULLIF(excluded.push_name, ''), push_name),
                 content_type = excluded.content_type,
                 text = excluded.text,
                 media_path = COALESCE(excluded.media_path, media_path),
                 media_mimetype = COALESCE(excluded.media_mimetype, media_mimetype),
                 media_width = COALESCE(excluded.media_width, media_width),
                 media_height = COALESCE(excluded.media_height, media_height),
                 media_seconds = COALESCE(excluded.media_seconds, media_seconds),
                 view_once = excluded.view_once,
                 forwarded = excluded.forwarded,
                 sent_at = COALESCE(excluded.sent_at, sent_at),
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(&msg.key_id)
        .bind(&msg.remote_jid)
        .bind(msg.from_me)
        .bind(&msg.participant)
        .bind(&msg.push_name)
        .bind(&msg.content_type)
        .bind(&msg.text)
        .bind(&msg.media_path)
        .bind(&msg.media_mimetype)
        .bind(msg.media_width)
        .bind(msg.media_height)
        .bind(msg.media_seconds)
        .bind(msg.view_once)
        .bind(msg.forwarded)
        .bind(&msg.parent_key_id)
        .bind(msg.sent_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, key_id: &str, remote_jid: &str) -> Result<Option<Message>> {
        Ok(sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE key_id = ? AND remote_jid = ?",
        )
        .bind(key_id)
        .bind(remote_jid)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Newest first, soft-deleted rows excluded.
    pub async fn list_messages(
        &self,
        device_id: &str,
        remote_jid: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        Ok(sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE device_id = ? AND remote_jid = ? AND deleted_at IS NULL
             ORDER BY COALESCE(sent_at, created_at) DESC LIMIT ?",
        )
        .bind(device_id)
        .bind(remote_jid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_messages(&self, device_id: &str, remote_jid: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE device_id = ? AND remote_jid = ?",
        )
        .bind(device_id)
        .bind(remote_jid)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn set_message_status(
        &self,
        key_id: &str,
        remote_jid: &str,
        status: MessageStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET status = ?, updated_at = ? WHERE key_id = ? AND remote_jid = ?",
        )
        .bind(status.as_str())
        .bind(now())
        .bind(key_id)
        .bind(remote_jid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Revoked messages keep their row; only `deleted_at` is set.
    pub async fn soft_delete_message(&self, key_id: &str, remote_jid: &str) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET deleted_at = ?, updated_at = ? WHERE key_id = ? AND remote_jid = ?",
        )
        .bind(now())
        .bind(now())
        .bind(key_id)
        .bind(remote_jid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merge one reactor's emoji into the row's reaction map. An empty emoji
    /// withdraws that reactor's reaction. No other field is touched.
    pub async fn merge_message_reaction(
        &self,
        key_id: &str,
        remote_jid: &str,
        reactor_jid: &str,
        emoji: &str,
    ) -> Result<()> {
        let Some(message) = self.get_message(key_id, remote_jid).await? else {
            return Ok(());
        };

        let mut reactions: serde_json::Map<String, serde_json::Value> = message
            .reactions
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        if emoji.is_empty() {
            reactions.remove(reactor_jid);
        } else {
            reactions.insert(reactor_jid.to_owned(), serde_json::Value::String(emoji.to_owned()));
        }

        let raw = serde_json::to_string(&reactions)?;
        sqlx::query(
            "UPDATE messages SET reactions = ?, updated_at = ? WHERE key_id = ? AND remote_jid = ?",
        )
        .bind(raw)
        .bind(now())
        .bind(key_id)
        .bind(remote_jid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- groups ------------------------------------------------------------

    /// Partial merge: a group-metadata event that omits a field must not
    /// null it out.
    pub async fn upsert_group(&self, device_id: &str, group: &GroupUpsert) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"INSERT INTO groups (device_id, jid, subject, owner_jid, size, ephemeral_seconds, description, avatar_path, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(device_id, jid) DO UPDATE SET
                 subject = COALESCE(NULLIF(excluded.subject, ''), subject),
                 owner_jid = COALESCE(NULLIF(excluded.owner_jid, ''), owner_jid),
                 size = COALESCE(excluded.size, size),
                 ephemeral_seconds = COALESCE(excluded.ephemeral_seconds, ephemeral_seconds),
                 description = COALESCE(NULLIF(excluded.description, ''), description),
                 avatar_path = COALESCE(NULLIF(excluded.avatar_path, ''), avatar_path),
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(&group.jid)
        .bind(&group.subject)
        .bind(&group.owner_jid)
        .bind(group.size)
        .bind(group.ephemeral_seconds)
        .bind(&group.description)
        .bind(&group.avatar_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_group(&self, device_id: &str, jid: &str) -> Result<Option<Group>> {
        Ok(sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE device_id = ? AND jid = ?")
            .bind(device_id)
            .bind(jid)
            .fetch_optional(&self.pool)
            .await?)
    }

    // --- credentials -------------------------------------------------------

    /// `None` means the key was never set (or was removed), which is
    /// distinct from a stored empty value.
    pub async fn read_credential(&self, device_id: &str, name: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT data FROM credentials WHERE device_id = ? AND name = ?",
        )
        .bind(device_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(data,)| data))
    }

    pub async fn write_credential(&self, device_id: &str, name: &str, data: &str) -> Result<()> {
        let now = now();
        sqlx::query(
            r#"INSERT INTO credentials (device_id, name, data, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(device_id, name) DO UPDATE SET
                 data = excluded.data,
                 updated_at = excluded.updated_at"#,
        )
        .bind(device_id)
        .bind(name)
        .bind(data)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_credential(&self, device_id: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE device_id = ? AND name = ?")
            .bind(device_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Safe to call when no rows exist.
    pub async fn clear_credentials(&self, device_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_credentials(&self, device_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM credentials WHERE device_id = ?")
                .bind(device_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db_with_device() -> Db {
        let db = Db::in_memory().await.unwrap();
        db.create_device("dev1").await.unwrap();
        db
    }

    #[tokio::test]
    async fn message_upsert_is_idempotent_and_applies_second_delivery() {
        let db = db_with_device().await;

        let mut msg = MessageUpsert {
            key_id: "K1".into(),
            remote_jid: "111@s.whatsapp.net".into(),
            content_type: "conversation".into(),
            text: Some("first".into()),
            ..Default::default()
        };
        db.upsert_message("dev1", &msg).await.unwrap();

        msg.text = Some("second".into());
        db.upsert_message("dev1", &msg).await.unwrap();

        assert_eq!(db.count_messages("dev1", "111@s.whatsapp.net").await.unwrap(), 1);
        let stored = db.get_message("K1", "111@s.whatsapp.net").await.unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn redelivery_without_media_keeps_downloaded_path() {
        let db = db_with_device().await;

        let mut msg = MessageUpsert {
            key_id: "K2".into(),
            remote_jid: "111@s.whatsapp.net".into(),
            content_type: "image".into(),
            media_path: Some("111@s.whatsapp.net/a.jpeg".into()),
            media_mimetype: Some("image/jpeg".into()),
            ..Default::default()
        };
        db.upsert_message("dev1", &msg).await.unwrap();

        msg.media_path = None;
        db.upsert_message("dev1", &msg).await.unwrap();

        let stored = db.get_message("K2", "111@s.whatsapp.net").await.unwrap().unwrap();
        assert_eq!(stored.media_path.as_deref(), Some("111@s.whatsapp.net/a.jpeg"));
    }

    #[tokio::test]
    async fn unread_counter_is_additive_not_overwritten() {
        let db = db_with_device().await;
        let jid = "222@s.whatsapp.net";

        for delta in [2, 3] {
            db.upsert_chat(
                "dev1",
                &ChatUpsert { jid: jid.into(), unread_delta: delta, ..Default::default() },
            )
            .await
            .unwrap();
        }
        db.decrement_chat_unread("dev1", jid, 1).await.unwrap();

        let chat = db.get_chat("dev1", jid).await.unwrap().unwrap();
        assert_eq!(chat.unread_count, 4);
    }

    #[tokio::test]
    async fn unread_counter_never_goes_negative() {
        let db = db_with_device().await;
        let jid = "222@s.whatsapp.net";
        db.touch_chat("dev1", jid, None).await.unwrap();
        db.decrement_chat_unread("dev1", jid, 5).await.unwrap();
        let chat = db.get_chat("dev1", jid).await.unwrap().unwrap();
        assert_eq!(chat.unread_count, 0);
    }

    #[tokio::test]
    async fn contact_merge_keeps_existing_fields_on_blank_update() {
        let db = db_with_device().await;

        db.upsert_contact(&ContactUpsert {
            jid: "333@s.whatsapp.net".into(),
            name: Some("Alice".into()),
            status_text: Some("hi".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        db.upsert_contact(&ContactUpsert {
            jid: "333@s.whatsapp.net".into(),
            name: Some(String::new()),
            notify_name: Some("Ali".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        let contact = db.get_contact("333@s.whatsapp.net").await.unwrap().unwrap();
        assert_eq!(contact.name.as_deref(), Some("Alice"));
        assert_eq!(contact.notify_name.as_deref(), Some("Ali"));
        assert_eq!(contact.status_text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn group_partial_merge_does_not_null_unmentioned_fields() {
        let db = db_with_device().await;
        let jid = "120363000@g.us";

        db.upsert_group(
            "dev1",
            &GroupUpsert {
                jid: jid.into(),
                subject: Some("Team".into()),
                size: Some(12),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.upsert_group(
            "dev1",
            &GroupUpsert { jid: jid.into(), description: Some("notes".into()), ..Default::default() },
        )
        .await
        .unwrap();

        let group = db.get_group("dev1", jid).await.unwrap().unwrap();
        assert_eq!(group.subject.as_deref(), Some("Team"));
        assert_eq!(group.size, Some(12));
        assert_eq!(group.description.as_deref(), Some("notes"));
    }

    #[tokio::test]
    async fn reactions_merge_without_touching_other_fields() {
        let db = db_with_device().await;
        let jid = "444@s.whatsapp.net";

        db.upsert_message(
            "dev1",
            &MessageUpsert {
                key_id: "K3".into(),
                remote_jid: jid.into(),
                content_type: "conversation".into(),
                text: Some("body".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.merge_message_reaction("K3", jid, "555@s.whatsapp.net", "❤").await.unwrap();
        db.merge_message_reaction("K3", jid, "666@s.whatsapp.net", "👍").await.unwrap();
        db.merge_message_reaction("K3", jid, "555@s.whatsapp.net", "").await.unwrap();

        let stored = db.get_message("K3", jid).await.unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("body"));
        let reactions: serde_json::Value =
            serde_json::from_str(stored.reactions.as_deref().unwrap()).unwrap();
        assert_eq!(reactions["666@s.whatsapp.net"], "👍");
        assert!(reactions.get("555@s.whatsapp.net").is_none());
    }

    #[tokio::test]
    async fn soft_delete_keeps_the_row() {
        let db = db_with_device().await;
        let jid = "777@s.whatsapp.net";
        db.upsert_message(
            "dev1",
            &MessageUpsert {
                key_id: "K4".into(),
                remote_jid: jid.into(),
                content_type: "conversation".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.soft_delete_message("K4", jid).await.unwrap();
        let stored = db.get_message("K4", jid).await.unwrap().unwrap();
        assert!(stored.deleted_at.is_some());
    }

    #[tokio::test]
    async fn credentials_read_write_remove_clear() {
        let db = db_with_device().await;

        assert!(db.read_credential("dev1", "creds").await.unwrap().is_none());

        db.write_credential("dev1", "creds", "{}").await.unwrap();
        db.write_credential("dev1", "pre-key-1", "{\"k\":1}").await.unwrap();
        assert_eq!(db.read_credential("dev1", "creds").await.unwrap().as_deref(), Some("{}"));

        db.delete_credential("dev1", "pre-key-1").await.unwrap();
        assert!(db.read_credential("dev1", "pre-key-1").await.unwrap().is_none());

        db.clear_credentials("dev1").await.unwrap();
        assert_eq!(db.count_credentials("dev1").await.unwrap(), 0);

        // clearing again with no rows is fine
        db.clear_credentials("dev1").await.unwrap();
    }
}
