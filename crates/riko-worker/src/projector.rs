//! Projects protocol event batches into relational rows.
//!
//! Items inside a batch are processed in array order and independently: a
//! failing item is logged with its jid/key and the batch moves on. Forward
//! progress over the event stream beats strict durability of any one row.

use std::path::PathBuf;
use std::sync::Arc;

use riko_core::{
    DecodedMessage, MessageContent, MessageStatus, ProtocolKind, canonical_jid, decode_message,
    is_group_jid,
};
use riko_db::{ChatUpsert, ContactUpsert, Db, GroupUpsert, MessageUpsert};
use tracing::{debug, warn};

use crate::error::Result;
use crate::media::save_media;
use crate::socket::{
    ChatSync, ContactSync, GroupSync, MessageSync, MessageUpdateSync, ProtocolSocket, ReactionSync,
    SocketResult,
};

pub struct Projector {
    db: Arc<Db>,
    device_id: String,
    media_root: PathBuf,
}

impl Projector {
    pub fn new(db: Arc<Db>, device_id: impl Into<String>, media_root: PathBuf) -> Self {
        Self { db, device_id: device_id.into(), media_root }
    }

    pub async fn contacts_upsert(&self, socket: &Arc<dyn ProtocolSocket>, batch: &[ContactSync]) {
        for contact in batch {
            if let Err(error) = self.project_contact(socket, contact).await {
                warn!(jid = %contact.jid, %error, "contact projection failed");
            }
        }
    }

    async fn project_contact(
        &self,
        socket: &Arc<dyn ProtocolSocket>,
        contact: &ContactSync,
    ) -> Result<()> {
        let jid = canonical_jid(&contact.jid);

        // Both side fetches are expected to fail for privacy-restricted
        // contacts; the row is persisted either way.
        let avatar_path = fetch_avatar(socket, &jid).await.ok().flatten();
        let status_text = fetch_status_text(socket, &jid).await.ok().flatten();

        self.db
            .upsert_contact(&ContactUpsert {
                jid: jid.clone(),
                name: contact.name.clone(),
                notify_name: contact.notify.clone(),
                verified_name: contact.verified_name.clone(),
                avatar_path,
                status_text,
            })
            .await?;
        self.db.link_device_contact(&self.device_id, &jid).await?;
        Ok(())
    }

    pub async fn chats_upsert(&self, batch: &[ChatSync]) {
        for chat in batch {
            let jid = canonical_jid(&chat.jid);
            let upsert = ChatUpsert {
                jid: jid.clone(),
                display_name: chat.name.clone(),
                description: chat.description.clone(),
                unread_delta: chat.unread_delta,
                read_only: chat.read_only,
                archived: chat.archived,
                last_activity_at: chat.last_activity_at,
            };
            if let Err(error) = self.db.upsert_chat(&self.device_id, &upsert).await {
                warn!(%jid, %error, "chat projection failed");
            }
        }
    }

    pub async fn messages_upsert(&self, socket: &Arc<dyn ProtocolSocket>, batch: &[MessageSync]) {
        for message in batch {
            if let Err(error) = self.project_message(socket, message).await {
                warn!(
                    key_id = %message.key_id,
                    remote_jid = %message.remote_jid,
                    %error,
                    "message projection failed"
                );
            }
        }
    }

    async fn project_message(
        &self,
        socket: &Arc<dyn ProtocolSocket>,
        message: &MessageSync,
    ) -> Result<()> {
        let remote_jid = canonical_jid(&message.remote_jid);
        let decoded = decode_message(&message.message);

        // Reactions are keyed to another row, not a row of their own.
        if let MessageContent::Reaction { key_id, emoji } = &decoded.content {
            if let Some(target) = key_id {
                let reactor = self.sender_jid(message, &remote_jid);
                self.db.merge_message_reaction(target, &remote_jid, &reactor, emoji).await?;
            }
            return Ok(());
        }

        let media_fields = self.download_media(socket, &remote_jid, &decoded).await;

        let parent_key_id = match &decoded.quoted_key_id {
            Some(quoted) => self
                .db
                .get_message(quoted, &remote_jid)
                .await?
                .map(|parent| parent.key_id),
            None => None,
        };

        let media = decoded.content.media();
        self.db
            .upsert_message(
                &self.device_id,
                &MessageUpsert {
                    key_id: message.key_id.clone(),
                    remote_jid: remote_jid.clone(),
                    from_me: message.from_me,
                    participant: message.participant.as_deref().map(canonical_jid),
                    push_name: message.push_name.clone(),
                    content_type: decoded.content.type_name().to_owned(),
                    text: decoded.content.text().map(str::to_owned),
                    media_path: media_fields,
                    media_mimetype: media.and_then(|m| m.mimetype.clone()),
                    media_width: media.and_then(|m| m.width),
                    media_height: media.and_then(|m| m.height),
                    media_seconds: media.and_then(|m| m.seconds),
                    view_once: decoded.view_once,
                    forwarded: decoded.forwarded,
                    parent_key_id,
                    sent_at: message.timestamp,
                },
            )
            .await?;

        // First message for an unseen jid creates the chat row.
        self.db.touch_chat(&self.device_id, &remote_jid, message.timestamp).await?;

        let sender = self.sender_jid(message, &remote_jid);
        if !message.from_me {
            self.db
                .upsert_contact(&ContactUpsert {
                    jid: sender.clone(),
                    notify_name: message.push_name.clone(),
                    ..Default::default()
                })
                .await?;
            self.db.link_device_contact(&self.device_id, &sender).await?;
        }

        Ok(())
    }

    /// For every media-bearing type, fetch the bytes and persist them under
    /// the per-contact directory; failure leaves the path empty but never
    /// blocks the row.
    async fn download_media(
        &self,
        socket: &Arc<dyn ProtocolSocket>,
        remote_jid: &str,
        decoded: &DecodedMessage,
    ) -> Option<String> {
        let media = decoded.content.media()?;
        match socket.download_media(&media.payload).await {
            Ok(bytes) => {
                match save_media(&self.media_root, remote_jid, media.mimetype.as_deref(), &bytes)
                    .await
                {
                    Ok(path) => Some(path),
                    Err(error) => {
                        warn!(%remote_jid, %error, "failed to persist media bytes");
                        None
                    }
                }
            }
            Err(error) => {
                warn!(%remote_jid, %error, "media download failed");
                None
            }
        }
    }

    pub async fn messages_update(&self, batch: &[MessageUpdateSync]) {
        for update in batch {
            if let Err(error) = self.project_message_update(update).await {
                warn!(
                    key_id = %update.key_id,
                    remote_jid = %update.remote_jid,
                    %error,
                    "message update projection failed"
                );
            }
        }
    }

    async fn project_message_update(&self, update: &MessageUpdateSync) -> Result<()> {
        let remote_jid = canonical_jid(&update.remote_jid);

        if is_revoke(update) {
            self.db.soft_delete_message(&update.key_id, &remote_jid).await?;
            return Ok(());
        }

        if let Some(code) = update.status_code {
            let status = MessageStatus::from_protocol_code(code);
            self.db.set_message_status(&update.key_id, &remote_jid, status).await?;

            if status == MessageStatus::Read {
                self.db.decrement_chat_unread(&self.device_id, &remote_jid, 1).await?;
            }
        }

        Ok(())
    }

    pub async fn message_reactions(&self, batch: &[ReactionSync]) {
        for reaction in batch {
            let remote_jid = canonical_jid(&reaction.remote_jid);
            let reactor = canonical_jid(&reaction.reactor_jid);
            if let Err(error) = self
                .db
                .merge_message_reaction(&reaction.key_id, &remote_jid, &reactor, &reaction.emoji)
                .await
            {
                warn!(key_id = %reaction.key_id, %remote_jid, %error, "reaction projection failed");
            }
        }
    }

    pub async fn groups_upsert(&self, socket: &Arc<dyn ProtocolSocket>, batch: &[GroupSync]) {
        for group in batch {
            if let Err(error) = self.project_group(socket, group).await {
                warn!(jid = %group.jid, %error, "group projection failed");
            }
        }
    }

    async fn project_group(&self, socket: &Arc<dyn ProtocolSocket>, group: &GroupSync) -> Result<()> {
        let jid = canonical_jid(&group.jid);

        // Refresh from the protocol when possible; the incoming partial
        // event still applies when the fetch fails.
        let fresh = socket.group_metadata(&jid).await.ok();
        let avatar_path = fetch_avatar(socket, &jid).await.ok().flatten();

        let fresh = fresh.as_ref();
        self.db
            .upsert_group(
                &self.device_id,
                &GroupUpsert {
                    jid: jid.clone(),
                    subject: group.subject.clone().or_else(|| fresh.and_then(|m| m.subject.clone())),
                    owner_jid: group
                        .owner_jid
                        .as_deref()
                        .map(canonical_jid)
                        .or_else(|| fresh.and_then(|m| m.owner_jid.as_deref().map(canonical_jid))),
                    size: group.size.or_else(|| fresh.and_then(|m| m.size)),
                    ephemeral_seconds: group
                        .ephemeral_seconds
                        .or_else(|| fresh.and_then(|m| m.ephemeral_seconds)),
                    description: group
                        .description
                        .clone()
                        .or_else(|| fresh.and_then(|m| m.description.clone())),
                    avatar_path,
                },
            )
            .await?;
        Ok(())
    }

    /// Upsert the authenticated account's own contact; called on the open
    /// transition, best-effort.
    pub async fn upsert_owner_contact(
        &self,
        socket: &Arc<dyn ProtocolSocket>,
        jid: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let jid = canonical_jid(jid);
        let avatar_path = fetch_avatar(socket, &jid).await.ok().flatten();
        self.db
            .upsert_contact(&ContactUpsert {
                jid: jid.clone(),
                name: name.map(str::to_owned),
                avatar_path,
                ..Default::default()
            })
            .await?;
        self.db.link_device_contact(&self.device_id, &jid).await?;
        Ok(())
    }

    fn sender_jid(&self, message: &MessageSync, remote_jid: &str) -> String {
        if is_group_jid(remote_jid) {
            message
                .participant
                .as_deref()
                .map(canonical_jid)
                .unwrap_or_else(|| remote_jid.to_owned())
        } else {
            remote_jid.to_owned()
        }
    }
}

fn is_revoke(update: &MessageUpdateSync) -> bool {
    if update.revoke_stub {
        return true;
    }
    let Some(message) = &update.message else { return false };
    matches!(
        decode_message(message).content,
        MessageContent::Protocol { kind: ProtocolKind::Revoke }
    )
}

/// The avatar fetch is explicitly fallible; callers decide to ignore the
/// error, not an empty catch block somewhere below.
async fn fetch_avatar(socket: &Arc<dyn ProtocolSocket>, jid: &str) -> SocketResult<Option<String>> {
    let url = socket.profile_picture_url(jid).await?;
    debug!(%jid, found = url.is_some(), "avatar lookup");
    Ok(url)
}

async fn fetch_status_text(
    socket: &Arc<dyn ProtocolSocket>,
    jid: &str,
) -> SocketResult<Option<String>> {
    socket.fetch_status(jid).await
}
