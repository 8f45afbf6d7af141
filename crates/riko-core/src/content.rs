//! Single-pass decode of a protocol message payload into an explicit
//! content variant, so downstream code matches exhaustively instead of
//! probing a dozen optional fields.

use serde_json::Value;

/// Metadata for a downloadable media node. `payload` keeps the raw node so
/// the media fetch can hand it back to the protocol layer untouched.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub mimetype: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seconds: Option<i64>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Revoke,
    Other,
}

#[derive(Debug, Clone)]
pub enum MessageContent {
    Conversation { text: String },
    ExtendedText { text: String },
    Image { caption: Option<String>, media: MediaInfo },
    Video { caption: Option<String>, media: MediaInfo },
    Audio { media: MediaInfo },
    Sticker { media: MediaInfo },
    Document { file_name: Option<String>, caption: Option<String>, media: MediaInfo },
    Location { latitude: f64, longitude: f64, name: Option<String> },
    LiveLocation { latitude: f64, longitude: f64, caption: Option<String> },
    Protocol { kind: ProtocolKind },
    Reaction { key_id: Option<String>, emoji: String },
    Unknown,
}

impl MessageContent {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageContent::Conversation { .. } => "conversation",
            MessageContent::ExtendedText { .. } => "extendedText",
            MessageContent::Image { .. } => "image",
            MessageContent::Video { .. } => "video",
            MessageContent::Audio { .. } => "audio",
            MessageContent::Sticker { .. } => "sticker",
            MessageContent::Document { .. } => "document",
            MessageContent::Location { .. } => "location",
            MessageContent::LiveLocation { .. } => "liveLocation",
            MessageContent::Protocol { .. } => "protocol",
            MessageContent::Reaction { .. } => "reaction",
            MessageContent::Unknown => "unknown",
        }
    }

    /// Text body or caption, whichever the variant carries.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Conversation { text } | MessageContent::ExtendedText { text } => Some(text),
            MessageContent::Image { caption, .. }
            | MessageContent::Video { caption, .. }
            | MessageContent::Document { caption, .. }
            | MessageContent::LiveLocation { caption, .. } => caption.as_deref(),
            MessageContent::Location { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        match self {
            MessageContent::Image { media, .. }
            | MessageContent::Video { media, .. }
            | MessageContent::Audio { media }
            | MessageContent::Sticker { media }
            | MessageContent::Document { media, .. } => Some(media),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub content: MessageContent,
    /// An ephemeral/view-once envelope wrapped the real content.
    pub view_once: bool,
    pub forwarded: bool,
    /// Stanza id of the quoted message, when one is referenced.
    pub quoted_key_id: Option<String>,
}

const ENVELOPE_KEYS: [&str; 4] = [
    "ephemeralMessage",
    "viewOnceMessage",
    "viewOnceMessageV2",
    "viewOnceMessageV2Extension",
];

/// Decode a protocol `message` node. Unwraps exactly one layer of
/// ephemeral/view-once envelope; the envelope's presence is reported on the
/// `view_once` flag.
pub fn decode_message(message: &Value) -> DecodedMessage {
    let (inner, view_once) = unwrap_envelope(message);

    let context = find_context_info(inner);
    let forwarded = context
        .and_then(|c| c.get("isForwarded"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let quoted_key_id = context
        .and_then(|c| c.get("stanzaId"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    DecodedMessage {
        content: decode_content(inner),
        view_once,
        forwarded,
        quoted_key_id,
    }
}

fn unwrap_envelope(message: &Value) -> (&Value, bool) {
    for key in ENVELOPE_KEYS {
        if let Some(inner) = message.get(key).and_then(|v| v.get("message")) {
            return (inner, true);
        }
    }
    (message, false)
}

fn find_context_info(message: &Value) -> Option<&Value> {
    let obj = message.as_object()?;
    obj.values().find_map(|node| node.get("contextInfo"))
}

fn decode_content(message: &Value) -> MessageContent {
    if let Some(text) = message.get("conversation").and_then(Value::as_str) {
        return MessageContent::Conversation { text: text.to_owned() };
    }
    if let Some(node) = message.get("extendedTextMessage") {
        return MessageContent::ExtendedText {
            text: str_field(node, "text").unwrap_or_default(),
        };
    }
    if let Some(node) = message.get("imageMessage") {
        return MessageContent::Image {
            caption: str_field(node, "caption"),
            media: media_info(node),
        };
    }
    if let Some(node) = message.get("videoMessage") {
        return MessageContent::Video {
            caption: str_field(node, "caption"),
            media: media_info(node),
        };
    }
    if let Some(node) = message.get("audioMessage") {
        return MessageContent::Audio { media: media_info(node) };
    }
    if let Some(node) = message.get("stickerMessage") {
        return MessageContent::Sticker { media: media_info(node) };
    }
    if let Some(node) = message.get("documentMessage") {
        return MessageContent::Document {
            file_name: str_field(node, "fileName"),
            caption: str_field(node, "caption"),
            media: media_info(node),
        };
    }
    if let Some(node) = message.get("locationMessage") {
        return MessageContent::Location {
            latitude: f64_field(node, "degreesLatitude"),
            longitude: f64_field(node, "degreesLongitude"),
            name: str_field(node, "name"),
        };
    }
    if let Some(node) = message.get("liveLocationMessage") {
        return MessageContent::LiveLocation {
            latitude: f64_field(node, "degreesLatitude"),
            longitude: f64_field(node, "degreesLongitude"),
            caption: str_field(node, "caption"),
        };
    }
    if let Some(node) = message.get("protocolMessage") {
        let kind = match node.get("type") {
            Some(Value::String(s)) if s == "REVOKE" => ProtocolKind::Revoke,
            Some(Value::Number(n)) if n.as_i64() == Some(0) => ProtocolKind::Revoke,
            _ => ProtocolKind::Other,
        };
        return MessageContent::Protocol { kind };
    }
    if let Some(node) = message.get("reactionMessage") {
        return MessageContent::Reaction {
            key_id: node
                .get("key")
                .and_then(|k| k.get("id"))
                .and_then(Value::as_str)
                .map(str::to_owned),
            emoji: str_field(node, "text").unwrap_or_default(),
        };
    }

    MessageContent::Unknown
}

fn media_info(node: &Value) -> MediaInfo {
    MediaInfo {
        mimetype: str_field(node, "mimetype"),
        width: node.get("width").and_then(Value::as_i64),
        height: node.get("height").and_then(Value::as_i64),
        seconds: node.get("seconds").and_then(Value::as_i64),
        payload: node.clone(),
    }
}

fn str_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn f64_field(node: &Value, key: &str) -> f64 {
    node.get(key).and_then(Value::as_f64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_conversation() {
        let decoded = decode_message(&json!({ "conversation": "hello" }));
        assert_eq!(decoded.content.type_name(), "conversation");
        assert_eq!(decoded.content.text(), Some("hello"));
        assert!(!decoded.view_once);
    }

    #[test]
    fn view_once_envelope_is_unwrapped_once_and_flagged() {
        let decoded = decode_message(&json!({
            "viewOnceMessageV2": {
                "message": {
                    "imageMessage": { "caption": "look", "mimetype": "image/jpeg", "width": 640, "height": 480 }
                }
            }
        }));
        assert!(decoded.view_once);
        assert_eq!(decoded.content.type_name(), "image");
        assert_eq!(decoded.content.text(), Some("look"));
        let media = decoded.content.media().unwrap();
        assert_eq!(media.mimetype.as_deref(), Some("image/jpeg"));
        assert_eq!(media.width, Some(640));
    }

    #[test]
    fn ephemeral_envelope_counts_as_enveloped() {
        let decoded = decode_message(&json!({
            "ephemeralMessage": { "message": { "conversation": "ttl" } }
        }));
        assert!(decoded.view_once);
        assert_eq!(decoded.content.text(), Some("ttl"));
    }

    #[test]
    fn extended_text_carries_quote_and_forward_flags() {
        let decoded = decode_message(&json!({
            "extendedTextMessage": {
                "text": "reply",
                "contextInfo": { "stanzaId": "ABC123", "isForwarded": true }
            }
        }));
        assert_eq!(decoded.quoted_key_id.as_deref(), Some("ABC123"));
        assert!(decoded.forwarded);
        assert_eq!(decoded.content.text(), Some("reply"));
    }

    #[test]
    fn revoke_protocol_message_is_recognized() {
        for type_value in [json!("REVOKE"), json!(0)] {
            let decoded = decode_message(&json!({ "protocolMessage": { "type": type_value } }));
            match decoded.content {
                MessageContent::Protocol { kind } => assert_eq!(kind, ProtocolKind::Revoke),
                other => panic!("unexpected content: {other:?}"),
            }
        }
    }

    #[test]
    fn reaction_message_carries_target_key() {
        let decoded = decode_message(&json!({
            "reactionMessage": { "key": { "id": "MSG1" }, "text": "👍" }
        }));
        match decoded.content {
            MessageContent::Reaction { key_id, emoji } => {
                assert_eq!(key_id.as_deref(), Some("MSG1"));
                assert_eq!(emoji, "👍");
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_payload_is_unknown() {
        let decoded = decode_message(&json!({ "pollCreationMessage": {} }));
        assert_eq!(decoded.content.type_name(), "unknown");
    }
}
