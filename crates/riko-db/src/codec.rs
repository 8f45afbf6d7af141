//! Transport-safe encoding for credential material.
//!
//! The protocol layer serializes binary leaves as `{type:"Buffer",
//! data:[..bytes..]}` nodes inside an arbitrary JSON tree. Stored rows carry
//! those leaves base64-encoded instead, and reads decode them back so the
//! round trip is byte-for-byte.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

const BUFFER_TAG: &str = "Buffer";

/// Replace every `{type:"Buffer", data:[bytes]}` leaf with its base64 form.
pub fn encode_buffers(value: &Value) -> Value {
    if let Some(bytes) = buffer_bytes(value) {
        return json!({ "type": BUFFER_TAG, "data": BASE64.encode(bytes) });
    }

    match value {
        Value::Array(items) => Value::Array(items.iter().map(encode_buffers).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), encode_buffers(item)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// Inverse of [`encode_buffers`].
pub fn decode_buffers(value: &Value) -> Value {
    if let Some(encoded) = buffer_base64(value) {
        let bytes = BASE64.decode(encoded).unwrap_or_default();
        return json!({
            "type": BUFFER_TAG,
            "data": bytes.into_iter().map(|b| Value::from(b as u64)).collect::<Vec<_>>(),
        });
    }

    match value {
        Value::Array(items) => Value::Array(items.iter().map(decode_buffers).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), decode_buffers(item)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

fn is_buffer_node(value: &Value) -> Option<&Value> {
    let obj = value.as_object()?;
    if obj.len() == 2 && obj.get("type").and_then(Value::as_str) == Some(BUFFER_TAG) {
        obj.get("data")
    } else {
        None
    }
}

fn buffer_bytes(value: &Value) -> Option<Vec<u8>> {
    let data = is_buffer_node(value)?.as_array()?;
    data.iter()
        .map(|n| n.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn buffer_base64(value: &Value) -> Option<&str> {
    is_buffer_node(value)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_buffers_round_trip_byte_for_byte() {
        let original = json!({
            "noiseKey": {
                "private": { "type": "Buffer", "data": [0, 1, 2, 254, 255] },
                "public": { "type": "Buffer", "data": [] }
            },
            "registrationId": 42,
            "signedKeys": [
                { "type": "Buffer", "data": [9, 8, 7] },
                { "nested": { "deep": { "type": "Buffer", "data": [1] } } }
            ],
            "me": { "id": "5511999@s.whatsapp.net", "name": null }
        });

        let encoded = encode_buffers(&original);
        // the encoded form carries no byte arrays
        assert!(encoded["noiseKey"]["private"]["data"].is_string());
        assert_eq!(decode_buffers(&encoded), original);
    }

    #[test]
    fn non_buffer_objects_pass_through_untouched() {
        let value = json!({ "type": "Buffer" }); // no data field: not a buffer leaf
        assert_eq!(encode_buffers(&value), value);

        let value = json!({ "type": "other", "data": [1, 2] });
        assert_eq!(encode_buffers(&value), value);
    }

    #[test]
    fn scalars_and_empty_trees_are_total() {
        for value in [json!(null), json!(true), json!(3.25), json!("s"), json!([]), json!({})] {
            assert_eq!(decode_buffers(&encode_buffers(&value)), value);
        }
    }
}
