//! The envelope spoken between the parent process and a worker. Both
//! directions carry the same shape over line-delimited JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands the parent sends to a worker.
pub mod command {
    pub const START: &str = "START";
    pub const STOP: &str = "STOP";
    pub const RESTART: &str = "RESTART";
    pub const LOGOUT: &str = "LOGOUT";
    pub const SEND_MESSAGE: &str = "SEND_MESSAGE";
    pub const GET_MEMORY_USAGE: &str = "GET_MEMORY_USAGE";
    pub const GET_CPU_USAGE: &str = "GET_CPU_USAGE";
    pub const GET_UPTIME: &str = "GET_UPTIME";
}

/// Out-of-band notifications a worker pushes to the parent.
pub mod notify {
    pub const CONNECTION_UPDATE: &str = "CONNECTION_UPDATE";
    pub const QR_UPDATED: &str = "QR_UPDATED";
    pub const STOPPED: &str = "STOPPED";
    pub const DEVICE_NOT_FOUND: &str = "DEVICE_NOT_FOUND";
    pub const DEVICE_ALREADY_STARTED: &str = "DEVICE_ALREADY_STARTED";
    pub const DB_CONNECTION_ERROR: &str = "DB_CONNECTION_ERROR";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn request(command: &str) -> Self {
        Self {
            command: command.to_owned(),
            status: None,
            message: None,
            data: None,
        }
    }

    pub fn ok(command: &str) -> Self {
        Self {
            command: command.to_owned(),
            status: Some(true),
            message: None,
            data: None,
        }
    }

    pub fn fail(command: &str, message: impl Into<String>) -> Self {
        Self {
            command: command.to_owned(),
            status: Some(false),
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default() + "\n"
    }

    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

/// `data` payload of a `SEND_MESSAGE` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub to: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_a_line() {
        let envelope = Envelope::ok(command::SEND_MESSAGE)
            .with_message("sent")
            .with_data(json!({ "keyId": "ABC" }));
        let parsed = Envelope::from_line(&envelope.to_line()).unwrap();
        assert_eq!(parsed.command, "SEND_MESSAGE");
        assert_eq!(parsed.status, Some(true));
        assert_eq!(parsed.data.unwrap()["keyId"], "ABC");
    }

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let line = Envelope::request(command::START).to_line();
        assert_eq!(line.trim(), r#"{"command":"START"}"#);
    }

    #[test]
    fn garbage_lines_parse_to_none() {
        assert!(Envelope::from_line("not json").is_none());
    }
}
