use serde::{Deserialize, Serialize};

/// Connection status persisted on the device row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Close,
    Connecting,
    ReceivingQr,
    Open,
    LoggedOut,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Close => "close",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::ReceivingQr => "receiving_qr",
            DeviceStatus::Open => "open",
            DeviceStatus::LoggedOut => "logged_out",
        }
    }
}

/// Sentinel the application injects when a stop was requested locally,
/// distinct from every protocol disconnect code.
pub const MANUAL_STOP_CODE: u16 = 400;

/// Protocol code for a session that was logged out remotely.
pub const LOGGED_OUT_CODE: u16 = 401;

/// What a disconnect means for the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Stop was requested by the application. No reconnect.
    ManualStop,
    /// The session is permanently invalid until re-paired. Credentials are
    /// purged, no reconnect.
    LoggedOut,
    /// Everything else, including an absent code. Reconnect immediately.
    Transient,
}

impl DisconnectKind {
    pub fn classify(code: Option<u16>) -> Self {
        match code {
            Some(MANUAL_STOP_CODE) => DisconnectKind::ManualStop,
            Some(LOGGED_OUT_CODE) => DisconnectKind::LoggedOut,
            _ => DisconnectKind::Transient,
        }
    }
}

/// Delivery status of a message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Played,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Played => "played",
            MessageStatus::Error => "error",
        }
    }

    /// Map the protocol's numeric ack level to a row status.
    pub fn from_protocol_code(code: i64) -> Self {
        match code {
            0 => MessageStatus::Error,
            1 => MessageStatus::Pending,
            2 => MessageStatus::Sent,
            3 => MessageStatus::Delivered,
            4 => MessageStatus::Read,
            _ => MessageStatus::Played,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_stop_code_is_manual_stop() {
        assert_eq!(DisconnectKind::classify(Some(400)), DisconnectKind::ManualStop);
    }

    #[test]
    fn logged_out_code_is_terminal() {
        assert_eq!(DisconnectKind::classify(Some(401)), DisconnectKind::LoggedOut);
    }

    #[test]
    fn unknown_and_absent_codes_are_transient() {
        assert_eq!(DisconnectKind::classify(Some(515)), DisconnectKind::Transient);
        assert_eq!(DisconnectKind::classify(Some(428)), DisconnectKind::Transient);
        assert_eq!(DisconnectKind::classify(None), DisconnectKind::Transient);
    }

    #[test]
    fn ack_levels_map_to_statuses() {
        assert_eq!(MessageStatus::from_protocol_code(3), MessageStatus::Delivered);
        assert_eq!(MessageStatus::from_protocol_code(4), MessageStatus::Read);
    }
}
