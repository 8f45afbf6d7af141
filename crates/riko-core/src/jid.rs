//! Parsing and canonicalization of protocol JIDs.

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Collapse the device/agent suffix variants of a JID to one canonical
/// `user@server` form.
///
/// The protocol addresses the same identity as `user@s.whatsapp.net`,
/// `user:12@s.whatsapp.net` (device suffix) or `user.0:1@s.whatsapp.net`
/// (agent + device). All of those must map to the same row key.
pub fn canonical_jid(jid: &str) -> String {
    let (user, server) = match jid.split_once('@') {
        Some((user, server)) => (user, server),
        None => (jid, USER_SERVER),
    };

    let user = user.split([':', '.']).next().unwrap_or(user);

    // Legacy clients use c.us for the user server.
    let server = if server == "c.us" { USER_SERVER } else { server };

    format!("{user}@{server}")
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(&format!("@{GROUP_SERVER}"))
}

pub fn is_user_jid(jid: &str) -> bool {
    jid.ends_with(&format!("@{USER_SERVER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_user_jid_passes_through() {
        assert_eq!(canonical_jid("5511999999999@s.whatsapp.net"), "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn device_suffix_is_stripped() {
        assert_eq!(canonical_jid("5511999999999:12@s.whatsapp.net"), "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn agent_and_device_suffix_are_stripped() {
        assert_eq!(canonical_jid("5511999999999.0:1@s.whatsapp.net"), "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn bare_user_gets_user_server() {
        assert_eq!(canonical_jid("5511999999999"), "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn legacy_server_is_normalized() {
        assert_eq!(canonical_jid("5511999999999@c.us"), "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn group_jid_is_untouched() {
        let jid = "120363040011223344@g.us";
        assert_eq!(canonical_jid(jid), jid);
        assert!(is_group_jid(jid));
        assert!(!is_user_jid(jid));
    }
}
