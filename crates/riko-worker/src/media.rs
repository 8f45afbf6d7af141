//! Media assets land under `{canonical_jid}/{random}.{ext}` below the media
//! root; rows store the relative path, never the bytes.

use std::path::Path;
use uuid::Uuid;

use crate::error::Result;

pub fn extension_for_mime(mimetype: &str) -> &str {
    // "audio/ogg; codecs=opus" -> "ogg", "image/svg+xml" -> "svg"
    let subtype = mimetype
        .split(';')
        .next()
        .and_then(|base| base.split('/').nth(1))
        .map(|sub| sub.split('+').next().unwrap_or(sub))
        .unwrap_or("");

    match subtype {
        "" => "bin",
        "jpeg" => "jpeg",
        "plain" => "txt",
        other => other,
    }
}

/// Write media bytes to disk and return the relative path to store.
pub async fn save_media(
    media_root: &Path,
    contact_jid: &str,
    mimetype: Option<&str>,
    bytes: &[u8],
) -> Result<String> {
    let extension = extension_for_mime(mimetype.unwrap_or(""));
    let relative = format!("{contact_jid}/{}.{extension}", Uuid::new_v4());

    let absolute = media_root.join(&relative);
    if let Some(parent) = absolute.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&absolute, bytes).await?;

    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_follow_the_declared_mimetype() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpeg");
        assert_eq!(extension_for_mime("video/mp4"), "mp4");
        assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for_mime("image/svg+xml"), "svg");
        assert_eq!(extension_for_mime("application/pdf"), "pdf");
        assert_eq!(extension_for_mime(""), "bin");
    }

    #[tokio::test]
    async fn saved_media_lands_under_the_contact_directory() {
        let root = std::env::temp_dir().join(format!("riko-media-{}", Uuid::new_v4()));
        let relative = save_media(&root, "555@s.whatsapp.net", Some("image/png"), b"png-bytes")
            .await
            .unwrap();

        assert!(relative.starts_with("555@s.whatsapp.net/"));
        assert!(relative.ends_with(".png"));
        let stored = tokio::fs::read(root.join(&relative)).await.unwrap();
        assert_eq!(stored, b"png-bytes");
        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
