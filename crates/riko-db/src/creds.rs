//! Durable per-device credential store.
//!
//! Writes are retried a bounded number of times and then swallowed: the
//! protocol layer can re-request a lost key, but crashing the worker loses
//! the whole connection.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{decode_buffers, encode_buffers};
use crate::error::Result;
use crate::repository::Db;

const WRITE_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// The root credential blob is stored under this name; signal key entries
/// use `{category}-{id}` names.
pub const CREDS_NAME: &str = "creds";

#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Db>,
    device_id: String,
}

impl CredentialStore {
    pub fn new(db: Arc<Db>, device_id: impl Into<String>) -> Self {
        Self { db, device_id: device_id.into() }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `None` means never set; a stored empty value decodes as `Some`.
    pub async fn read(&self, name: &str) -> Result<Option<Value>> {
        let Some(raw) = self.db.read_credential(&self.device_id, name).await? else {
            return Ok(None);
        };
        let stored: Value = serde_json::from_str(&raw)?;
        Ok(Some(decode_buffers(&stored)))
    }

    /// Write-through with bounded retries. Exhausting the retries logs the
    /// error and returns normally; a lost key write is recoverable, a dead
    /// worker is not.
    pub async fn write(&self, name: &str, value: &Value) {
        let encoded = encode_buffers(value);
        let raw = match serde_json::to_string(&encoded) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::error!(device_id = %self.device_id, name, %error, "unencodable credential value");
                return;
            }
        };

        for attempt in 1..=WRITE_ATTEMPTS {
            match self.db.write_credential(&self.device_id, name, &raw).await {
                Ok(()) => return,
                Err(error) if attempt < WRITE_ATTEMPTS => {
                    tracing::warn!(
                        device_id = %self.device_id,
                        name,
                        attempt,
                        %error,
                        "credential write failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(error) => {
                    tracing::error!(
                        device_id = %self.device_id,
                        name,
                        %error,
                        "credential write failed after {WRITE_ATTEMPTS} attempts, giving up"
                    );
                }
            }
        }
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        self.db.delete_credential(&self.device_id, name).await
    }

    /// Invoked once, on confirmed logout. Safe when no rows exist.
    pub async fn clear_all(&self) -> Result<()> {
        self.db.clear_credentials(&self.device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> CredentialStore {
        let db = Arc::new(Db::in_memory().await.unwrap());
        db.create_device("dev1").await.unwrap();
        CredentialStore::new(db, "dev1")
    }

    #[tokio::test]
    async fn write_then_read_round_trips_buffers() {
        let store = store().await;
        let creds = json!({
            "identityKey": { "type": "Buffer", "data": [1, 2, 3] },
            "me": { "id": "5511999@s.whatsapp.net" }
        });

        store.write(CREDS_NAME, &creds).await;
        let read = store.read(CREDS_NAME).await.unwrap().unwrap();
        assert_eq!(read, creds);
    }

    #[tokio::test]
    async fn missing_key_reads_as_absent() {
        let store = store().await;
        assert!(store.read("app-state-sync-key-1").await.unwrap().is_none());
    }

    // Every insert hits the devices foreign key, so the write fails on all
    // ten attempts. The nine backoff sleeps run in real time: sqlite work
    // happens on OS threads tokio cannot see, so a paused clock auto-advances
    // past the pool's acquire timeout and every query spuriously times out.
    #[tokio::test]
    async fn failing_write_retries_ten_times_then_returns_normally() {
        let db = Arc::new(Db::in_memory().await.unwrap());
        let store = CredentialStore::new(db, "ghost");

        let started = tokio::time::Instant::now();
        store.write(CREDS_NAME, &json!({"k": 1})).await;

        assert!(started.elapsed() >= RETRY_DELAY * (WRITE_ATTEMPTS - 1));
        assert!(store.read(CREDS_NAME).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_all_removes_every_row_and_is_reentrant() {
        let store = store().await;
        store.write(CREDS_NAME, &json!({})).await;
        store.write("pre-key-7", &json!({"k": 7})).await;

        store.clear_all().await.unwrap();
        assert!(store.read(CREDS_NAME).await.unwrap().is_none());
        store.clear_all().await.unwrap();
    }
}
