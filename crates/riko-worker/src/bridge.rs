//! Production connector: speaks to the `reg` protocol sidecar over
//! line-delimited JSON. The sidecar owns the wire protocol and crypto; this
//! side owns correlation, decoding and lifecycle.
//!
//! Unlike the parent<->worker envelope, this wire format is ours, so
//! requests carry a correlation id and replies are matched exactly.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use riko_ipc::ChildChannel;

use crate::socket::{
    Connection, GroupMetadata, ProtocolConnector, ProtocolSocket, SocketError, SocketEvent,
    SocketResult,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Locate the sidecar directory: explicit override, then walking up from
/// the executable, then the working directory.
pub fn find_bridge_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("RIKO_BRIDGE_DIR") {
        return Some(PathBuf::from(dir));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        let mut current = exe_path.parent();
        while let Some(dir) = current {
            let bridge = dir.join("reg");
            if bridge.join("package.json").exists() {
                return Some(bridge);
            }
            current = dir.parent();
        }
    }

    let cwd = std::env::current_dir().ok()?;
    let bridge = cwd.join("reg");
    bridge.join("package.json").exists().then_some(bridge)
}

pub struct BridgeConnector {
    bridge_dir: PathBuf,
}

impl BridgeConnector {
    pub fn new(bridge_dir: PathBuf) -> Self {
        Self { bridge_dir }
    }

    async fn ensure_dependencies(&self) -> SocketResult<()> {
        if !self.bridge_dir.join("package.json").exists() {
            return Err(SocketError::Protocol(format!(
                "no package.json in {}",
                self.bridge_dir.display()
            )));
        }

        if !self.bridge_dir.join("node_modules").exists() {
            info!("installing bridge dependencies with bun");
            run_bun_install(&self.bridge_dir).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ProtocolConnector for BridgeConnector {
    async fn connect(&self, auth: Option<Value>) -> SocketResult<Connection> {
        self.ensure_dependencies().await?;

        info!("starting protocol bridge process");
        let (process, mut line_rx) = ChildChannel::spawn(&self.bridge_dir, "bun", &["run", "index.ts"])
            .await
            .map_err(|e| SocketError::Protocol(e.to_string()))?;
        let process = Arc::new(process);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(1000);

        let router_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if let Ok(reply) = serde_json::from_str::<BridgeReply>(&line) {
                    let waiter = router_pending
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(&reply.id);
                    if let Some(tx) = waiter {
                        let _ = tx.send(reply);
                    }
                    continue;
                }

                if let Ok(event) = serde_json::from_str::<SocketEvent>(&line) {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                    continue;
                }

                debug!(%line, "ignoring unrecognized bridge line");
            }
        });

        let socket = BridgeSocket { process, pending };

        // The sidecar fetches the latest protocol version and resumes from
        // the supplied auth state (or starts pairing when absent).
        socket.request("connect", json!({ "auth": auth })).await?;

        Ok(Connection { socket: Arc::new(socket), events: event_rx })
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeReply>>>>;

struct BridgeSocket {
    process: Arc<ChildChannel>,
    pending: PendingMap,
}

#[derive(Serialize)]
struct BridgeRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    payload: Value,
}

#[derive(Deserialize)]
struct BridgeReply {
    id: String,
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

impl BridgeSocket {
    async fn request(&self, kind: &str, payload: Value) -> SocketResult<Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.clone(), tx);

        let line = serde_json::to_string(&BridgeRequest { id: &id, kind, payload })
            .map_err(|e| SocketError::Protocol(e.to_string()))?;
        if self.process.send_line(&line).await.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&id);
            return Err(SocketError::Closed);
        }

        let reply = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(SocketError::Closed),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&id);
                return Err(SocketError::Timeout);
            }
        };

        if reply.ok {
            Ok(reply.data)
        } else {
            Err(SocketError::Protocol(reply.error.unwrap_or_else(|| "bridge error".into())))
        }
    }
}

#[async_trait]
impl ProtocolSocket for BridgeSocket {
    async fn send_text(&self, jid: &str, text: &str) -> SocketResult<String> {
        let data = self.request("sendMessage", json!({ "to": jid, "text": text })).await?;
        data.get("keyId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SocketError::Protocol("sendMessage reply missing keyId".into()))
    }

    async fn is_registered(&self, jid: &str) -> SocketResult<bool> {
        let data = self.request("onWhatsApp", json!({ "jid": jid })).await?;
        Ok(data.get("exists").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn fetch_status(&self, jid: &str) -> SocketResult<Option<String>> {
        let data = self.request("fetchStatus", json!({ "jid": jid })).await?;
        Ok(data.get("status").and_then(Value::as_str).map(str::to_owned))
    }

    async fn profile_picture_url(&self, jid: &str) -> SocketResult<Option<String>> {
        let data = self.request("profilePictureUrl", json!({ "jid": jid })).await?;
        Ok(data.get("url").and_then(Value::as_str).map(str::to_owned))
    }

    async fn group_metadata(&self, jid: &str) -> SocketResult<GroupMetadata> {
        let data = self.request("groupMetadata", json!({ "jid": jid })).await?;
        serde_json::from_value(data).map_err(|e| SocketError::Protocol(e.to_string()))
    }

    async fn download_media(&self, payload: &Value) -> SocketResult<Vec<u8>> {
        let data = self.request("downloadMedia", json!({ "message": payload })).await?;
        let encoded = data
            .get("bytes")
            .and_then(Value::as_str)
            .ok_or_else(|| SocketError::Protocol("downloadMedia reply missing bytes".into()))?;
        BASE64.decode(encoded).map_err(|e| SocketError::Protocol(e.to_string()))
    }

    async fn logout(&self) -> SocketResult<()> {
        self.request("logout", Value::Null).await?;
        Ok(())
    }

    async fn close(&self) -> SocketResult<()> {
        self.request("end", Value::Null).await?;
        Ok(())
    }
}

async fn run_bun_install(dir: &Path) -> SocketResult<()> {
    let output = Command::new("bun")
        .arg("install")
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| SocketError::Protocol(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SocketError::Protocol(format!("bun install failed: {stderr}")));
    }

    info!("bun install completed successfully");
    Ok(())
}
