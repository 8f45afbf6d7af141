//! Parent side of the worker envelope protocol.
//!
//! The channel is not request-scoped: replies are matched to requests by
//! command name, first matching reply wins, bounded by a timeout. This
//! tolerates (but does not disambiguate) concurrent same-named commands;
//! in practice there is one caller per worker.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use riko_core::Envelope;

use crate::child::ChildChannel;
use crate::error::{IpcError, Result};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>;

pub struct WorkerClient {
    channel: ChildChannel,
    pending: PendingMap,
    notification_rx: Option<mpsc::Receiver<Envelope>>,
}

impl WorkerClient {
    /// Spawn `program <device_id>` and start routing its stdout lines.
    pub async fn spawn(working_dir: &Path, program: &str, device_id: &str) -> Result<Self> {
        let (channel, mut line_rx) = ChildChannel::spawn(working_dir, program, &[device_id]).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notification_tx, notification_rx) = mpsc::channel(1000);

        let router_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                let Some(envelope) = Envelope::from_line(&line) else {
                    debug!(%line, "ignoring unparseable worker line");
                    continue;
                };

                let waiter = router_pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&envelope.command);

                match waiter {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => {
                        if notification_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self { channel, pending, notification_rx: Some(notification_rx) })
    }

    /// Out-of-band notifications (connection updates, QR codes, errors).
    pub fn take_notification_receiver(&mut self) -> Option<mpsc::Receiver<Envelope>> {
        self.notification_rx.take()
    }

    /// Fire-and-forget send.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.channel.send_line(&envelope.to_line()).await
    }

    /// Send a command and wait for the first reply carrying the same
    /// command name, bounded by [`REQUEST_TIMEOUT`].
    pub async fn request(&self, envelope: Envelope) -> Result<Envelope> {
        self.request_with_timeout(envelope, REQUEST_TIMEOUT).await
    }

    pub async fn request_with_timeout(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope> {
        let command = envelope.command.clone();
        let (tx, rx) = oneshot::channel();

        // A concurrent identical-named request is superseded; its waiter
        // resolves as a closed channel.
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(command.clone(), tx);

        debug!(command = %command, "sending worker command");
        if let Err(error) = self.channel.send_line(&envelope.to_line()).await {
            self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&command);
            return Err(error);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(IpcError::ChannelClosed),
            Err(_) => {
                self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&command);
                Err(IpcError::Timeout)
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.channel.try_wait(), Ok(None))
    }

    pub async fn kill(&mut self) -> Result<()> {
        self.channel.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riko_core::command;

    // `cat -` echoes every line we write, which exercises the name-keyed
    // correlation path end to end.
    async fn echo_client() -> WorkerClient {
        let cwd = std::env::current_dir().unwrap();
        WorkerClient::spawn(&cwd, "cat", "-").await.unwrap()
    }

    #[tokio::test]
    async fn reply_with_matching_command_resolves_the_request() {
        let client = echo_client().await;
        let reply = client.request(Envelope::request(command::GET_UPTIME)).await.unwrap();
        assert_eq!(reply.command, command::GET_UPTIME);
    }

    #[tokio::test]
    async fn unrequested_lines_arrive_as_notifications() {
        let mut client = echo_client().await;
        let mut notifications = client.take_notification_receiver().unwrap();

        client.send(&Envelope::ok("QR_UPDATED")).await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.command, "QR_UPDATED");
    }

    #[tokio::test]
    async fn silent_worker_times_the_request_out() {
        let cwd = std::env::current_dir().unwrap();
        let client = WorkerClient::spawn(&cwd, "sleep", "5").await.unwrap();

        let result = client
            .request_with_timeout(Envelope::request(command::START), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(IpcError::Timeout)));
    }
}
