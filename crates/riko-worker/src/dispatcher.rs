//! Routes envelope commands from the parent process to the session
//! controller and streams replies/notifications back over stdout.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use riko_core::{Envelope, SendMessagePayload, command, notify};

use crate::error::{Result, WorkerError};
use crate::session::{SessionController, StartOutcome};

pub struct Dispatcher {
    controller: Arc<SessionController>,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller, started_at: Instant::now() }
    }

    /// Serve until a STOP completes or the parent closes our stdin.
    pub async fn run(self, mut notifications: mpsc::Receiver<Envelope>) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("parent closed stdin, shutting down");
                        break;
                    };
                    let Some(envelope) = Envelope::from_line(&line) else {
                        debug!(%line, "ignoring unparseable command line");
                        continue;
                    };

                    let stop = envelope.command == command::STOP;
                    let Some((reply, extra)) = self.handle(envelope).await else {
                        continue;
                    };
                    if let Some(extra) = extra {
                        write_line(&mut stdout, &extra).await?;
                    }
                    let stopped = stop && reply.status == Some(true);
                    write_line(&mut stdout, &reply).await?;

                    if stopped {
                        break;
                    }
                }
                notification = notifications.recv() => {
                    let Some(notification) = notification else { break };
                    write_line(&mut stdout, &notification).await?;
                }
            }
        }

        // Flush whatever the close transition still produced.
        while let Ok(notification) = notifications.try_recv() {
            write_line(&mut stdout, &notification).await?;
        }

        Ok(())
    }

    /// Returns the correlated reply plus an optional out-of-band
    /// notification. Unknown commands are ignored and yield no reply.
    async fn handle(&self, envelope: Envelope) -> Option<(Envelope, Option<Envelope>)> {
        let name = envelope.command.clone();
        Some(match name.as_str() {
            command::START => match self.controller.start().await {
                Ok(StartOutcome::Started) => (Envelope::ok(&name).with_message("starting"), None),
                Ok(StartOutcome::AlreadyStarted) => (
                    Envelope::fail(&name, "device already started"),
                    Some(Envelope::ok(notify::DEVICE_ALREADY_STARTED).with_data(json!({
                        "deviceId": self.controller.device_id(),
                    }))),
                ),
                Err(error) => self.failure(&name, error),
            },

            command::STOP => match self.controller.stop().await {
                Ok(()) => (Envelope::ok(&name).with_message("stopped"), None),
                Err(error) => self.failure(&name, error),
            },

            command::RESTART => match self.controller.restart().await {
                Ok(_) => (Envelope::ok(&name).with_message("restarting"), None),
                Err(error) => self.failure(&name, error),
            },

            command::LOGOUT => match self.controller.logout().await {
                Ok(()) => (Envelope::ok(&name).with_message("logged out"), None),
                Err(error) => self.failure(&name, error),
            },

            command::SEND_MESSAGE => {
                let payload = envelope
                    .data
                    .ok_or_else(|| WorkerError::InvalidPayload("missing data".into()))
                    .and_then(|data| {
                        serde_json::from_value::<SendMessagePayload>(data)
                            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))
                    });
                match payload {
                    Ok(payload) => {
                        match self.controller.send_text(&payload.to, &payload.text).await {
                            Ok(key_id) => (
                                Envelope::ok(&name).with_data(json!({ "keyId": key_id })),
                                None,
                            ),
                            Err(error) => self.failure(&name, error),
                        }
                    }
                    Err(error) => self.failure(&name, error),
                }
            }

            command::GET_MEMORY_USAGE => (
                Envelope::ok(&name).with_data(json!({ "bytes": resident_memory_bytes() })),
                None,
            ),

            command::GET_CPU_USAGE => (
                Envelope::ok(&name).with_data(json!({ "cpuSeconds": cpu_seconds() })),
                None,
            ),

            command::GET_UPTIME => (
                Envelope::ok(&name)
                    .with_data(json!({ "seconds": self.started_at.elapsed().as_secs() })),
                None,
            ),

            other => {
                warn!(command = %other, "ignoring unrecognized command");
                return None;
            }
        })
    }

    fn failure(&self, name: &str, error: WorkerError) -> (Envelope, Option<Envelope>) {
        let reply = Envelope::fail(name, error.to_string());
        let extra = match &error {
            WorkerError::DeviceNotFound(device_id) => Some(
                Envelope::ok(notify::DEVICE_NOT_FOUND)
                    .with_data(json!({ "deviceId": device_id })),
            ),
            _ => None,
        };
        (reply, extra)
    }
}

async fn write_line(stdout: &mut Stdout, envelope: &Envelope) -> Result<()> {
    stdout.write_all(envelope.to_line().as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Resident set size from procfs; zero when unavailable.
fn resident_memory_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|statm| {
            let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
            Some(pages * 4096)
        })
        .unwrap_or(0)
}

/// Total user+system CPU time consumed by this process, in seconds.
fn cpu_seconds() -> u64 {
    const CLOCK_TICKS_PER_SEC: u64 = 100;

    std::fs::read_to_string("/proc/self/stat")
        .ok()
        .and_then(|stat| {
            // The comm field is parenthesized and may contain spaces; the
            // fixed-position fields start after the closing paren.
            let (_, rest) = stat.rsplit_once(')')?;
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let utime: u64 = fields.get(11)?.parse().ok()?;
            let stime: u64 = fields.get(12)?.parse().ok()?;
            Some((utime + stime) / CLOCK_TICKS_PER_SEC)
        })
        .unwrap_or(0)
}
