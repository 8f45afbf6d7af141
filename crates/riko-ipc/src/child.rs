//! A child process treated as a line channel.
//!
//! Both sidecars this crate talks to (the per-device worker and the
//! protocol bridge) speak newline-delimited JSON over stdin/stdout, so the
//! transport is one shape: write a line, receive lines. stderr is not part
//! of the protocol and is relayed to the log.

use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::error::{IpcError, Result};

pub struct ChildChannel {
    child: Child,
    /// Callers write concurrently; one line at a time, flushed whole.
    stdin: Mutex<ChildStdin>,
}

impl ChildChannel {
    /// Spawn the child and return the channel together with its stdout
    /// lines. The child dies with the channel (`kill_on_drop`).
    pub async fn spawn(
        working_dir: &Path,
        program: &str,
        args: &[&str],
    ) -> Result<(Self, mpsc::Receiver<String>)> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| IpcError::Spawn { program: program.to_owned(), source })?;

        let stdin = child.stdin.take().ok_or(IpcError::MissingPipe)?;
        let stdout = child.stdout.take().ok_or(IpcError::MissingPipe)?;
        let stderr = child.stderr.take().ok_or(IpcError::MissingPipe)?;

        let (line_tx, line_rx) = mpsc::channel(1000);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        let tag = program.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(child = %tag, "{line}");
            }
        });

        Ok((Self { child, stdin: Mutex::new(stdin) }, line_rx))
    }

    /// Write one message, appending the line terminator when absent.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    pub async fn kill(&mut self) -> Result<()> {
        Ok(self.child.kill().await?)
    }
}
