//! Owns the LSP child process: spawning, the write half of its stdio
//! transport, stderr forwarding, and shutdown.
//!
//! The read half is handed off to [`crate::reader`] as a raw
//! [`tokio::process::ChildStdout`] rather than kept here, since reading runs
//! as its own long-lived task for the life of the session.

use std::process::Stdio;

use broker_codec::FramedWriter;
use broker_core::prelude::*;
use tokio::process::{Child, ChildStdout, Command};

/// A running (or exited) LSP child process plus its framed stdin.
pub struct LspSupervisor {
    child: parking_lot::Mutex<Option<Child>>,
    writer: FramedWriter<tokio::process::ChildStdin>,
    pid: Option<u32>,
}

impl LspSupervisor {
    /// Spawn `command args...` with piped stdio, wire a task that forwards
    /// its stderr into our own logs line by line, and return the
    /// supervisor plus the raw stdout for the reader task to own.
    pub async fn spawn(command: &str, args: &[String]) -> Result<(Self, ChildStdout)> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailure(format!("{command}: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::SpawnFailure("child process did not expose a stdin pipe".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::SpawnFailure("child process did not expose a stdout pipe".into())
        })?;
        let stderr = child.stderr.take();

        let pid = child.id();

        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr));
        }

        let supervisor = Self {
            child: parking_lot::Mutex::new(Some(child)),
            writer: FramedWriter::new(stdin),
            pid,
        };

        Ok((supervisor, stdout))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one JSON-RPC message (request or notification) to the LSP's
    /// stdin, Content-Length framed.
    pub async fn send(&self, message: &serde_json::Value) -> Result<()> {
        self.writer.write_message(message).await
    }

    /// Whether the child is still believed alive. A prior `wait()` having
    /// observed exit makes this `false` even if we never poll again.
    pub fn is_running(&self) -> bool {
        self.child.lock().is_some()
    }

    /// Ask nicely (the `exit` notification should already have been sent
    /// by the caller), wait briefly, then kill if it hasn't gone away.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        let mut child = match self.child.lock().take() {
            Some(child) => child,
            None => return,
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "LSP process exited");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting for LSP process to exit");
            }
            Err(_) => {
                warn!("LSP process did not exit within grace period, killing");
                let _ = child.kill().await;
            }
        }
    }

    /// Kill immediately, for the fatal-error path.
    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill().await;
        }
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(target: "lsp_stderr", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "LSP stderr stream closed with error");
                break;
            }
        }
    }
}

impl Drop for LspSupervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.lock().take() {
            // best-effort: we're not in an async context here, so a
            // synchronous kill is all Drop can do. `kill_on_drop` on the
            // Command already covers the case where `child` itself drops.
            let _ = child.start_kill();
        }
    }
}
