//! The long-lived task that reads frames off the LSP's stdout and routes
//! them: responses to whichever caller is waiting in the [`RequestRegistry`],
//! `$/progress` to the [`ProgressTracker`], everything else to a log line.

use std::sync::Arc;

use broker_codec::{parse_id, read_message, MessageId};
use broker_core::prelude::*;
use serde_json::Value;
use tokio::process::ChildStdout;

use crate::progress::ProgressTracker;
use crate::registry::{LspFault, RequestRegistry};

/// Spawn the read loop as its own task. Returns immediately; the task runs
/// until the stream closes, at which point `on_transport_closed` fires so
/// the owning session can tear itself down.
pub fn spawn(
    stdout: ChildStdout,
    registry: Arc<RequestRegistry>,
    progress: Arc<ProgressTracker>,
    on_transport_closed: impl FnOnce() + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::BufReader::new(stdout);
        loop {
            match read_message(&mut stdout).await {
                Ok(Some(message)) => route(&message, &registry, &progress),
                Ok(None) => {
                    warn!("LSP stdout closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "malformed frame from LSP, dropping");
                    if e.is_fatal() {
                        break;
                    }
                }
            }
        }
        on_transport_closed();
    })
}

fn route(message: &Value, registry: &RequestRegistry, progress: &ProgressTracker) {
    let id = parse_id(message);
    let method = message.get("method").and_then(Value::as_str);

    match (id, method) {
        // A response: has an id, no method.
        (Some(id), None) => route_response(id, message, registry),
        // A notification from the server: has a method, no id.
        (None, Some(method)) => route_notification(method, message, progress),
        // A request the LSP is sending us (e.g. workDoneProgress/create):
        // acknowledged implicitly, we never answer it.
        (Some(_), Some(method)) => {
            debug!(method, "ignoring server-initiated request");
        }
        (None, None) => {
            debug!("ignoring malformed message with neither id nor method");
        }
    }
}

fn route_response(id: MessageId, message: &Value, registry: &RequestRegistry) {
    let Some(lookup_key) = id.lookup_key() else {
        debug!("response id has no integer lookup key, dropping");
        return;
    };

    let outcome = match message.get("error") {
        Some(error) => {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
            let msg = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown LSP error")
                .to_string();
            Err(LspFault { code, message: msg })
        }
        None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
    };

    registry.complete(lookup_key, outcome);
}

fn route_notification(method: &str, message: &Value, progress: &ProgressTracker) {
    match method {
        "$/progress" => route_progress(message, progress),
        "window/logMessage" => {
            if let Some(text) = message.pointer("/params/message").and_then(Value::as_str) {
                info!(target: "lsp_log", "{text}");
            }
        }
        "textDocument/publishDiagnostics" => {
            // The broker does not surface diagnostics proactively; clients
            // pull them via the diagnostics request methods.
        }
        other => {
            debug!(method = other, "unhandled LSP notification");
        }
    }
}

fn route_progress(message: &Value, progress: &ProgressTracker) {
    let Some(value) = message.pointer("/params/value") else { return };
    let kind = value.get("kind").and_then(Value::as_str).unwrap_or("");
    let title = value.get("title").and_then(Value::as_str).map(str::to_string);
    let msg = value.get("message").and_then(Value::as_str).map(str::to_string);
    let percentage = value.get("percentage").and_then(Value::as_u64).map(|p| p as u8);

    match kind {
        "begin" => progress.begin(title, msg, percentage),
        "report" => progress.report(msg, percentage),
        "end" => progress.end(),
        other => debug!(kind = other, "unrecognized $/progress kind"),
    }
}
