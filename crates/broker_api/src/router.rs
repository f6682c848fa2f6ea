//! Maps API methods to LSP calls, local handlers, or document-registry
//! side effects, enforcing the per-method timeout table.

use std::sync::Arc;
use std::time::Duration;

use broker_core::prelude::*;
use broker_lsp::Session;
use broker_watch::to_lsp_change;
use serde_json::{json, Value};

use crate::protocol::{ApiRequest, ApiResponse, METHOD_NOT_FOUND_CODE};

const WORKSPACE_DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(600);
const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(300);
const RENAME_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Everything forwarded verbatim to the LSP as a request, params and result
/// untouched.
const FORWARDED_METHODS: &[&str] = &[
    "textDocument/hover",
    "textDocument/definition",
    "textDocument/references",
    "textDocument/documentSymbol",
    "textDocument/diagnostic",
    "textDocument/implementation",
    "textDocument/codeAction",
    "textDocument/formatting",
    "textDocument/rename",
    "textDocument/prepareRename",
    "textDocument/prepareCallHierarchy",
    "callHierarchy/incomingCalls",
    "callHierarchy/outgoingCalls",
    "workspace/symbol",
    "workspace/diagnostic",
];

fn timeout_for(method: &str) -> Duration {
    match method {
        "workspace/diagnostic" => WORKSPACE_DIAGNOSTICS_TIMEOUT,
        "textDocument/diagnostic" | "textDocument/formatting" => DOCUMENT_TIMEOUT,
        "textDocument/rename" | "textDocument/prepareRename" => RENAME_TIMEOUT,
        _ => DEFAULT_TIMEOUT,
    }
}

pub struct Router {
    session: Arc<Session>,
}

impl Router {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn dispatch(&self, request: ApiRequest) -> ApiResponse {
        let id = request.id;
        match request.method.as_str() {
            "session/status" => self.handle_status(id),
            "session/capabilities" => self.handle_capabilities(id),
            "textDocument/didOpen" => self.handle_did_open(id, request.params).await,
            "textDocument/didClose" => self.handle_did_close(id, request.params).await,
            "workspace/didChangeWatchedFiles" => {
                self.handle_watched_files(id, request.params).await
            }
            method if FORWARDED_METHODS.contains(&method) => {
                self.forward(id, &request.method, request.params).await
            }
            other => ApiResponse::error(id, METHOD_NOT_FOUND_CODE, format!("method not found: {other}")),
        }
    }

    fn handle_status(&self, id: i64) -> ApiResponse {
        let progress = self.session.progress_view();
        let status = json!({
            "initialized": true,
            "openDocuments": self.session.open_document_count(),
            "pid": self.session.pid(),
            "indexing": progress,
        });
        ApiResponse::success(id, status)
    }

    fn handle_capabilities(&self, id: i64) -> ApiResponse {
        match self.session.capabilities() {
            Some(caps) => match serde_json::to_value(caps) {
                Ok(value) => ApiResponse::success(id, value),
                Err(e) => ApiResponse::from_broker_error(id, &Error::Internal(e.to_string())),
            },
            None => ApiResponse::success(id, Value::Null),
        }
    }

    async fn handle_did_open(&self, id: i64, params: Value) -> ApiResponse {
        let Some(doc) = params.get("textDocument") else {
            return ApiResponse::from_broker_error(
                id,
                &Error::ClientProtocolFailure("didOpen requires a textDocument".into()),
            );
        };
        let uri = doc.get("uri").and_then(Value::as_str).unwrap_or_default();
        let language_id = doc.get("languageId").and_then(Value::as_str).unwrap_or("bsl");
        let version = doc.get("version").and_then(Value::as_i64).unwrap_or(0);
        let text = doc.get("text").and_then(Value::as_str).unwrap_or_default();

        match self.session.did_open(uri, language_id, version, text).await {
            Ok(()) => ApiResponse::success(id, json!({"ok": true})),
            Err(e) => ApiResponse::from_broker_error(id, &e),
        }
    }

    async fn handle_did_close(&self, id: i64, params: Value) -> ApiResponse {
        let uri = params.pointer("/textDocument/uri").and_then(Value::as_str).unwrap_or_default();
        match self.session.did_close(uri).await {
            Ok(()) => ApiResponse::success(id, json!({"ok": true})),
            Err(e) => ApiResponse::from_broker_error(id, &e),
        }
    }

    async fn handle_watched_files(&self, id: i64, params: Value) -> ApiResponse {
        let changes = params
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        match self.session.did_change_watched_files(changes).await {
            Ok(()) => ApiResponse::success(id, json!({"ok": true})),
            Err(e) => ApiResponse::from_broker_error(id, &e),
        }
    }

    async fn forward(&self, id: i64, method: &str, params: Value) -> ApiResponse {
        match self.session.call(method, params, Some(timeout_for(method))).await {
            Ok(result) => ApiResponse::success(id, result),
            Err(e) => ApiResponse::from_broker_error(id, &e),
        }
    }
}

/// Convert a batch of watcher changes into the `workspace/didChangeWatchedFiles`
/// params shape, for the daemon to forward directly via [`Session::did_change_watched_files`]
/// without going through the API loopback.
pub fn watched_changes_to_params(changes: &[broker_watch::WatchedChange]) -> Vec<Value> {
    changes.iter().map(to_lsp_change).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_match_the_method_table() {
        assert_eq!(timeout_for("workspace/diagnostic"), WORKSPACE_DIAGNOSTICS_TIMEOUT);
        assert_eq!(timeout_for("textDocument/diagnostic"), DOCUMENT_TIMEOUT);
        assert_eq!(timeout_for("textDocument/formatting"), DOCUMENT_TIMEOUT);
        assert_eq!(timeout_for("textDocument/rename"), RENAME_TIMEOUT);
        assert_eq!(timeout_for("textDocument/prepareRename"), RENAME_TIMEOUT);
        assert_eq!(timeout_for("textDocument/hover"), DEFAULT_TIMEOUT);
    }

    #[test]
    fn all_forwarded_methods_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for method in FORWARDED_METHODS {
            assert!(seen.insert(*method), "duplicate forwarded method: {method}");
        }
    }
}
