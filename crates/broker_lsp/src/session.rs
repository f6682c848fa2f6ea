//! Ties the supervisor, reader, request registry, progress tracker, and
//! document registry together into the single object the API layer talks
//! to for one running LSP backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_core::prelude::*;
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::documents::{DocumentRegistry, OpenOutcome};
use crate::initializer;
use crate::progress::{ProgressTracker, ProgressView};
use crate::reader;
use crate::registry::RequestRegistry;
use crate::supervisor::LspSupervisor;

/// How long a generic LSP request may run before the caller gets a
/// timeout. Individual API methods may ask for a shorter or longer
/// deadline; this is what `call` falls back to when none is given.
const DEFAULT_LSP_DEADLINE: Duration = Duration::from_secs(90);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running LSP backend plus the bookkeeping the broker layers on top of
/// raw JSON-RPC: request correlation, indexing progress, and open-document
/// tracking.
pub struct Session {
    supervisor: LspSupervisor,
    registry: Arc<RequestRegistry>,
    progress: Arc<ProgressTracker>,
    documents: DocumentRegistry,
    capabilities: RwLock<Option<lsp_types::ServerCapabilities>>,
    reader_handle: tokio::task::JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl Session {
    /// Spawn the LSP process, run the handshake, and start the read loop.
    /// Returns a ready-to-use session; `initialize`/`initialized` have
    /// already completed by the time this returns.
    pub async fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::start(&config.command, &config.args, &config.workspace_root).await
    }

    pub async fn start(command: &str, args: &[String], workspace_root: &Path) -> Result<Self> {
        let (supervisor, stdout) = LspSupervisor::spawn(command, args).await?;
        let registry = Arc::new(RequestRegistry::new());
        let progress = Arc::new(ProgressTracker::new());
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = {
            let registry = registry.clone();
            let progress = progress.clone();
            let alive = alive.clone();
            reader::spawn(stdout, registry, progress, move || {
                alive.store(false, Ordering::SeqCst);
            })
        };

        let capabilities = match initializer::handshake(&supervisor, &registry, workspace_root).await {
            Ok(caps) => caps,
            Err(e) => {
                supervisor.kill().await;
                reader_handle.abort();
                return Err(e);
            }
        };

        Ok(Self {
            supervisor,
            registry,
            progress,
            documents: DocumentRegistry::new(),
            capabilities: RwLock::new(Some(capabilities)),
            reader_handle,
            alive,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    pub fn capabilities(&self) -> Option<lsp_types::ServerCapabilities> {
        self.capabilities.read().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.supervisor.is_running()
    }

    pub fn progress_view(&self) -> ProgressView {
        self.progress.view()
    }

    /// The tracker backing this session's indexing state, shared with
    /// whatever watches for the deferred-start gate to clear.
    pub fn progress_tracker(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    pub fn is_indexing(&self) -> bool {
        self.progress.is_indexing()
    }

    pub fn open_document_count(&self) -> usize {
        self.documents.len()
    }

    /// Forward an arbitrary LSP request and wait for its response, subject
    /// to `deadline` (falls back to [`DEFAULT_LSP_DEADLINE`] when `None`).
    pub async fn call(&self, method: &str, params: Value, deadline: Option<Duration>) -> Result<Value> {
        let deadline = deadline.unwrap_or(DEFAULT_LSP_DEADLINE);
        let supervisor = &self.supervisor;
        let method_owned = method.to_string();
        self.registry
            .call(method, deadline, move |id| {
                let message = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method_owned,
                    "params": params,
                });
                async move { supervisor.send(&message).await }
            })
            .await
    }

    /// Fire a notification with no response expected.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.supervisor.send(&message).await
    }

    /// `textDocument/didOpen`, refreshing (close then reopen) if the URI
    /// was already tracked open.
    pub async fn did_open(&self, uri: &str, language_id: &str, version: i64, text: &str) -> Result<()> {
        if self.documents.open(uri) == OpenOutcome::Refreshed {
            self.notify(
                "textDocument/didClose",
                json!({"textDocument": {"uri": uri}}),
            )
            .await?;
        }

        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": version,
                    "text": text,
                }
            }),
        )
        .await
    }

    pub async fn did_close(&self, uri: &str) -> Result<()> {
        self.documents.close(uri);
        self.notify("textDocument/didClose", json!({"textDocument": {"uri": uri}}))
            .await
    }

    /// Forward a batch of file-system change events synthesized by the
    /// watcher.
    pub async fn did_change_watched_files(&self, changes: Vec<Value>) -> Result<()> {
        self.notify(
            "workspace/didChangeWatchedFiles",
            json!({"changes": changes}),
        )
        .await
    }

    pub fn pending_request_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// `shutdown` request, `exit` notification, then a graceful wait
    /// (falling back to a kill) for the process to actually go away.
    pub async fn shutdown(&self) {
        if self.supervisor.is_running() {
            let _ = self.call("shutdown", Value::Null, Some(Duration::from_secs(10))).await;
            let _ = self.notify("exit", Value::Null).await;
        }
        self.supervisor.shutdown(SHUTDOWN_GRACE).await;
        self.reader_handle.abort();
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Parameters used to construct a [`Session`], kept together so the daemon
/// entry point and tests can build one from a single value.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command: String,
    pub args: Vec<String>,
    pub workspace_root: PathBuf,
}
