//! The `initialize` / `initialized` handshake run once per session, before
//! any other request is allowed onto the wire.

use std::path::Path;
use std::time::Duration;

use broker_core::prelude::*;
use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionItemCapability,
    DynamicRegistrationClientCapabilities, GotoCapability, HoverClientCapabilities,
    InitializeParams, InitializeResult, InitializedParams, MarkupKind, TextDocumentClientCapabilities,
    TextDocumentSyncClientCapabilities, Uri, WorkspaceFolder,
};
use serde_json::json;

use crate::registry::RequestRegistry;
use crate::supervisor::LspSupervisor;

/// The handshake has a generous fixed deadline of its own; it runs once
/// and the analyzer may need to warm up a JVM before it can answer.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `initialize` then fire `initialized`, returning the server's
/// advertised capabilities for the session to remember.
pub async fn handshake(
    supervisor: &LspSupervisor,
    registry: &RequestRegistry,
    workspace_root: &Path,
) -> Result<lsp_types::ServerCapabilities> {
    let root_uri: Uri = format!("file://{}", workspace_root.display())
        .parse()
        .map_err(|_| Error::HandshakeFailure("workspace root is not a valid URI".into()))?;

    let workspace_folder = WorkspaceFolder {
        uri: root_uri.clone(),
        name: workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string()),
    };

    #[allow(deprecated)]
    let params = InitializeParams {
        process_id: None,
        root_path: None,
        root_uri: Some(root_uri.clone()),
        initialization_options: None,
        capabilities: client_capabilities(),
        trace: None,
        workspace_folders: Some(vec![workspace_folder]),
        client_info: Some(ClientInfo {
            name: "bsl-session-broker".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        locale: None,
        work_done_progress_params: Default::default(),
    };

    let params_value = serde_json::to_value(&params)
        .map_err(|e| Error::HandshakeFailure(format!("could not encode initialize params: {e}")))?;

    let result_value = registry
        .call("initialize", HANDSHAKE_TIMEOUT, |id| {
            let supervisor = supervisor;
            let message = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "initialize",
                "params": params_value,
            });
            async move {
                supervisor
                    .send(&message)
                    .await
                    .map_err(|e| Error::HandshakeFailure(e.to_string()))
            }
        })
        .await
        .map_err(|e| Error::HandshakeFailure(format!("initialize request failed: {e}")))?;

    let result: InitializeResult = serde_json::from_value(result_value).map_err(|e| {
        Error::HandshakeFailure(format!("could not parse initialize result: {e}"))
    })?;

    let initialized_notification = json!({
        "jsonrpc": "2.0",
        "method": "initialized",
        "params": InitializedParams {},
    });
    supervisor
        .send(&initialized_notification)
        .await
        .map_err(|e| Error::HandshakeFailure(format!("could not send initialized: {e}")))?;

    info!(server = ?result.server_info, "LSP handshake complete");
    Ok(result.capabilities)
}

/// What we tell the analyzer we support. Conservative: only the feature
/// surface the broker actually forwards (hover, definition, references,
/// completion, document symbols, diagnostics, rename) advertises dynamic
/// registration off and the plain-text/markdown hover formats.
fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                dynamic_registration: Some(false),
                will_save: Some(false),
                will_save_wait_until: Some(false),
                did_save: Some(true),
            }),
            completion: Some(CompletionClientCapabilities {
                dynamic_registration: Some(false),
                completion_item: Some(CompletionItemCapability {
                    snippet_support: Some(false),
                    commit_characters_support: Some(true),
                    documentation_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                    deprecated_support: Some(true),
                    preselect_support: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            definition: Some(GotoCapability { dynamic_registration: Some(false), link_support: Some(true) }),
            references: Some(DynamicRegistrationClientCapabilities { dynamic_registration: Some(false) }),
            document_symbol: Some(lsp_types::DocumentSymbolClientCapabilities {
                dynamic_registration: Some(false),
                symbol_kind: None,
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            rename: Some(lsp_types::RenameClientCapabilities {
                dynamic_registration: Some(false),
                prepare_support: Some(true),
                ..Default::default()
            }),
            publish_diagnostics: Some(lsp_types::PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                ..Default::default()
            }),
            formatting: Some(DynamicRegistrationClientCapabilities { dynamic_registration: Some(false) }),
            ..Default::default()
        }),
        window: Some(lsp_types::WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
