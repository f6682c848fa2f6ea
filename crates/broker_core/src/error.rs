//! Error types for the session broker
//!
//! Unified error handling using `thiserror` for the taxonomy and `anyhow`
//! for ad-hoc context propagation, following the same split the rest of
//! the workspace uses.

use thiserror::Error;

/// The primary error type for broker operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Fatal (take down the daemon) =====
    #[error("failed to spawn LSP process: {0}")]
    SpawnFailure(String),

    #[error("LSP initialize handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("LSP stdio transport failed: {0}")]
    TransportFailure(String),

    // ===== Per-request, caller-visible =====
    #[error("request timed out after {method} exceeded its deadline")]
    Timeout { method: String },

    #[error("LSP server returned an error: {message}")]
    LspError { code: i64, message: String },

    // ===== Logged, non-fatal =====
    #[error("malformed LSP frame: {0}")]
    ProtocolFailure(String),

    #[error("malformed API request: {0}")]
    ClientProtocolFailure(String),

    #[error("file watcher could not start: {0}")]
    WatcherFailure(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    // ===== Generic =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse-grained category for an error, independent of the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Spawn,
    Handshake,
    Transport,
    Timeout,
    Lsp,
    Protocol,
    ClientProtocol,
    Watcher,
    Internal,
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SpawnFailure(_) => ErrorKind::Spawn,
            Error::HandshakeFailure(_) => ErrorKind::Handshake,
            Error::TransportFailure(_) => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::LspError { .. } => ErrorKind::Lsp,
            Error::ProtocolFailure(_) => ErrorKind::Protocol,
            Error::ClientProtocolFailure(_) => ErrorKind::ClientProtocol,
            Error::WatcherFailure(_) => ErrorKind::Watcher,
            Error::MethodNotFound(_) => ErrorKind::ClientProtocol,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether this error should take down the daemon rather than just
    /// fail the one request or connection that triggered it.
    ///
    /// Per spec: SpawnFailure/HandshakeFailure/TransportFailure are fatal;
    /// everything else is a per-request or per-connection failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SpawnFailure(_) | Error::HandshakeFailure(_) | Error::TransportFailure(_)
        )
    }

    /// JSON-RPC-shaped error code for API responses.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Error::ClientProtocolFailure(_) => -32700,
            Error::MethodNotFound(_) => -32601,
            Error::LspError { code, .. } => *code,
            Error::Timeout { .. } => -32000,
            _ => -32603,
        }
    }
}

/// Extension trait for adding context to errors, mirroring `anyhow::Context`
/// but producing the workspace `Error` type.
pub trait ErrorContext<T> {
    fn context<C>(self, context: C) -> crate::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> crate::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Other(anyhow::Error::from(e).context(context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_flagged() {
        assert!(Error::SpawnFailure("boom".into()).is_fatal());
        assert!(Error::HandshakeFailure("boom".into()).is_fatal());
        assert!(Error::TransportFailure("boom".into()).is_fatal());
        assert!(!Error::Timeout { method: "hover".into() }.is_fatal());
        assert!(!Error::WatcherFailure("boom".into()).is_fatal());
    }

    #[test]
    fn rpc_codes_match_taxonomy() {
        assert_eq!(Error::ClientProtocolFailure("x".into()).rpc_code(), -32700);
        assert_eq!(Error::MethodNotFound("x".into()).rpc_code(), -32601);
        assert_eq!(
            Error::LspError { code: 7, message: "x".into() }.rpc_code(),
            7
        );
        assert_eq!(Error::Internal("x".into()).rpc_code(), -32603);
    }
}
