//! The downstream-facing API: a line-delimited JSON-RPC server over TCP
//! that tool clients talk to, routing each request to the LSP session or
//! a local handler.

pub mod protocol;
pub mod router;
pub mod server;

pub use protocol::{ApiError, ApiRequest, ApiResponse};
pub use router::Router;
pub use server::ApiServer;
