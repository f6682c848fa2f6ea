//! Content-Length framing and request-id handling shared by the LSP stdio
//! transport and, where it proves convenient, tests that stand in for it.

pub mod frame;
pub mod id;

pub use frame::{read_message, write_message, FramedWriter};
pub use id::{id_to_value, parse_id, MessageId};
