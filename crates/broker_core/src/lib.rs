//! Shared error types, identifiers, and telemetry wiring for the session
//! broker daemon. Every other crate in this workspace depends on this one.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;

pub use error::{Error, ErrorContext, ErrorKind};
pub use id::ConnectionId;
pub use result::Result;

/// Prelude module for common imports across broker crates.
pub mod prelude {
    pub use crate::error::{Error, ErrorContext, ErrorKind};
    pub use crate::result::Result;
    pub use tracing::{debug, error, info, instrument, trace, warn};
}
