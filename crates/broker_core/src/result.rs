//! Result type alias for broker operations

use crate::error::Error;

/// A specialized Result type for broker operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
