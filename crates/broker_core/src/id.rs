//! Lightweight identifiers used for log correlation.
//!
//! Connections and LSP requests in this daemon are local and
//! short-lived, so a process-wide monotonic counter is enough — no need
//! to pull in a UUID dependency for values nothing ever serializes
//! across a process boundary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic identifier for an accepted API connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
