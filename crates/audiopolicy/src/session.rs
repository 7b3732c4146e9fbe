//! Sessions identify remote parties (SCO requesters, audio mode owners).
//!
//! The transport that carries requests owns the liveness check. When a peer
//! goes away it calls `AudioPolicyService::on_session_died`, which runs the
//! same cleanup an explicit release would.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of one registered party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A party plus the process that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub pid: u32,
    pub registered_at: DateTime<Utc>,
}

impl Session {
    pub fn new(pid: u32) -> Self {
        Self {
            id: SessionId::new(),
            pid,
            registered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_distinct() {
        let a = Session::new(42);
        let b = Session::new(42);
        assert_ne!(a.id, b.id);
        assert_eq!(a.pid, b.pid);
    }
}
