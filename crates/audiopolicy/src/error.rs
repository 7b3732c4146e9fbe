//! Error types for the policy core.
//!
//! Only invalid input is ever returned to callers. Native and persistence
//! failures are logged where they happen and absorbed.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionId;

/// Caller errors, rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("invalid stream type {0}")]
    InvalidStream(i32),

    #[error("invalid adjust direction {0}")]
    InvalidDirection(i32),

    #[error("invalid ringer mode {0}")]
    InvalidRingerMode(i32),

    #[error("invalid audio mode {0}")]
    InvalidAudioMode(i32),

    #[error("caller must not be empty")]
    EmptyCaller,

    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

/// Non-OK status from the native routing boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("native status {status} from {operation}")]
    Status { operation: &'static str, status: i32 },

    #[error("native audio service unavailable")]
    Unavailable,
}

/// Settings store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt settings file {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}
