//! error.rs
//! Error taxonomy for the coordinator.
//!
//! Per-request failures (`ControllerError`) are recovered at the dispatcher boundary and
//! turned into failure responses. Registration-time failures abort startup.

use std::io;

use thiserror::Error;

use crate::store::value::ValueType;
use crate::store::variables::Access;

/// Controller-local failures. None of these are process-fatal on their own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("variable '{name}' not found in controller '{controller}'")]
    VariableNotFound { controller: String, name: String },

    #[error("action '{name}' not found in controller '{controller}'")]
    ActionNotFound { controller: String, name: String },

    #[error("no controller owns '{name}'")]
    NameNotFound { name: String },

    #[error("cannot {op} variable '{name}' with access {access}")]
    AccessViolation {
        name: String,
        access: Access,
        op: &'static str,
    },

    #[error("variable '{name}' is declared {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("variable '{name}' registered twice in controller '{controller}'")]
    DuplicateVariable { controller: String, name: String },

    #[error("action '{name}' registered twice in controller '{controller}'")]
    DuplicateAction { controller: String, name: String },

    #[error("controller '{identity}' registered twice")]
    DuplicateController { identity: String },

    #[error("action '{action}' failed: {cause}")]
    ActionFailed { action: String, cause: String },

    #[error("controller '{identity}' cannot {op} while {state}")]
    Lifecycle {
        identity: String,
        state: String,
        op: &'static str,
    },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("failed to spawn refresh task for '{identity}': {reason}")]
    Spawn { identity: String, reason: String },
}

/// Sample feed failures (fixture replay or synthetic).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("fixture io error: {0}")]
    Io(#[from] io::Error),

    #[error("fixture csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("fixture '{0}' has no data rows")]
    Empty(String),

    #[error("bus read failed: {0}")]
    Bus(#[from] BusError),
}

/// Vehicle bus failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("bus offline")]
    Offline,

    #[error("bus has no sample available")]
    NoSample,
}

/// Network channel failures. From `receive`, `Closed` ends the dispatcher loop normally
/// and any other error ends it with that error. From `send`, every error is per-peer.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("peer '{0}' is not connected")]
    UnknownPeer(String),

    #[error("peer '{0}' stopped reading and was disconnected")]
    Stalled(String),

    #[error("channel io error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration failures: bad environment overrides.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Startup/shutdown failures of the whole coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request log: {0}")]
    RequestLog(String),
}
