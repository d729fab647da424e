//! request.rs
//! Request / response shapes exchanged with peers.
//!
//! Wire form (JSON):
//!   request  `{"type":"get","name":"voltage","requestKey":7}`
//!   response `{"requestKey":7,"ok":true,"result":400}`
//!            `{"requestKey":7,"ok":false,"error":{"kind":"AccessViolation","message":"..."}}`
//! The peer is never on the wire; the channel fills it in from the connection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::store::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Action,
    Get,
    Set,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Action => "action",
            RequestKind::Get => "get",
            RequestKind::Set => "set",
        }
    }
}

/// Opaque token chosen by the caller and echoed back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(serde_json::Value);

impl CorrelationId {
    pub fn null() -> Self {
        Self(serde_json::Value::Null)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(serde_json::Value::String(s.to_string()))
    }
}

impl From<u64> for CorrelationId {
    fn from(n: u64) -> Self {
        Self(serde_json::Value::from(n))
    }
}

impl From<serde_json::Value> for CorrelationId {
    fn from(v: serde_json::Value) -> Self {
        Self(v)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Originating endpoint; used only to address the response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "requestKey", default)]
    pub correlation_id: CorrelationId,
    #[serde(skip)]
    pub peer: PeerId,
}

impl Request {
    fn new(kind: RequestKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            args: Vec::new(),
            value: None,
            correlation_id: CorrelationId::null(),
            peer: PeerId::default(),
        }
    }

    pub fn get(name: &str) -> Self {
        Self::new(RequestKind::Get, name)
    }

    pub fn set(name: &str, value: impl Into<Value>) -> Self {
        let mut req = Self::new(RequestKind::Set, name);
        req.value = Some(value.into());
        req
    }

    pub fn action(name: &str, args: Vec<Value>) -> Self {
        let mut req = Self::new(RequestKind::Action, name);
        req.args = args;
        req
    }

    pub fn with_key(mut self, key: impl Into<CorrelationId>) -> Self {
        self.correlation_id = key.into();
        self
    }

    pub fn from_peer(mut self, peer: impl Into<PeerId>) -> Self {
        self.peer = peer.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    VariableNotFound,
    ActionNotFound,
    NameNotFound,
    AccessViolation,
    TypeMismatch,
    DuplicateVariable,
    DuplicateAction,
    DuplicateController,
    ActionFailed,
    Lifecycle,
    MalformedRequest,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::VariableNotFound => "VariableNotFound",
            FailureKind::ActionNotFound => "ActionNotFound",
            FailureKind::NameNotFound => "NameNotFound",
            FailureKind::AccessViolation => "AccessViolation",
            FailureKind::TypeMismatch => "TypeMismatch",
            FailureKind::DuplicateVariable => "DuplicateVariable",
            FailureKind::DuplicateAction => "DuplicateAction",
            FailureKind::DuplicateController => "DuplicateController",
            FailureKind::ActionFailed => "ActionFailed",
            FailureKind::Lifecycle => "Lifecycle",
            FailureKind::MalformedRequest => "MalformedRequest",
            FailureKind::Internal => "Internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ControllerError> for Failure {
    fn from(err: &ControllerError) -> Self {
        let kind = match err {
            ControllerError::VariableNotFound { .. } => FailureKind::VariableNotFound,
            ControllerError::ActionNotFound { .. } => FailureKind::ActionNotFound,
            ControllerError::NameNotFound { .. } => FailureKind::NameNotFound,
            ControllerError::AccessViolation { .. } => FailureKind::AccessViolation,
            ControllerError::TypeMismatch { .. } => FailureKind::TypeMismatch,
            ControllerError::DuplicateVariable { .. } => FailureKind::DuplicateVariable,
            ControllerError::DuplicateAction { .. } => FailureKind::DuplicateAction,
            ControllerError::DuplicateController { .. } => FailureKind::DuplicateController,
            ControllerError::ActionFailed { .. } => FailureKind::ActionFailed,
            ControllerError::Lifecycle { .. } => FailureKind::Lifecycle,
            ControllerError::MalformedRequest(_) => FailureKind::MalformedRequest,
            ControllerError::Spawn { .. } => FailureKind::Internal,
        };
        Failure::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "requestKey")]
    pub correlation_id: CorrelationId,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    #[serde(skip)]
    pub peer: PeerId,
}

impl Response {
    pub fn success(request: &Request, result: Value) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            ok: true,
            result: Some(result),
            error: None,
            peer: request.peer.clone(),
        }
    }

    pub fn failure(request: &Request, failure: Failure) -> Self {
        Self::failure_to(request.peer.clone(), request.correlation_id.clone(), failure)
    }

    /// Failure addressed without a decoded request (e.g. an unparseable line).
    pub fn failure_to(peer: PeerId, correlation_id: CorrelationId, failure: Failure) -> Self {
        Self {
            correlation_id,
            ok: false,
            result: None,
            error: Some(failure),
            peer,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|f| f.kind)
    }
}
