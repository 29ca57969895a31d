use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque serialized message as handed over by the middleware or the manager.
///
/// The bridge never looks inside a payload; content schemas belong to the
/// middleware.
pub type Payload = Vec<u8>;

/// Correlation token matching an asynchronous service request to its
/// eventual response.
///
/// Rendered as 32 lowercase hex digits so it can travel over the control
/// channel as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Draw a fresh random token (UUID v4).
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for TaskId {
    type Err = InterfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| InterfaceError::Internal(format!("Invalid task ID '{s}': {e}")))
    }
}

/// The middleware primitive an interface bridges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceKind {
    /// Outbound, latched channel.
    Publisher,
    /// Inbound channel cached as "latest value wins".
    Subscriber,
    /// Remote-call channel with correlation tokens.
    Service,
}

impl InterfaceKind {
    /// Whether an interface of this kind supports `op`.
    ///
    /// | Kind | send | receive |
    /// |---|---|---|
    /// | Publisher | yes | no |
    /// | Subscriber | no | yes |
    /// | Service | yes | yes |
    pub fn supports(self, op: Operation) -> bool {
        matches!(
            (self, op),
            (InterfaceKind::Publisher, Operation::Send)
                | (InterfaceKind::Subscriber, Operation::Receive)
                | (InterfaceKind::Service, _)
        )
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Publisher => write!(f, "publisher"),
            InterfaceKind::Subscriber => write!(f, "subscriber"),
            InterfaceKind::Service => write!(f, "service"),
        }
    }
}

/// Data-path operations an interface may expose to its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Send,
    Receive,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Send => write!(f, "send"),
            Operation::Receive => write!(f, "receive"),
        }
    }
}

/// Lifecycle state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterfaceState {
    #[default]
    NotReady,
    Ready,
}

/// Identity of an interface as seen by its manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// Middleware name, unique within one manager's namespace.
    pub name: String,
    pub kind: InterfaceKind,
}

/// Failures propagated to callers of the interface layer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceError {
    /// Protocol or lifecycle misuse, or a remote failure surfaced on receive.
    #[error("Internal Error: {0}")]
    Internal(String),

    #[error("Interface '{interface}' ({kind}) does not support {operation}")]
    UnsupportedOperation {
        interface: String,
        kind: InterfaceKind,
        operation: Operation,
    },

    /// Malformed wire descriptor or unresolvable service type.
    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl InterfaceError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// Failure classes reported by the underlying robotic middleware.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareError {
    /// The middleware is shutting down; expected during teardown.
    #[error("operation interrupted")]
    Interrupted,

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("service '{name}' not available after {timeout_ms}ms")]
    Unavailable { name: String, timeout_ms: u64 },

    #[error("remote call failed: {0}")]
    Call(String),

    #[error("channel error: {0}")]
    Channel(String),
}
