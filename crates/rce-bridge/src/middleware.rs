//! The downward boundary: what the bridge needs from the robotic middleware.
//!
//! Interfaces never speak a middleware wire protocol themselves.  They go
//! through [`Middleware`], whose handles are treated as opaque capabilities.
//! [`LoopbackMiddleware`][crate::loopback::LoopbackMiddleware] is the
//! in-process implementation.

use std::sync::Arc;
use std::time::Duration;

use rce_types::{MiddlewareError, Payload};

/// Callback invoked by the middleware for every message delivered on a
/// subscribed channel.
pub type DeliveryCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Capabilities consumed from the underlying robotic middleware.
///
/// # Contract
///
/// * `advertise` / `subscribe` – acquire channel handles.  Releasing a handle
///   goes through its own `unregister`.
///
/// * `wait_for_service` – blocks for at most `timeout`.  Only called from a
///   worker thread, never from `send`/`receive`.
///
/// * `call_service` – blocking remote call with an opaque request payload.
///   A middleware that is shutting down reports
///   [`MiddlewareError::Interrupted`].
pub trait Middleware: Send + Sync {
    /// Acquire an outbound channel.  A latched channel redelivers its last
    /// value to late subscribers.
    fn advertise(
        &self,
        channel: &str,
        latched: bool,
    ) -> Result<Box<dyn ChannelPublisher>, MiddlewareError>;

    /// Register `callback` for every message arriving on `channel`.
    fn subscribe(
        &self,
        channel: &str,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn ChannelSubscription>, MiddlewareError>;

    /// Check that `service_type` names a service definition the middleware
    /// knows how to call.
    fn resolve_service_type(&self, service_type: &str) -> Result<(), MiddlewareError>;

    fn wait_for_service(&self, service: &str, timeout: Duration) -> Result<(), MiddlewareError>;

    fn call_service(
        &self,
        service: &str,
        service_type: &str,
        request: &[u8],
    ) -> Result<Payload, MiddlewareError>;
}

/// Handle on an advertised outbound channel.
pub trait ChannelPublisher: Send + Sync {
    fn publish(&self, payload: &[u8]) -> Result<(), MiddlewareError>;

    fn unregister(self: Box<Self>);
}

/// Handle on an active inbound subscription.
pub trait ChannelSubscription: Send + Sync {
    fn unregister(self: Box<Self>);
}
