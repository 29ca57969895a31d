//! `rce-bridge` – Interfaces between a remote manager and a robotic
//! middleware.
//!
//! Each [`Interface`] bridges one middleware primitive (outbound channel,
//! inbound channel or remote-call service) to a manager that drives it over
//! a serialized control channel.  The bridge never interprets payloads.
//!
//! # Modules
//!
//! - [`interface`] – [`Interface`]: lifecycle state machine, manager binding
//!   and capability-checked `send`/`receive` dispatch.
//! - [`service`] – [`ServiceInterface`] and [`ServiceTask`]: turns blocking
//!   remote calls into non-blocking send/receive keyed by correlation tokens.
//! - [`publisher`] / [`subscriber`] – latched fire-and-forget output and a
//!   "latest value wins" input cache.
//! - [`descriptor`] – length-prefixed wire descriptors for rebuilding
//!   interfaces from the control channel.
//! - [`manager`] / [`middleware`] – the upward and downward boundary traits.
//! - [`loopback`] – [`LoopbackMiddleware`], an in-process middleware.

pub mod descriptor;
pub mod interface;
pub mod loopback;
pub mod manager;
pub mod middleware;
pub mod publisher;
pub mod service;
pub mod subscriber;

#[cfg(test)]
mod test_support;

pub use descriptor::ServiceDescriptor;
pub use interface::{Endpoint, Interface};
pub use loopback::LoopbackMiddleware;
pub use manager::{Job, Manager};
pub use middleware::{ChannelPublisher, ChannelSubscription, DeliveryCallback, Middleware};
pub use publisher::PublisherInterface;
pub use service::{
    RandomTokens, ServiceInterface, ServiceOptions, ServiceTask, TaskOutcome, TokenSource,
};
pub use subscriber::SubscriberInterface;
