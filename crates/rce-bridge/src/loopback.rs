//! In-process middleware.
//!
//! [`LoopbackMiddleware`] keeps channels and services in a single table so
//! that interfaces can be exercised without a robot or a middleware master:
//!
//! * **Channels** – every publish is fanned out to the channel's
//!   subscribers.  A latched publisher also stores the value and late
//!   subscribers receive it on subscription.
//! * **Services** – handlers registered with
//!   [`LoopbackMiddleware::advertise_service`].  `wait_for_service` blocks on
//!   a condition variable until the handler appears or the timeout passes.
//! * **Shutdown** – after [`LoopbackMiddleware::shutdown`] every publish,
//!   wait and call fails with [`MiddlewareError::Interrupted`].
//!
//! Delivery callbacks run on the publishing thread while the channel table is
//! locked, which keeps per-channel delivery in publish order.  Callbacks must
//! not call back into the middleware.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rce_types::{MiddlewareError, Payload};
use tracing::debug;

use crate::middleware::{ChannelPublisher, ChannelSubscription, DeliveryCallback, Middleware};

/// Handler answering a loopback service call.
pub type ServiceHandler = Arc<dyn Fn(&[u8]) -> Result<Payload, String> + Send + Sync>;

#[derive(Default)]
struct Channel {
    latched: Option<Payload>,
    subscribers: HashMap<u64, DeliveryCallback>,
    publishers: usize,
}

struct ServiceEntry {
    service_type: String,
    handler: ServiceHandler,
}

#[derive(Default)]
struct Table {
    channels: HashMap<String, Channel>,
    services: HashMap<String, ServiceEntry>,
    next_subscriber: u64,
    shut_down: bool,
}

#[derive(Default)]
struct Inner {
    table: Mutex<Table>,
    services_changed: Condvar,
}

/// In-process [`Middleware`].  Clone it cheaply – all clones share the same
/// table.
#[derive(Clone, Default)]
pub struct LoopbackMiddleware {
    inner: Arc<Inner>,
}

impl LoopbackMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` callable with `handler`.  Replaces a previous handler.
    pub fn advertise_service<F>(&self, name: &str, service_type: &str, handler: F)
    where
        F: Fn(&[u8]) -> Result<Payload, String> + Send + Sync + 'static,
    {
        let mut table = self.inner.table.lock();
        table.services.insert(
            name.to_string(),
            ServiceEntry {
                service_type: service_type.to_string(),
                handler: Arc::new(handler),
            },
        );
        self.inner.services_changed.notify_all();
        debug!(service = name, service_type, "loopback service advertised");
    }

    pub fn remove_service(&self, name: &str) {
        self.inner.table.lock().services.remove(name);
    }

    /// Publish `payload` on `channel` as an external, non-latched publisher
    /// would.  Returns the number of subscribers reached.
    pub fn inject(&self, channel: &str, payload: &[u8]) -> Result<usize, MiddlewareError> {
        self.publish_on(channel, payload, false)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .table
            .lock()
            .channels
            .get(channel)
            .map_or(0, |c| c.subscribers.len())
    }

    /// Value retained by a latched publisher on `channel`.
    pub fn latched(&self, channel: &str) -> Option<Payload> {
        self.inner
            .table
            .lock()
            .channels
            .get(channel)
            .and_then(|c| c.latched.clone())
    }

    /// Interrupt blocked waits and fail every later operation.
    pub fn shutdown(&self) {
        let mut table = self.inner.table.lock();
        table.shut_down = true;
        self.inner.services_changed.notify_all();
    }

    fn publish_on(
        &self,
        channel: &str,
        payload: &[u8],
        latch: bool,
    ) -> Result<usize, MiddlewareError> {
        let mut table = self.inner.table.lock();
        if table.shut_down {
            return Err(MiddlewareError::Interrupted);
        }
        let entry = table.channels.entry(channel.to_string()).or_default();
        if latch {
            entry.latched = Some(payload.to_vec());
        }
        for callback in entry.subscribers.values() {
            callback(payload.to_vec());
        }
        Ok(entry.subscribers.len())
    }
}

fn valid_service_type(service_type: &str) -> bool {
    let is_ident = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    matches!(service_type.split_once('/'), Some((pkg, name)) if is_ident(pkg) && is_ident(name))
}

struct LoopbackPublisher {
    middleware: LoopbackMiddleware,
    channel: String,
    latched: bool,
}

impl ChannelPublisher for LoopbackPublisher {
    fn publish(&self, payload: &[u8]) -> Result<(), MiddlewareError> {
        self.middleware
            .publish_on(&self.channel, payload, self.latched)
            .map(|_| ())
    }

    fn unregister(self: Box<Self>) {
        let mut table = self.middleware.inner.table.lock();
        if let Some(channel) = table.channels.get_mut(&self.channel) {
            channel.publishers = channel.publishers.saturating_sub(1);
            if channel.publishers == 0 {
                channel.latched = None;
            }
        }
    }
}

struct LoopbackSubscription {
    middleware: LoopbackMiddleware,
    channel: String,
    id: u64,
}

impl ChannelSubscription for LoopbackSubscription {
    fn unregister(self: Box<Self>) {
        let mut table = self.middleware.inner.table.lock();
        if let Some(channel) = table.channels.get_mut(&self.channel) {
            channel.subscribers.remove(&self.id);
        }
    }
}

impl Middleware for LoopbackMiddleware {
    fn advertise(
        &self,
        channel: &str,
        latched: bool,
    ) -> Result<Box<dyn ChannelPublisher>, MiddlewareError> {
        let mut table = self.inner.table.lock();
        if table.shut_down {
            return Err(MiddlewareError::Interrupted);
        }
        table.channels.entry(channel.to_string()).or_default().publishers += 1;
        Ok(Box::new(LoopbackPublisher {
            middleware: self.clone(),
            channel: channel.to_string(),
            latched,
        }))
    }

    fn subscribe(
        &self,
        channel: &str,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn ChannelSubscription>, MiddlewareError> {
        let mut table = self.inner.table.lock();
        if table.shut_down {
            return Err(MiddlewareError::Interrupted);
        }
        let id = table.next_subscriber;
        table.next_subscriber += 1;

        let entry = table.channels.entry(channel.to_string()).or_default();
        if let Some(latched) = &entry.latched {
            callback(latched.clone());
        }
        entry.subscribers.insert(id, callback);

        Ok(Box::new(LoopbackSubscription {
            middleware: self.clone(),
            channel: channel.to_string(),
            id,
        }))
    }

    fn resolve_service_type(&self, service_type: &str) -> Result<(), MiddlewareError> {
        if valid_service_type(service_type) {
            Ok(())
        } else {
            Err(MiddlewareError::Serialization(format!(
                "'{service_type}' is not of the form 'package/Service'"
            )))
        }
    }

    fn wait_for_service(&self, service: &str, timeout: Duration) -> Result<(), MiddlewareError> {
        let deadline = Instant::now() + timeout;
        let mut table = self.inner.table.lock();
        loop {
            if table.shut_down {
                return Err(MiddlewareError::Interrupted);
            }
            if table.services.contains_key(service) {
                return Ok(());
            }
            if self
                .inner
                .services_changed
                .wait_until(&mut table, deadline)
                .timed_out()
            {
                break;
            }
        }
        if table.services.contains_key(service) && !table.shut_down {
            return Ok(());
        }
        Err(MiddlewareError::Unavailable {
            name: service.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn call_service(
        &self,
        service: &str,
        service_type: &str,
        request: &[u8],
    ) -> Result<Payload, MiddlewareError> {
        let handler = {
            let table = self.inner.table.lock();
            if table.shut_down {
                return Err(MiddlewareError::Interrupted);
            }
            let entry = table.services.get(service).ok_or_else(|| {
                MiddlewareError::Call(format!("service '{service}' is not advertised"))
            })?;
            if entry.service_type != service_type {
                return Err(MiddlewareError::Call(format!(
                    "service '{service}' speaks '{}', not '{service_type}'",
                    entry.service_type
                )));
            }
            Arc::clone(&entry.handler)
        };
        handler(request).map_err(MiddlewareError::Call)
    }
}
