//! Inbound channel cached as a single "latest value wins" slot.
//!
//! Every delivery overwrites the slot.  There is no queue and no
//! backpressure; a slow reader simply misses intermediate values.

use std::sync::Arc;

use parking_lot::Mutex;
use rce_types::{InterfaceError, Payload};
use tracing::trace;

use crate::middleware::{ChannelSubscription, DeliveryCallback, Middleware};

/// Subscriber variant of an interface.
pub struct SubscriberInterface {
    name: String,
    middleware: Arc<dyn Middleware>,
    latest: Arc<Mutex<Option<Payload>>>,
    subscription: Mutex<Option<Box<dyn ChannelSubscription>>>,
}

impl SubscriberInterface {
    pub fn new(name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            name: name.into(),
            middleware,
            latest: Arc::new(Mutex::new(None)),
            subscription: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn start(&self) -> Result<(), InterfaceError> {
        let slot = Arc::clone(&self.latest);
        let channel = self.name.clone();
        let callback: DeliveryCallback = Arc::new(move |payload: Payload| {
            trace!(interface = %channel, bytes = payload.len(), "message delivered");
            *slot.lock() = Some(payload);
        });
        let subscription = self.middleware.subscribe(&self.name, callback).map_err(|e| {
            InterfaceError::internal(format!("Could not subscribe to '{}': {e}", self.name))
        })?;
        *self.subscription.lock() = Some(subscription);
        Ok(())
    }

    /// Current slot value; `None` until the first delivery.
    pub(crate) fn receive(&self) -> Option<Payload> {
        self.latest.lock().clone()
    }

    pub(crate) fn stop(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unregister();
        }
    }
}
