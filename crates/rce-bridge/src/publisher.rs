//! Fire-and-forget outbound channel.

use std::sync::Arc;

use parking_lot::Mutex;
use rce_types::{InterfaceError, MiddlewareError};
use tracing::debug;

use crate::middleware::{ChannelPublisher, Middleware};

/// Publisher variant of an interface: forwards every payload to a latched
/// middleware channel and expects no response.
pub struct PublisherInterface {
    name: String,
    middleware: Arc<dyn Middleware>,
    channel: Mutex<Option<Box<dyn ChannelPublisher>>>,
}

impl PublisherInterface {
    pub fn new(name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            name: name.into(),
            middleware,
            channel: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn start(&self) -> Result<(), InterfaceError> {
        let handle = self.middleware.advertise(&self.name, true).map_err(|e| {
            InterfaceError::internal(format!("Could not advertise '{}': {e}", self.name))
        })?;
        *self.channel.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), InterfaceError> {
        let channel = self.channel.lock();
        let Some(publisher) = channel.as_ref() else {
            return Err(InterfaceError::internal(format!(
                "Publisher '{}' has no open channel.",
                self.name
            )));
        };
        match publisher.publish(payload) {
            Ok(()) => Ok(()),
            Err(MiddlewareError::Interrupted) => {
                debug!(interface = %self.name, "publish interrupted, dropping message");
                Ok(())
            }
            Err(MiddlewareError::Serialization(_)) => Err(InterfaceError::internal(
                "Message could not be serialized by the middleware.",
            )),
            Err(e) => Err(InterfaceError::internal(format!(
                "Publishing on '{}' failed: {e}",
                self.name
            ))),
        }
    }

    pub(crate) fn stop(&self) {
        if let Some(handle) = self.channel.lock().take() {
            handle.unregister();
        }
    }
}
