//! Manager and middleware doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rce_types::{InterfaceError, InterfaceInfo, MiddlewareError, Payload};

use crate::manager::{Job, Manager};
use crate::middleware::{ChannelPublisher, ChannelSubscription, DeliveryCallback, Middleware};

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

// ────────────────────────────────────────────────────────────────────────────
// Managers
// ────────────────────────────────────────────────────────────────────────────

/// Queues jobs until [`QueueManager::run_all`] and records lifecycle calls.
#[derive(Default)]
pub struct QueueManager {
    jobs: Mutex<Vec<Job>>,
    registered: Mutex<Vec<InterfaceInfo>>,
    unregistered: Mutex<Vec<InterfaceInfo>>,
}

impl QueueManager {
    pub fn run_all(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in jobs {
            job();
        }
    }

    /// Drop queued jobs without running them, as a shut-down executor would.
    pub fn discard_all(&self) {
        self.jobs.lock().clear();
    }

    pub fn registered(&self) -> Vec<InterfaceInfo> {
        self.registered.lock().clone()
    }

    pub fn unregistered(&self) -> Vec<InterfaceInfo> {
        self.unregistered.lock().clone()
    }
}

impl Manager for QueueManager {
    fn register_interface(&self, info: &InterfaceInfo) -> Result<(), InterfaceError> {
        self.registered.lock().push(info.clone());
        Ok(())
    }

    fn unregister_interface(&self, info: &InterfaceInfo) {
        self.unregistered.lock().push(info.clone());
    }

    fn run_task(&self, job: Job) -> Result<(), InterfaceError> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

/// Runs every job on a fresh OS thread.
#[derive(Default)]
pub struct ThreadManager;

impl Manager for ThreadManager {
    fn register_interface(&self, _info: &InterfaceInfo) -> Result<(), InterfaceError> {
        Ok(())
    }

    fn unregister_interface(&self, _info: &InterfaceInfo) {}

    fn run_task(&self, job: Job) -> Result<(), InterfaceError> {
        std::thread::spawn(job);
        Ok(())
    }
}

/// Refuses registrations and jobs.
pub struct RejectingManager;

impl Manager for RejectingManager {
    fn register_interface(&self, info: &InterfaceInfo) -> Result<(), InterfaceError> {
        Err(InterfaceError::internal(format!("'{}' rejected", info.name)))
    }

    fn unregister_interface(&self, _info: &InterfaceInfo) {}

    fn run_task(&self, _job: Job) -> Result<(), InterfaceError> {
        Err(InterfaceError::internal("executor closed"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Middleware
// ────────────────────────────────────────────────────────────────────────────

enum CallBehavior {
    Echo,
    Fail(MiddlewareError),
    Unavailable,
    /// Echo once `release` has been called.
    Blocking,
    Panic,
}

struct Shared {
    behavior: CallBehavior,
    released: Mutex<bool>,
    release_cv: Condvar,
    published: Mutex<Vec<Payload>>,
    publish_error: Mutex<Option<MiddlewareError>>,
    callbacks: Mutex<Vec<DeliveryCallback>>,
    open_handles: AtomicUsize,
}

/// Middleware double with a fixed service behaviour and inspectable
/// channels.
pub struct ScriptedMiddleware {
    shared: Arc<Shared>,
}

impl Default for ScriptedMiddleware {
    fn default() -> Self {
        Self::with_behavior(CallBehavior::Echo)
    }
}

impl ScriptedMiddleware {
    fn with_behavior(behavior: CallBehavior) -> Self {
        Self {
            shared: Arc::new(Shared {
                behavior,
                released: Mutex::new(false),
                release_cv: Condvar::new(),
                published: Mutex::new(Vec::new()),
                publish_error: Mutex::new(None),
                callbacks: Mutex::new(Vec::new()),
                open_handles: AtomicUsize::new(0),
            }),
        }
    }

    pub fn echo() -> Self {
        Self::with_behavior(CallBehavior::Echo)
    }

    pub fn failing(error: MiddlewareError) -> Self {
        Self::with_behavior(CallBehavior::Fail(error))
    }

    pub fn unavailable() -> Self {
        Self::with_behavior(CallBehavior::Unavailable)
    }

    pub fn blocking() -> Self {
        Self::with_behavior(CallBehavior::Blocking)
    }

    pub fn panicking() -> Self {
        Self::with_behavior(CallBehavior::Panic)
    }

    /// Let blocked calls return.
    pub fn release(&self) {
        *self.shared.released.lock() = true;
        self.shared.release_cv.notify_all();
    }

    /// Make every subsequent publish fail with `error`.
    pub fn fail_publish_with(&self, error: MiddlewareError) {
        *self.shared.publish_error.lock() = Some(error);
    }

    pub fn published(&self) -> Vec<Payload> {
        self.shared.published.lock().clone()
    }

    /// Push `payload` to every subscriber.
    pub fn deliver(&self, payload: &[u8]) {
        let callbacks = self.shared.callbacks.lock().clone();
        for callback in callbacks {
            callback(payload.to_vec());
        }
    }

    /// Channel handles acquired and not yet unregistered.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }
}

struct ScriptedPublisher(Arc<Shared>);

impl ChannelPublisher for ScriptedPublisher {
    fn publish(&self, payload: &[u8]) -> Result<(), MiddlewareError> {
        if let Some(error) = self.0.publish_error.lock().clone() {
            return Err(error);
        }
        self.0.published.lock().push(payload.to_vec());
        Ok(())
    }

    fn unregister(self: Box<Self>) {
        self.0.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedSubscription(Arc<Shared>);

impl ChannelSubscription for ScriptedSubscription {
    fn unregister(self: Box<Self>) {
        self.0.callbacks.lock().clear();
        self.0.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Middleware for ScriptedMiddleware {
    fn advertise(
        &self,
        _channel: &str,
        _latched: bool,
    ) -> Result<Box<dyn ChannelPublisher>, MiddlewareError> {
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPublisher(Arc::clone(&self.shared))))
    }

    fn subscribe(
        &self,
        _channel: &str,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn ChannelSubscription>, MiddlewareError> {
        self.shared.callbacks.lock().push(callback);
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSubscription(Arc::clone(&self.shared))))
    }

    fn resolve_service_type(&self, service_type: &str) -> Result<(), MiddlewareError> {
        if service_type.contains('/') && !service_type.contains(char::is_whitespace) {
            Ok(())
        } else {
            Err(MiddlewareError::Serialization(format!(
                "unknown service type '{service_type}'"
            )))
        }
    }

    fn wait_for_service(&self, service: &str, timeout: Duration) -> Result<(), MiddlewareError> {
        match self.shared.behavior {
            CallBehavior::Unavailable => Err(MiddlewareError::Unavailable {
                name: service.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }

    fn call_service(
        &self,
        _service: &str,
        _service_type: &str,
        request: &[u8],
    ) -> Result<Payload, MiddlewareError> {
        match &self.shared.behavior {
            CallBehavior::Echo | CallBehavior::Unavailable => Ok(request.to_vec()),
            CallBehavior::Fail(error) => Err(error.clone()),
            CallBehavior::Blocking => {
                let mut released = self.shared.released.lock();
                while !*released {
                    self.shared.release_cv.wait(&mut released);
                }
                Ok(request.to_vec())
            }
            CallBehavior::Panic => panic!("service handler crashed"),
        }
    }
}
