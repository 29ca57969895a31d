//! [`WorkerPool`] – bounded executor and interface registry.
//!
//! Implements the [`Manager`] boundary for the bridge: interfaces register
//! themselves by name, and blocking service calls are run on Tokio's
//! blocking thread pool.  A [`Semaphore`] caps how many calls execute at
//! once; jobs beyond the cap wait for a permit without blocking the caller
//! of [`Manager::run_task`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rce_bridge::{Job, Manager};
use rce_types::{InterfaceError, InterfaceInfo, InterfaceKind};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::settings::BridgeSettings;

/// Decrements the in-flight counter when a job is done, however it ends.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Manager backed by a Tokio runtime.
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    interfaces: Mutex<HashMap<String, InterfaceKind>>,
}

impl WorkerPool {
    /// Create a pool that runs at most `max_in_flight` calls at a time on
    /// the runtime behind `handle`.  A cap of zero is raised to one.
    pub fn new(handle: Handle, max_in_flight: usize) -> Self {
        let capacity = max_in_flight.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            interfaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(handle: Handle, settings: &BridgeSettings) -> Self {
        Self::new(handle, settings.max_in_flight_calls)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs submitted and not yet finished, including those waiting for a
    /// permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Registered interfaces, ordered by name.
    pub fn registered(&self) -> Vec<InterfaceInfo> {
        let mut infos: Vec<InterfaceInfo> = self
            .interfaces
            .lock()
            .iter()
            .map(|(name, kind)| InterfaceInfo {
                name: name.clone(),
                kind: *kind,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.interfaces.lock().contains_key(name)
    }

    /// Refuse new jobs.  Jobs still waiting for a permit are dropped; running
    /// jobs finish normally.
    pub fn close(&self) {
        self.permits.close();
        info!(in_flight = self.in_flight(), "worker pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Manager for WorkerPool {
    fn register_interface(&self, info: &InterfaceInfo) -> Result<(), InterfaceError> {
        let mut interfaces = self.interfaces.lock();
        if interfaces.contains_key(&info.name) {
            return Err(InterfaceError::internal(format!(
                "Interface '{}' is already registered.",
                info.name
            )));
        }
        interfaces.insert(info.name.clone(), info.kind);
        debug!(interface = %info.name, kind = %info.kind, "interface registered");
        Ok(())
    }

    fn unregister_interface(&self, info: &InterfaceInfo) {
        if self.interfaces.lock().remove(&info.name).is_none() {
            warn!(interface = %info.name, "unregistering unknown interface");
        }
    }

    fn run_task(&self, job: Job) -> Result<(), InterfaceError> {
        if self.permits.is_closed() {
            return Err(InterfaceError::internal("Worker pool is closed."));
        }
        let permits = Arc::clone(&self.permits);
        let guard = InFlight::enter(&self.in_flight);

        self.handle.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!("worker pool closed before the job got a permit, dropping it");
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                error!(error = %e, "service task panicked");
            }
        });
        Ok(())
    }
}
