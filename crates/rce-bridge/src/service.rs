//! Asynchronous façade over blocking remote calls.
//!
//! [`ServiceInterface::send`] wraps a request into a [`ServiceTask`], hands
//! the blocking call to the manager's executor and returns a correlation
//! [`TaskId`] right away.  [`ServiceInterface::receive`] looks the task up by
//! that token and reports its state without ever waiting for the round trip.
//!
//! # Locking
//!
//! The task registry sits behind one mutex per interface; token allocation
//! is a check-then-insert under that mutex.  Each task keeps its outcome
//! behind its own mutex.  Readers always take the registry lock first and
//! then the task lock; the worker thread only ever takes the task lock, so
//! the order cannot invert.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rce_types::{InterfaceError, MiddlewareError, Payload, TaskId};
use tracing::{debug, warn};

use crate::manager::Manager;
use crate::middleware::Middleware;

/// Timing knobs of a service interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// How long a task waits for the remote service to show up.
    pub wait_for_service_timeout: Duration,
    /// How long a finished task waits for `send` to bind its token.
    pub token_wait: Duration,
    /// How long a finished task stays readable before it is evicted.
    pub result_ttl: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            wait_for_service_timeout: Duration::from_secs(10),
            token_wait: Duration::from_secs(1),
            result_ttl: Duration::from_secs(300),
        }
    }
}

/// Source of candidate correlation tokens.
///
/// Candidates may repeat; [`ServiceInterface`] retries until it draws one that
/// is not in use.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> TaskId;
}

/// Random UUID v4 tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokens;

impl TokenSource for RandomTokens {
    fn next_token(&self) -> TaskId {
        TaskId::new_random()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ServiceTask
// ────────────────────────────────────────────────────────────────────────────

/// Result state of a [`ServiceTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Pending,
    Completed(Payload),
    /// The call failed; holds the diagnostic surfaced on `receive`.
    Failed(String),
    /// The middleware shut down under the call.  Reads as pending.
    Interrupted,
}

#[derive(Debug)]
struct TaskState {
    outcome: TaskOutcome,
    finished_at: Option<Instant>,
}

/// One in-flight remote call.
#[derive(Debug)]
pub struct ServiceTask {
    request: Payload,
    state: Mutex<TaskState>,
    token: Mutex<Option<TaskId>>,
    token_bound: Condvar,
    completion_wanted: AtomicBool,
}

impl ServiceTask {
    pub fn new(request: Payload) -> Self {
        Self {
            request,
            state: Mutex::new(TaskState {
                outcome: TaskOutcome::Pending,
                finished_at: None,
            }),
            token: Mutex::new(None),
            token_bound: Condvar::new(),
            completion_wanted: AtomicBool::new(false),
        }
    }

    /// Bind the correlation token.  A task accepts exactly one token.
    pub fn bind_token(&self, token: TaskId) -> Result<(), InterfaceError> {
        let mut slot = self.token.lock();
        if slot.is_some() {
            return Err(InterfaceError::internal("Task already has an ID."));
        }
        *slot = Some(token);
        self.token_bound.notify_all();
        Ok(())
    }

    pub fn token(&self) -> Option<TaskId> {
        *self.token.lock()
    }

    /// Wait at most `timeout` for a token to be bound.
    fn wait_for_token(&self, timeout: Duration) -> Option<TaskId> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.token.lock();
        while slot.is_none() {
            if self.token_bound.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        *slot
    }

    pub fn outcome(&self) -> TaskOutcome {
        self.state.lock().outcome.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished_at.is_some()
    }

    /// Whether a consumer has asked for the result.
    pub fn completion_wanted(&self) -> bool {
        self.completion_wanted.load(Ordering::Acquire)
    }

    /// Execute the blocking call.  Runs on a worker thread.
    pub fn run(
        &self,
        middleware: &dyn Middleware,
        service: &str,
        service_type: &str,
        options: &ServiceOptions,
    ) {
        let result = middleware
            .wait_for_service(service, options.wait_for_service_timeout)
            .and_then(|()| middleware.call_service(service, service_type, &self.request));

        let outcome = match result {
            Ok(response) => TaskOutcome::Completed(response),
            Err(MiddlewareError::Interrupted) => {
                debug!(service, "service call interrupted");
                TaskOutcome::Interrupted
            }
            Err(MiddlewareError::Serialization(e)) => {
                TaskOutcome::Failed(format!("Message could not be serialized: {e}"))
            }
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };
        self.finish(outcome);

        // `send` may still be allocating the token when a fast call returns.
        let token = self.wait_for_token(options.token_wait);
        self.signal_completion(service, token);
    }

    fn finish(&self, outcome: TaskOutcome) {
        let mut state = self.state.lock();
        state.outcome = outcome;
        state.finished_at = Some(Instant::now());
    }

    /// Record `outcome` unless the task already finished.  Returns whether it
    /// was recorded.
    fn finish_if_pending(&self, outcome: TaskOutcome) -> bool {
        let mut state = self.state.lock();
        if state.finished_at.is_some() {
            return false;
        }
        state.outcome = outcome;
        state.finished_at = Some(Instant::now());
        true
    }

    /// Completion hook.  The manager has no completion channel yet, so this
    /// only records that a consumer was waiting on the result.
    fn signal_completion(&self, service: &str, token: Option<TaskId>) {
        match token {
            Some(token) if self.completion_wanted() => {
                debug!(service, token = %token, "task finished with a consumer waiting");
            }
            Some(_) => {}
            None => warn!(service, "task finished without a correlation token"),
        }
    }

    /// Read the result without blocking.
    ///
    /// * `Ok(Some(payload))` – completed; repeated reads return the same bytes.
    /// * `Ok(None)` – no result yet.
    /// * `Err(Internal)` – the call failed; carries the diagnostic.
    pub fn result(&self) -> Result<Option<Payload>, InterfaceError> {
        self.completion_wanted.store(true, Ordering::Release);
        match &self.state.lock().outcome {
            TaskOutcome::Completed(response) => Ok(Some(response.clone())),
            TaskOutcome::Failed(diagnostic) => Err(InterfaceError::internal(diagnostic.clone())),
            TaskOutcome::Pending | TaskOutcome::Interrupted => Ok(None),
        }
    }

    /// Finished for at least `ttl`.  A task whose token is not bound yet
    /// never expires: `send` has not handed that token out.
    fn expired(&self, ttl: Duration, now: Instant) -> bool {
        if self.token.lock().is_none() {
            return false;
        }
        self.state
            .lock()
            .finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= ttl)
    }
}

/// Owned by a dispatched job.  Fails the task if the job is dropped before
/// [`ServiceTask::run`] returns, whether it never ran or unwound.
struct RunGuard {
    task: Arc<ServiceTask>,
    service: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let dropped = TaskOutcome::Failed("Task was dropped before it completed.".to_string());
        if self.task.finish_if_pending(dropped) {
            warn!(service = %self.service, "service task dropped before completion");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TaskRegistry {
    tasks: HashMap<TaskId, Arc<ServiceTask>>,
}

impl TaskRegistry {
    fn try_insert(&mut self, token: TaskId, task: &Arc<ServiceTask>) -> bool {
        match self.tasks.entry(token) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(task));
                true
            }
        }
    }

    fn sweep(&mut self, ttl: Duration, now: Instant) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.expired(ttl, now));
        before - self.tasks.len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ServiceInterface
// ────────────────────────────────────────────────────────────────────────────

/// Remote-call variant of an interface.
pub struct ServiceInterface {
    name: String,
    service_type: String,
    middleware: Arc<dyn Middleware>,
    options: ServiceOptions,
    tokens: Arc<dyn TokenSource>,
    tasks: Mutex<TaskRegistry>,
}

impl ServiceInterface {
    /// Create a service interface for `name` speaking `service_type`.
    ///
    /// # Errors
    ///
    /// [`InterfaceError::Serialization`] when the middleware cannot resolve
    /// `service_type`.
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        middleware: Arc<dyn Middleware>,
        options: ServiceOptions,
    ) -> Result<Self, InterfaceError> {
        let service_type = service_type.into();
        middleware.resolve_service_type(&service_type).map_err(|e| {
            InterfaceError::serialization(format!(
                "Could not load service type '{service_type}': {e}"
            ))
        })?;
        Ok(Self {
            name: name.into(),
            service_type,
            middleware,
            options,
            tokens: Arc::new(RandomTokens),
            tasks: Mutex::new(TaskRegistry::default()),
        })
    }

    /// Replace the token source.
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Dispatch `request` and return the token to poll with.
    pub(crate) fn send(
        &self,
        manager: &dyn Manager,
        request: Payload,
    ) -> Result<TaskId, InterfaceError> {
        let evicted = self.sweep_expired();
        if evicted > 0 {
            debug!(interface = %self.name, evicted, "evicted finished service tasks");
        }

        let task = Arc::new(ServiceTask::new(request));
        let job = {
            let guard = RunGuard {
                task: Arc::clone(&task),
                service: self.name.clone(),
            };
            let middleware = Arc::clone(&self.middleware);
            let service_type = self.service_type.clone();
            let options = self.options;
            Box::new(move || {
                let guard = guard;
                guard
                    .task
                    .run(middleware.as_ref(), &guard.service, &service_type, &options);
            })
        };
        manager.run_task(job)?;

        let token = self.allocate_token(&task);
        task.bind_token(token)?;
        debug!(interface = %self.name, token = %token, "service task dispatched");
        Ok(token)
    }

    fn allocate_token(&self, task: &Arc<ServiceTask>) -> TaskId {
        loop {
            let candidate = self.tokens.next_token();
            if self.tasks.lock().try_insert(candidate, task) {
                return candidate;
            }
            debug!(interface = %self.name, token = %candidate, "token collision, drawing again");
        }
    }

    /// Non-blocking result lookup; see [`ServiceTask::result`].
    pub(crate) fn receive(&self, token: &TaskId) -> Result<Option<Payload>, InterfaceError> {
        let tasks = self.tasks.lock();
        let task = tasks
            .tasks
            .get(token)
            .ok_or_else(|| InterfaceError::internal(format!("Invalid taskID used: {token}")))?;
        task.result()
    }

    /// Drop every finished task older than the result TTL.  Returns the
    /// number of evicted tasks.
    pub fn sweep_expired(&self) -> usize {
        self.tasks
            .lock()
            .sweep(self.options.result_ttl, Instant::now())
    }

    /// Number of tracked tasks, finished or not.
    pub fn len(&self) -> usize {
        self.tasks.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tokens of tasks that have not finished yet.
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .lock()
            .tasks
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(token, _)| *token)
            .collect()
    }

    /// Snapshot of every tracked token.
    pub fn tokens(&self) -> Vec<TaskId> {
        self.tasks.lock().tasks.keys().copied().collect()
    }
}
