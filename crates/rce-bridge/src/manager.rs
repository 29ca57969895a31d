//! The upward boundary: the manager that owns interfaces and runs their
//! blocking work.

use rce_types::{InterfaceError, InterfaceInfo};

/// A unit of blocking work handed to the manager's executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Owner of a set of interfaces.
///
/// An [`Interface`][crate::Interface] is bound to exactly one manager for its
/// whole lifetime.  The manager only receives lifecycle notifications and
/// execution requests; it never pulls data out of an interface.
pub trait Manager: Send + Sync {
    /// Called by `Interface::start` once the variant startup hook succeeded.
    /// Returning an error aborts the start.
    fn register_interface(&self, info: &InterfaceInfo) -> Result<(), InterfaceError>;

    fn unregister_interface(&self, info: &InterfaceInfo);

    /// Run `job` off the caller's thread.  Must not wait for the job to
    /// finish.
    fn run_task(&self, job: Job) -> Result<(), InterfaceError>;
}
