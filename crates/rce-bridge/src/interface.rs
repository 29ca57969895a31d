//! [`Interface`] – lifecycle and dispatch shared by every variant.
//!
//! An interface is created in the `NotReady` state, bound to its manager with
//! [`Interface::register_manager`], and brought up with [`Interface::start`].
//! `send` and `receive` first check that the variant supports the operation
//! at all, then that the interface is `Ready`, and only then dispatch.

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use rce_types::{
    InterfaceError, InterfaceInfo, InterfaceKind, InterfaceState, Operation, Payload, TaskId,
};
use tracing::{info, warn};

use crate::descriptor;
use crate::manager::Manager;
use crate::middleware::Middleware;
use crate::publisher::PublisherInterface;
use crate::service::{ServiceInterface, ServiceOptions};
use crate::subscriber::SubscriberInterface;

/// The middleware primitive behind an interface.
pub enum Endpoint {
    Publisher(PublisherInterface),
    Subscriber(SubscriberInterface),
    Service(ServiceInterface),
}

impl Endpoint {
    pub fn kind(&self) -> InterfaceKind {
        match self {
            Endpoint::Publisher(_) => InterfaceKind::Publisher,
            Endpoint::Subscriber(_) => InterfaceKind::Subscriber,
            Endpoint::Service(_) => InterfaceKind::Service,
        }
    }

    fn name(&self) -> &str {
        match self {
            Endpoint::Publisher(p) => p.name(),
            Endpoint::Subscriber(s) => s.name(),
            Endpoint::Service(s) => s.name(),
        }
    }

    fn start(&self) -> Result<(), InterfaceError> {
        match self {
            Endpoint::Publisher(p) => p.start(),
            Endpoint::Subscriber(s) => s.start(),
            Endpoint::Service(_) => Ok(()),
        }
    }

    fn stop(&self) {
        match self {
            Endpoint::Publisher(p) => p.stop(),
            Endpoint::Subscriber(s) => s.stop(),
            Endpoint::Service(_) => {}
        }
    }
}

impl From<PublisherInterface> for Endpoint {
    fn from(p: PublisherInterface) -> Self {
        Endpoint::Publisher(p)
    }
}

impl From<SubscriberInterface> for Endpoint {
    fn from(s: SubscriberInterface) -> Self {
        Endpoint::Subscriber(s)
    }
}

impl From<ServiceInterface> for Endpoint {
    fn from(s: ServiceInterface) -> Self {
        Endpoint::Service(s)
    }
}

/// A named bridge to one middleware primitive, owned by one manager.
pub struct Interface {
    name: String,
    manager: OnceLock<Arc<dyn Manager>>,
    state: RwLock<InterfaceState>,
    /// Serializes `start` and `stop`.  The state lock itself is never held
    /// across a manager callback.
    lifecycle: Mutex<()>,
    endpoint: Endpoint,
}

impl Interface {
    pub fn new(endpoint: impl Into<Endpoint>) -> Self {
        let endpoint = endpoint.into();
        Self {
            name: endpoint.name().to_string(),
            manager: OnceLock::new(),
            state: RwLock::new(InterfaceState::NotReady),
            lifecycle: Mutex::new(()),
            endpoint,
        }
    }

    pub fn publisher(name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        Self::new(PublisherInterface::new(name, middleware))
    }

    pub fn subscriber(name: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        Self::new(SubscriberInterface::new(name, middleware))
    }

    pub fn service(
        name: impl Into<String>,
        service_type: impl Into<String>,
        middleware: Arc<dyn Middleware>,
        options: ServiceOptions,
    ) -> Result<Self, InterfaceError> {
        ServiceInterface::new(name, service_type, middleware, options).map(Self::new)
    }

    // -----------------------------------------------------------------------
    // Descriptor constructors
    // -----------------------------------------------------------------------

    /// Rebuild a publisher from a `[len][name]` descriptor.
    pub fn publisher_from_descriptor(
        data: &[u8],
        middleware: Arc<dyn Middleware>,
    ) -> Result<Self, InterfaceError> {
        Ok(Self::publisher(descriptor::decode_name(data)?, middleware))
    }

    /// Rebuild a subscriber from a `[len][name]` descriptor.
    pub fn subscriber_from_descriptor(
        data: &[u8],
        middleware: Arc<dyn Middleware>,
    ) -> Result<Self, InterfaceError> {
        Ok(Self::subscriber(descriptor::decode_name(data)?, middleware))
    }

    /// Rebuild a service from a `[len][name][len][service type]` descriptor.
    pub fn service_from_descriptor(
        data: &[u8],
        middleware: Arc<dyn Middleware>,
        options: ServiceOptions,
    ) -> Result<Self, InterfaceError> {
        let desc = descriptor::decode_service(data)?;
        Self::service(desc.name, desc.service_type, middleware, options)
    }

    /// Encode this interface's wire descriptor.
    pub fn descriptor(&self) -> Result<Vec<u8>, InterfaceError> {
        match &self.endpoint {
            Endpoint::Service(s) => descriptor::encode_service(&self.name, s.service_type()),
            _ => descriptor::encode_name(&self.name),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InterfaceKind {
        self.endpoint.kind()
    }

    pub fn info(&self) -> InterfaceInfo {
        InterfaceInfo {
            name: self.name.clone(),
            kind: self.kind(),
        }
    }

    pub fn state(&self) -> InterfaceState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == InterfaceState::Ready
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The service variant, for registry introspection.
    pub fn as_service(&self) -> Option<&ServiceInterface> {
        match &self.endpoint {
            Endpoint::Service(s) => Some(s),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Bind the owning manager.  Succeeds once per interface.
    pub fn register_manager(&self, manager: Arc<dyn Manager>) -> Result<(), InterfaceError> {
        self.manager
            .set(manager)
            .map_err(|_| InterfaceError::internal("There is already a manager registered."))
    }

    fn manager(&self) -> Result<&Arc<dyn Manager>, InterfaceError> {
        self.manager.get().ok_or_else(|| {
            InterfaceError::internal(format!(
                "Interface '{}' has no registered manager.",
                self.name
            ))
        })
    }

    /// Bring the interface up.  Calling it on a `Ready` interface is a no-op.
    ///
    /// # Errors
    ///
    /// [`InterfaceError::Internal`] when no manager is bound, when the
    /// variant cannot acquire its middleware handle, or when the manager
    /// refuses the registration.  The interface stays `NotReady` in every
    /// case.
    pub fn start(&self) -> Result<(), InterfaceError> {
        let manager = self.manager()?;
        let _lifecycle = self.lifecycle.lock();
        if self.is_ready() {
            return Ok(());
        }

        self.endpoint.start()?;
        if let Err(e) = manager.register_interface(&self.info()) {
            warn!(interface = %self.name, error = %e, "manager refused interface, rolling back");
            self.endpoint.stop();
            return Err(e);
        }

        *self.state.write() = InterfaceState::Ready;
        info!(interface = %self.name, kind = %self.kind(), "interface started");
        Ok(())
    }

    /// Tear the interface down.  Calling it on a `NotReady` interface is a
    /// no-op.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        {
            // Waits out in-flight sends and receives before the endpoint goes.
            let mut state = self.state.write();
            if *state != InterfaceState::Ready {
                return;
            }
            *state = InterfaceState::NotReady;
        }

        self.endpoint.stop();
        if let Some(manager) = self.manager.get() {
            manager.unregister_interface(&self.info());
        }
        info!(interface = %self.name, kind = %self.kind(), "interface stopped");
    }

    // -----------------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------------

    /// Send a serialized message.
    ///
    /// Returns the correlation token for services and `None` for publishers,
    /// which expect no response.
    pub fn send(&self, payload: Payload) -> Result<Option<TaskId>, InterfaceError> {
        self.ensure_supported(Operation::Send)?;
        let state = self.state.read();
        self.ensure_ready(*state, Operation::Send)?;

        match &self.endpoint {
            Endpoint::Publisher(p) => p.send(&payload).map(|()| None),
            Endpoint::Service(s) => s.send(self.manager()?.as_ref(), payload).map(Some),
            Endpoint::Subscriber(_) => Err(self.unsupported(Operation::Send)),
        }
    }

    /// Read a serialized message without blocking.
    ///
    /// Services look `token` up and return `None` while the call is still
    /// pending.  Subscribers ignore `token` and return the latest delivery,
    /// or `None` if nothing has arrived yet.
    pub fn receive(&self, token: Option<&TaskId>) -> Result<Option<Payload>, InterfaceError> {
        self.ensure_supported(Operation::Receive)?;
        let state = self.state.read();
        self.ensure_ready(*state, Operation::Receive)?;

        match &self.endpoint {
            Endpoint::Subscriber(s) => Ok(s.receive()),
            Endpoint::Service(s) => {
                let token = token.ok_or_else(|| {
                    InterfaceError::internal("A service receive requires a task ID.")
                })?;
                s.receive(token)
            }
            Endpoint::Publisher(_) => Err(self.unsupported(Operation::Receive)),
        }
    }

    fn ensure_supported(&self, op: Operation) -> Result<(), InterfaceError> {
        if self.kind().supports(op) {
            Ok(())
        } else {
            Err(self.unsupported(op))
        }
    }

    fn ensure_ready(&self, state: InterfaceState, op: Operation) -> Result<(), InterfaceError> {
        match state {
            InterfaceState::Ready => Ok(()),
            InterfaceState::NotReady => Err(InterfaceError::internal(format!(
                "Interface '{}' is not ready to {op} a message.",
                self.name
            ))),
        }
    }

    fn unsupported(&self, operation: Operation) -> InterfaceError {
        InterfaceError::UnsupportedOperation {
            interface: self.name.clone(),
            kind: self.kind(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Job;
    use crate::test_support::{QueueManager, RejectingManager, ScriptedMiddleware};
    use std::sync::Weak;
    use std::time::Duration;

    /// Reads the interface's state from inside its own lifecycle callbacks.
    #[derive(Default)]
    struct ObservingManager {
        interface: OnceLock<Weak<Interface>>,
        seen: Mutex<Vec<InterfaceState>>,
    }

    impl ObservingManager {
        fn observe(&self) {
            if let Some(interface) = self.interface.get().and_then(Weak::upgrade) {
                self.seen.lock().push(interface.state());
            }
        }
    }

    impl Manager for ObservingManager {
        fn register_interface(&self, _info: &InterfaceInfo) -> Result<(), InterfaceError> {
            self.observe();
            Ok(())
        }

        fn unregister_interface(&self, _info: &InterfaceInfo) {
            self.observe();
        }

        fn run_task(&self, _job: Job) -> Result<(), InterfaceError> {
            Ok(())
        }
    }

    fn middleware() -> Arc<ScriptedMiddleware> {
        Arc::new(ScriptedMiddleware::default())
    }

    fn dyn_mw(middleware: &Arc<ScriptedMiddleware>) -> Arc<dyn Middleware> {
        Arc::clone(middleware) as Arc<dyn Middleware>
    }

    fn bound(interface: Interface) -> (Interface, Arc<QueueManager>) {
        let manager = Arc::new(QueueManager::default());
        interface
            .register_manager(Arc::clone(&manager) as Arc<dyn Manager>)
            .unwrap();
        (interface, manager)
    }

    fn service(middleware: Arc<ScriptedMiddleware>) -> Interface {
        Interface::service("arm/grasp", "pkg/GraspSrv", middleware, ServiceOptions::default())
            .unwrap()
    }

    #[test]
    fn manager_binds_only_once() {
        let interface = Interface::publisher("camera/image", middleware());
        interface
            .register_manager(Arc::new(QueueManager::default()))
            .unwrap();
        let err = interface
            .register_manager(Arc::new(QueueManager::default()))
            .unwrap_err();
        assert!(matches!(err, InterfaceError::Internal(_)));
    }

    #[test]
    fn start_without_manager_fails() {
        let interface = Interface::publisher("camera/image", middleware());
        assert!(matches!(interface.start(), Err(InterfaceError::Internal(_))));
        assert_eq!(interface.state(), InterfaceState::NotReady);
    }

    #[test]
    fn start_registers_and_second_start_is_noop() {
        let mw = middleware();
        let (interface, manager) = bound(Interface::publisher("camera/image", dyn_mw(&mw)));

        interface.start().unwrap();
        interface.start().unwrap();

        assert!(interface.is_ready());
        assert_eq!(manager.registered(), vec![interface.info()]);
        assert_eq!(mw.open_handles(), 1);
    }

    #[test]
    fn manager_callbacks_may_inspect_the_interface() {
        let manager = Arc::new(ObservingManager::default());
        let interface = Arc::new(Interface::publisher("camera/image", middleware()));
        interface
            .register_manager(Arc::clone(&manager) as Arc<dyn Manager>)
            .unwrap();
        assert!(manager.interface.set(Arc::downgrade(&interface)).is_ok());

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = {
            let interface = Arc::clone(&interface);
            std::thread::spawn(move || {
                interface.start().unwrap();
                interface.stop();
                let _ = done_tx.send(());
            })
        };
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("lifecycle blocked inside a manager callback");
        worker.join().unwrap();

        assert_eq!(
            *manager.seen.lock(),
            vec![InterfaceState::NotReady, InterfaceState::NotReady]
        );
        assert_eq!(interface.state(), InterfaceState::NotReady);
    }

    #[test]
    fn stop_on_never_started_interface_is_noop() {
        let (interface, manager) = bound(Interface::subscriber("odom", middleware()));
        interface.stop();
        assert!(manager.unregistered().is_empty());
        assert_eq!(interface.state(), InterfaceState::NotReady);
    }

    #[test]
    fn stop_tears_down_and_unregisters() {
        let mw = middleware();
        let (interface, manager) = bound(Interface::subscriber("odom", dyn_mw(&mw)));
        interface.start().unwrap();
        interface.stop();

        assert_eq!(interface.state(), InterfaceState::NotReady);
        assert_eq!(manager.unregistered(), vec![interface.info()]);
        assert_eq!(mw.open_handles(), 0);
    }

    #[test]
    fn rejected_registration_rolls_back() {
        let mw = middleware();
        let interface = Interface::publisher("camera/image", dyn_mw(&mw));
        interface.register_manager(Arc::new(RejectingManager)).unwrap();

        assert!(interface.start().is_err());
        assert_eq!(interface.state(), InterfaceState::NotReady);
        assert_eq!(mw.open_handles(), 0);
    }

    /// The operations require the `Ready` state: refused before `start`,
    /// accepted after it, refused again after `stop`.
    #[test]
    fn data_path_requires_ready_state() {
        let mw = middleware();
        let (interface, manager) = bound(service(Arc::clone(&mw)));

        let err = interface.send(b"req".to_vec()).unwrap_err();
        assert!(matches!(err, InterfaceError::Internal(ref m) if m.contains("not ready")));
        let err = interface.receive(Some(&TaskId::new_random())).unwrap_err();
        assert!(matches!(err, InterfaceError::Internal(ref m) if m.contains("not ready")));

        interface.start().unwrap();
        let token = interface.send(b"req".to_vec()).unwrap().unwrap();
        assert_eq!(interface.receive(Some(&token)).unwrap(), None);
        manager.run_all();
        assert_eq!(interface.receive(Some(&token)).unwrap(), Some(b"req".to_vec()));

        interface.stop();
        assert!(interface.send(b"req".to_vec()).is_err());
        assert!(interface.receive(Some(&token)).is_err());
    }

    #[test]
    fn publisher_send_returns_no_token() {
        let mw = middleware();
        let (interface, _manager) = bound(Interface::publisher("camera/image", dyn_mw(&mw)));
        interface.start().unwrap();
        assert_eq!(interface.send(b"frame".to_vec()).unwrap(), None);
        assert_eq!(mw.published(), vec![b"frame".to_vec()]);
    }

    #[test]
    fn unsupported_operations_fail_fast() {
        let (publisher, _m1) = bound(Interface::publisher("camera/image", middleware()));
        let (subscriber, _m2) = bound(Interface::subscriber("odom", middleware()));
        publisher.start().unwrap();
        subscriber.start().unwrap();

        assert!(matches!(
            publisher.receive(None),
            Err(InterfaceError::UnsupportedOperation { operation: Operation::Receive, .. })
        ));
        assert!(matches!(
            subscriber.send(b"x".to_vec()),
            Err(InterfaceError::UnsupportedOperation { operation: Operation::Send, .. })
        ));
    }

    #[test]
    fn unsupported_beats_not_ready() {
        let subscriber = Interface::subscriber("odom", middleware());
        assert!(matches!(
            subscriber.send(b"x".to_vec()),
            Err(InterfaceError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn subscriber_receive_ignores_token() {
        let mw = middleware();
        let (interface, _manager) = bound(Interface::subscriber("odom", dyn_mw(&mw)));
        interface.start().unwrap();
        assert_eq!(interface.receive(None).unwrap(), None);

        mw.deliver(b"A");
        mw.deliver(b"B");
        assert_eq!(interface.receive(None).unwrap(), Some(b"B".to_vec()));
        assert_eq!(
            interface.receive(Some(&TaskId::new_random())).unwrap(),
            Some(b"B".to_vec())
        );
    }

    #[test]
    fn service_receive_without_token_fails() {
        let (interface, _manager) = bound(service(middleware()));
        interface.start().unwrap();
        assert!(matches!(interface.receive(None), Err(InterfaceError::Internal(_))));
    }

    #[test]
    fn descriptor_roundtrip_publisher() {
        let data = descriptor::encode_name("camera/image").unwrap();
        let interface = Interface::publisher_from_descriptor(&data, middleware()).unwrap();
        assert_eq!(interface.name(), "camera/image");
        assert_eq!(interface.kind(), InterfaceKind::Publisher);
        assert_eq!(interface.descriptor().unwrap(), data);
    }

    #[test]
    fn descriptor_roundtrip_service() {
        let data = descriptor::encode_service("arm/grasp", "pkg/GraspSrv").unwrap();
        let interface =
            Interface::service_from_descriptor(&data, middleware(), ServiceOptions::default())
                .unwrap();
        assert_eq!(interface.name(), "arm/grasp");
        assert_eq!(interface.as_service().map(|s| s.service_type()), Some("pkg/GraspSrv"));
        assert_eq!(interface.descriptor().unwrap(), data);
    }

    #[test]
    fn malformed_descriptor_is_a_serialization_error() {
        let result = Interface::subscriber_from_descriptor(&[0, 0, 0, 9, b'x'], middleware());
        assert!(matches!(result, Err(InterfaceError::Serialization(_))));
    }

    #[test]
    fn unresolvable_service_type_in_descriptor() {
        let data = descriptor::encode_service("arm/grasp", "bogus type").unwrap();
        let result =
            Interface::service_from_descriptor(&data, middleware(), ServiceOptions::default());
        assert!(matches!(result, Err(InterfaceError::Serialization(_))));
    }
}
