//! Execution contexts and the service registry.
//!
//! An `ExecutionContext` is the root lifetime owner for a runtime: it
//! owns zero or more typed services, created lazily on first use, torn
//! down in a defined order. Service identity is the Rust type — at most
//! one instance of each service type lives in a context.
//!
//! Teardown is two-phase: `shutdown` releases external resources while
//! every service is still alive (so services may still talk to each
//! other), then `destroy` drops ownership. Both are idempotent and both
//! run from `Drop`.

use proact_core::rt_warn;
use proact_core::service::{ForkEvent, Service};

use std::any::{Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// One registered service. `any` and `service` are the same `Arc<T>`
/// under two vtables: one for typed retrieval, one for lifecycle calls.
struct ServiceEntry {
    id: TypeId,
    any: Arc<dyn Any + Send + Sync>,
    service: Arc<dyn Service>,
}

struct RegistryState {
    /// Insertion order = first-use order; fork and teardown ordering
    /// are defined relative to it.
    entries: Vec<ServiceEntry>,
    shut_down: bool,
    destroyed: bool,
}

/// Ordered collection of lazily-created services.
pub struct ServiceRegistry {
    state: Mutex<RegistryState>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: Vec::new(),
                shut_down: false,
                destroyed: false,
            }),
        }
    }

    /// Get the service of type `T`, creating it with `Default` on first
    /// use.
    pub fn use_service<T: Service + Default>(&self) -> Arc<T> {
        self.use_service_with(T::default)
    }

    /// Get the service of type `T`, creating it with `make` on first
    /// use. The factory runs without the registry lock held, so a
    /// service may itself pull in the services it depends on.
    pub fn use_service_with<T: Service>(&self, make: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.find::<T>() {
            return existing;
        }

        let created = Arc::new(make());

        let mut state = self.state.lock().unwrap();
        // Another thread (or the factory itself) may have registered T
        // in the window where the lock was released.
        if let Some(entry) = state.entries.iter().find(|e| e.id == TypeId::of::<T>()) {
            return downcast::<T>(&entry.any);
        }
        if state.shut_down {
            // Contract violation: services must not appear during
            // teardown. Hand the instance back unregistered so it at
            // least cannot dangle in a dying registry.
            rt_warn!("service-registry: use_service during shutdown; service not registered");
            return created;
        }
        state.entries.push(ServiceEntry {
            id: TypeId::of::<T>(),
            any: created.clone(),
            service: created.clone(),
        });
        created
    }

    /// Look up an already-registered service without creating it.
    pub fn find<T: Service>(&self) -> Option<Arc<T>> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .iter()
            .find(|e| e.id == TypeId::of::<T>())
            .map(|e| downcast::<T>(&e.any))
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Shut every service down, exactly once, in insertion order.
    ///
    /// A panicking service is caught and logged; teardown continues so
    /// the remaining services still release their resources.
    pub fn shutdown_services(&self) {
        let services: Vec<Arc<dyn Service>> = {
            let mut state = self.state.lock().unwrap();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.entries.iter().map(|e| e.service.clone()).collect()
        };

        for service in services {
            if catch_unwind(AssertUnwindSafe(|| service.shutdown())).is_err() {
                rt_warn!("service-registry: service shutdown panicked; continuing teardown");
            }
        }
    }

    /// Release ownership of every service, exactly once, in reverse
    /// insertion order. Call `shutdown_services` first for clean
    /// teardown.
    pub fn destroy_services(&self) {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        while state.entries.pop().is_some() {}
    }

    /// Deliver a fork phase to every service: `Prepare` in reverse
    /// insertion order (dependents pause before their dependencies),
    /// `Parent`/`Child` in forward order.
    pub fn notify_fork(&self, event: ForkEvent) {
        let services: Vec<Arc<dyn Service>> = {
            let state = self.state.lock().unwrap();
            match event {
                ForkEvent::Prepare => state
                    .entries
                    .iter()
                    .rev()
                    .map(|e| e.service.clone())
                    .collect(),
                ForkEvent::Parent | ForkEvent::Child => {
                    state.entries.iter().map(|e| e.service.clone()).collect()
                }
            }
        };

        for service in services {
            service.notify_fork(event);
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast<T: Service>(any: &Arc<dyn Any + Send + Sync>) -> Arc<T> {
    Arc::clone(any)
        .downcast::<T>()
        .unwrap_or_else(|_| unreachable!("service registered under mismatched TypeId"))
}

/// Root lifetime owner for a runtime: one service registry plus the
/// shutdown-then-destroy teardown contract.
pub struct ExecutionContext {
    registry: ServiceRegistry,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            registry: ServiceRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Get-or-create the service of type `T`.
    pub fn use_service<T: Service + Default>(&self) -> Arc<T> {
        self.registry.use_service::<T>()
    }

    /// Get-or-create the service of type `T` with an explicit factory.
    pub fn use_service_with<T: Service>(&self, make: impl FnOnce() -> T) -> Arc<T> {
        self.registry.use_service_with(make)
    }

    /// Shut all services down. Idempotent; always precedes `destroy`.
    pub fn shutdown(&self) {
        self.registry.shutdown_services();
    }

    /// Release service ownership. Idempotent.
    pub fn destroy(&self) {
        self.registry.destroy_services();
    }

    /// Forward a fork phase to the services (ordering per phase).
    pub fn notify_fork(&self, event: ForkEvent) {
        self.registry.notify_fork(event);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.shutdown();
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends its tag to a shared journal on every lifecycle call.
    struct JournalService {
        tag: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Service for JournalService {
        fn shutdown(&self) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("shutdown:{}", self.tag));
        }

        fn notify_fork(&self, event: ForkEvent) {
            let phase = match event {
                ForkEvent::Prepare => "prepare",
                ForkEvent::Parent => "parent",
                ForkEvent::Child => "child",
            };
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", phase, self.tag));
        }
    }

    #[derive(Default)]
    struct CounterService {
        shutdowns: AtomicUsize,
    }

    impl Service for CounterService {
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ServiceA(JournalService);
    struct ServiceB(JournalService);
    struct ServiceC(JournalService);

    impl Service for ServiceA {
        fn shutdown(&self) {
            self.0.shutdown()
        }
        fn notify_fork(&self, event: ForkEvent) {
            self.0.notify_fork(event)
        }
    }
    impl Service for ServiceB {
        fn shutdown(&self) {
            self.0.shutdown()
        }
        fn notify_fork(&self, event: ForkEvent) {
            self.0.notify_fork(event)
        }
    }
    impl Service for ServiceC {
        fn shutdown(&self) {
            self.0.shutdown()
        }
        fn notify_fork(&self, event: ForkEvent) {
            self.0.notify_fork(event)
        }
    }

    fn journal_context(journal: &Arc<Mutex<Vec<String>>>) -> ExecutionContext {
        let ctx = ExecutionContext::new();
        let j = Arc::clone(journal);
        ctx.use_service_with(|| {
            ServiceA(JournalService {
                tag: "A",
                journal: j,
            })
        });
        let j = Arc::clone(journal);
        ctx.use_service_with(|| {
            ServiceB(JournalService {
                tag: "B",
                journal: j,
            })
        });
        let j = Arc::clone(journal);
        ctx.use_service_with(|| {
            ServiceC(JournalService {
                tag: "C",
                journal: j,
            })
        });
        ctx
    }

    #[test]
    fn test_use_service_returns_same_instance() {
        let ctx = ExecutionContext::new();
        let first = ctx.use_service::<CounterService>();
        let second = ctx.use_service::<CounterService>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.registry().service_count(), 1);
    }

    #[test]
    fn test_shutdown_visits_each_service_once() {
        let ctx = ExecutionContext::new();
        let svc = ctx.use_service::<CounterService>();
        ctx.shutdown();
        ctx.shutdown();
        assert_eq!(svc.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_order_is_insertion_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let ctx = journal_context(&journal);
        ctx.shutdown();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["shutdown:A", "shutdown:B", "shutdown:C"]
        );
    }

    #[test]
    fn test_fork_prepare_reverse_child_forward() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let ctx = journal_context(&journal);

        ctx.notify_fork(ForkEvent::Prepare);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["prepare:C", "prepare:B", "prepare:A"]
        );

        journal.lock().unwrap().clear();
        ctx.notify_fork(ForkEvent::Child);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["child:A", "child:B", "child:C"]
        );

        journal.lock().unwrap().clear();
        ctx.notify_fork(ForkEvent::Parent);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["parent:A", "parent:B", "parent:C"]
        );
    }

    #[test]
    fn test_drop_runs_shutdown_then_destroy() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        {
            let _ctx = journal_context(&journal);
        }
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["shutdown:A", "shutdown:B", "shutdown:C"]
        );
    }

    #[test]
    fn test_panicking_shutdown_does_not_block_others() {
        struct PanickyService;
        impl Service for PanickyService {
            fn shutdown(&self) {
                panic!("cannot shut down cleanly");
            }
        }

        proact_core::rlog::set_log_level(proact_core::rlog::LogLevel::Off);
        let ctx = ExecutionContext::new();
        ctx.use_service_with(|| PanickyService);
        let counter = ctx.use_service::<CounterService>();
        ctx.shutdown();
        assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_use_service_during_shutdown_not_registered() {
        proact_core::rlog::set_log_level(proact_core::rlog::LogLevel::Off);
        let ctx = ExecutionContext::new();
        ctx.shutdown();
        let _svc = ctx.use_service::<CounterService>();
        assert_eq!(ctx.registry().service_count(), 0);
    }

    #[test]
    fn test_destroy_without_shutdown_is_safe() {
        let ctx = ExecutionContext::new();
        ctx.use_service::<CounterService>();
        ctx.destroy();
        assert_eq!(ctx.registry().service_count(), 0);
    }
}
