//! Service lifecycle traits.
//!
//! A service is a pluggable capability owned by an execution context:
//! a socket service, a resolver service, a timer service. Each service
//! type has at most one instance per context, created lazily on first
//! use and torn down by the context in a defined order.

/// Phase of a process fork, as seen by services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkEvent {
    /// About to fork. Delivered in reverse registration order so
    /// dependent services pause before the services they depend on.
    Prepare,
    /// Fork returned in the parent. Forward registration order.
    Parent,
    /// Fork returned in the child. Forward registration order.
    Child,
}

/// A pluggable capability owned by an execution context.
///
/// `shutdown` releases external resources (threads, descriptors,
/// pending handlers). It must not panic outward and must not register
/// new services — teardown has already begun. The registry catches and
/// logs a panicking shutdown so the remaining services still tear down.
pub trait Service: Send + Sync + 'static {
    /// Release external resources. Called exactly once per service,
    /// before the registry drops its ownership.
    fn shutdown(&self);

    /// Observe a fork phase. Default: ignore.
    fn notify_fork(&self, _event: ForkEvent) {}
}
