//! # proact-module — default `CompletionPort` implementations
//!
//! Two ports ship here:
//!
//! - [`QueuePort`]: a portable in-process delivery queue (mutex +
//!   condvar). Works on every platform and is fully deterministic,
//!   which also makes it the port the runtime's tests drive.
//!
//! - [`EventPort`] (Linux): epoll + eventfd. Posted items travel a
//!   lock-free queue and the eventfd unblocks one `epoll_wait`er;
//!   readiness on associated transport handles surfaces as wake
//!   deliveries for the owning transport service to act on.
//!
//! [`default_port`] picks the platform's preferred backend.

pub mod queue_port;
pub use queue_port::QueuePort;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod event_port;
        pub use event_port::EventPort;
    }
}

use proact_core::error::Result;
use proact_core::port::CompletionPort;
use std::sync::Arc;

/// Create the platform's default completion port.
///
/// Linux gets the epoll-backed [`EventPort`]; everything else falls
/// back to the portable [`QueuePort`].
pub fn default_port() -> Result<Arc<dyn CompletionPort>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(EventPort::new()?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(Arc::new(QueuePort::new()))
    }
}
