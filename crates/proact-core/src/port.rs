//! Completion port abstraction.
//!
//! A `CompletionPort` is the OS-multiplexer boundary of the runtime:
//! it accepts posted completions and wake requests from any thread, and
//! delivers them one at a time to threads blocked in [`wait`].
//!
//! The contract is satisfiable by a completion-port (IOCP), an
//! event-polling (epoll/kqueue), or a kernel-queue (io_uring) backend;
//! nothing here fixes a wire format.
//!
//! # Implementors
//!
//! - `QueuePort` (proact-module, default): portable in-process delivery
//!   queue guarded by a mutex/condvar pair. Works everywhere; the port
//!   every unit test drives.
//!
//! - `EventPort` (proact-module, Linux): epoll + eventfd. Posted items
//!   travel a lock-free queue; the eventfd unblocks one `epoll_wait`er.
//!
//! [`wait`]: CompletionPort::wait

use crate::error::Result;
use crate::record::OpRecord;

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// One delivery from the port.
#[derive(Debug)]
pub enum Delivery {
    /// An operation completed. `result` is `Some` when the backend
    /// produced the value (genuine I/O), `None` for a result-bearing
    /// synthetic completion — the dispatcher decodes the record's own
    /// result slot instead. Callers of the runtime cannot observe the
    /// difference: both arrive through the same callback path.
    Op {
        record: Arc<OpRecord>,
        result: Option<i64>,
    },
    /// Wake-only delivery: no operation attached, posted purely to
    /// unblock one waiting thread so it re-checks deferred work.
    Wake,
    /// Stop delivery: the context is shutting its run loop down.
    Stop,
    /// The wait timed out with nothing delivered.
    TimedOut,
}

/// Multiplexes completions onto waiting threads.
///
/// **Contract:**
/// - `wait` blocks up to `timeout` (`None` = unbounded) and returns
///   exactly one delivery. Each posted item is delivered to exactly one
///   waiter.
/// - `post`, `post_wake`, and `post_stop` never block and are safe from
///   any thread, including from inside a completion callback.
/// - After `shutdown`, `wait` and the post methods fail with
///   `PortError::Closed`; deliveries already queued may be dropped.
pub trait CompletionPort: Send + Sync {
    /// Register a transport handle so its completions surface through
    /// this port. How readiness maps to deliveries is backend-specific.
    fn associate(&self, fd: RawFd) -> Result<()>;

    /// Block up to `timeout` for one delivery.
    fn wait(&self, timeout: Option<Duration>) -> Result<Delivery>;

    /// Post a result-bearing synthetic completion. The record's result
    /// slot must already hold the outcome.
    fn post(&self, record: Arc<OpRecord>) -> Result<()>;

    /// Unblock exactly one waiter with [`Delivery::Wake`].
    fn post_wake(&self) -> Result<()>;

    /// Unblock exactly one waiter with [`Delivery::Stop`].
    fn post_stop(&self) -> Result<()>;

    /// Release the port. Blocked waiters are woken with an error;
    /// subsequent calls fail.
    fn shutdown(&self);
}
