//! # proact — proactor-style asynchronous I/O execution runtime
//!
//! A reactor/proactor core that multiplexes operation completions and
//! timer expiry onto the threads that call its run loop, with
//! work-counted auto-stop, pluggable per-context services, and a
//! thread-pool system executor for arbitrary deferred work.
//!
//! ## Quick Start
//!
//! ```ignore
//! use proact::{IoContext, OpRecord};
//! use std::time::{Duration, Instant};
//!
//! let ctx = IoContext::new()?;
//!
//! // Arm a timer: its callback runs through the same dispatch path
//! // as genuine I/O completions.
//! ctx.start_work();
//! ctx.schedule_timer(
//!     Instant::now() + Duration::from_millis(50),
//!     OpRecord::new(|status, _bytes| {
//!         assert_eq!(status, 0);
//!         println!("timer fired");
//!     }),
//! )?;
//!
//! // Dispatch until the work counter hits zero and the context stops.
//! ctx.run()?;
//! ```
//!
//! ## Layout
//!
//! - [`proact_core`] — operation records, the completion port contract,
//!   service traits, errors.
//! - [`proact_module`] — default ports: portable [`QueuePort`], Linux
//!   epoll-based `EventPort`.
//! - [`proact_runtime`] — [`IoContext`], [`ExecutionContext`],
//!   [`ThreadPool`] and the [`SystemExecutor`].

pub use proact_core::error::{PortError, Result};
pub use proact_core::port::{CompletionPort, Delivery};
pub use proact_core::record::{split_result, OpRecord};
pub use proact_core::service::{ForkEvent, Service};

pub use proact_module::QueuePort;
#[cfg(target_os = "linux")]
pub use proact_module::EventPort;
pub use proact_module::default_port;

pub use proact_runtime::{
    ExecutionContext, IoConfig, IoContext, PoolStopped, ServiceRegistry, SystemContext,
    SystemExecutor, ThreadPool, TimerQueue, WorkGuard,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_end_to_end_timer_dispatch() {
        let ctx = IoContext::new().expect("default port");
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = Arc::clone(&hits);
        ctx.start_work();
        ctx.schedule_timer(
            Instant::now() + Duration::from_millis(20),
            OpRecord::new(move |status, _| {
                assert_eq!(status, 0);
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert_eq!(ctx.run().unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(ctx.stopped());
    }
}
