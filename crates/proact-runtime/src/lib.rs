//! # proact-runtime — execution contexts and the proactor dispatch loop
//!
//! The runtime that drives the `proact-core` traits: execution contexts
//! owning typed services, the `IoContext` completion-dispatch engine,
//! and the thread-pool system executor.
//!
//! # Architecture
//!
//! ```text
//!   initiators (transports, timer services, callers)
//!        │ start_work + submit / post / schedule_timer
//!        ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ IoContext                                    │
//!   │   deferred queue ─┐                          │
//!   │   timer queue ────┼─ merge ──► CompletionPort│
//!   │                   │              │ wait()    │
//!   │   run_one/poll_one ◄─ one delivery ─┘        │
//!   │        │ claim → callback → finish_work      │
//!   └────────┼─────────────────────────────────────┘
//!            ▼
//!   work counter hits zero ──► auto-stop, runners unblock
//! ```
//!
//! Any number of threads may call `run_one`/`poll_one` concurrently;
//! each call dispatches at most one completion. The `ExecutionContext`
//! half owns services with ordered shutdown/destroy and fork
//! notification; the `ThreadPool`/`SystemExecutor` half offers a
//! default home for arbitrary deferred work.

pub mod config;
pub mod context;
pub mod io_context;
pub mod thread_pool;
pub mod timer_queue;

pub use config::IoConfig;
pub use context::{ExecutionContext, ServiceRegistry};
pub use io_context::{IoContext, WorkGuard};
pub use thread_pool::{PoolStopped, SystemContext, SystemExecutor, ThreadPool};
pub use timer_queue::TimerQueue;
