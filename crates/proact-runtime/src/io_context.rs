//! `IoContext` — the proactor core.
//!
//! An `IoContext` owns one completion port and runs the dispatch loop
//! that delivers operation completions to their callbacks. Multiple
//! threads may call the run methods concurrently on the same context;
//! each call dispatches at most one completion before returning.
//!
//! Completions reach the loop from three sources and are
//! indistinguishable to callers:
//!
//! - the port itself (genuine I/O finished by the OS multiplexer),
//! - the deferred queue (operations satisfied synchronously and
//!   injected with [`IoContext::post`]),
//! - the timer queue (deadlines armed with
//!   [`IoContext::schedule_timer`], merged into the deferred queue as
//!   they elapse).
//!
//! The outstanding-work counter decides quiescence: when it reaches
//! zero the context stops itself and every runner unblocks. The
//! one-shot claim on each record guarantees a completion is dispatched
//! by exactly one thread even when the port path and the deferred path
//! race for the same operation.

use crate::config::IoConfig;
use crate::context::ExecutionContext;
use crate::timer_queue::TimerQueue;

use proact_core::error::Result;
use proact_core::port::{CompletionPort, Delivery};
use proact_core::record::OpRecord;
use proact_core::rt_warn;
use proact_core::service::Service;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sentinel in the earliest-timer cache: no timer armed.
const NO_DEADLINE: u64 = u64::MAX;

/// State guarded by the dispatch mutex. The lock is held only for the
/// drain-and-merge step, never across the blocking wait.
struct DispatchState {
    deferred: VecDeque<Arc<OpRecord>>,
    timers: TimerQueue,
}

/// A runnable execution context multiplexing completions onto the
/// threads that call its run methods.
pub struct IoContext {
    context: ExecutionContext,
    port: Arc<dyn CompletionPort>,
    /// Operations accepted but not yet completed. Zero means quiescent.
    outstanding_work: AtomicUsize,
    stopped: AtomicBool,
    /// Deduplicates stop deliveries: at most one is ever in flight.
    stop_posted: AtomicBool,
    /// Deferred work (posted completions, freshly armed timers) needs a
    /// dispatch pass.
    dispatch_required: AtomicBool,
    /// Earliest armed timer as nanos since `epoch`; `NO_DEADLINE` when
    /// none. Lets the loop bound its wait without taking the dispatch
    /// lock.
    next_timer_ns: AtomicU64,
    dispatch: Mutex<DispatchState>,
    epoch: Instant,
    concurrency_hint: usize,
    poll_interval: Duration,
}

impl IoContext {
    /// Create a context over the platform's default completion port.
    pub fn new() -> Result<Self> {
        Self::with_config(IoConfig::from_env())
    }

    /// Create a context over the platform's default completion port
    /// with explicit configuration.
    pub fn with_config(config: IoConfig) -> Result<Self> {
        Ok(Self::with_port(proact_module::default_port()?, config))
    }

    /// Create a context over a caller-supplied completion port.
    pub fn with_port(port: Arc<dyn CompletionPort>, config: IoConfig) -> Self {
        Self {
            context: ExecutionContext::new(),
            port,
            outstanding_work: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            stop_posted: AtomicBool::new(false),
            dispatch_required: AtomicBool::new(false),
            next_timer_ns: AtomicU64::new(NO_DEADLINE),
            dispatch: Mutex::new(DispatchState {
                deferred: VecDeque::new(),
                timers: TimerQueue::new(),
            }),
            epoch: Instant::now(),
            concurrency_hint: config.concurrency_hint,
            poll_interval: config.poll_interval,
        }
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Get-or-create the service of type `T` on the owned context.
    pub fn use_service<T: Service + Default>(&self) -> Arc<T> {
        self.context.use_service::<T>()
    }

    /// Get-or-create with an explicit factory.
    pub fn use_service_with<T: Service>(&self, make: impl FnOnce() -> T) -> Arc<T> {
        self.context.use_service_with(make)
    }

    /// The completion port this context dispatches from. Transports
    /// associate their handles and submit operations here.
    pub fn port(&self) -> &Arc<dyn CompletionPort> {
        &self.port
    }

    /// Advisory number of threads expected to run this context.
    pub fn concurrency_hint(&self) -> usize {
        self.concurrency_hint
    }

    // ── Work tracking ────────────────────────────────────────────────

    /// Record one accepted asynchronous operation. Every `start_work`
    /// must be balanced by exactly one `finish_work` (the dispatch loop
    /// performs it when the operation's callback has run).
    pub fn start_work(&self) {
        self.outstanding_work.fetch_add(1, Ordering::AcqRel);
    }

    /// Balance one `start_work`. Reaching zero stops the context.
    pub fn finish_work(&self) {
        if self.outstanding_work.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stop();
        }
    }

    /// Current outstanding-work count.
    pub fn outstanding_work(&self) -> usize {
        self.outstanding_work.load(Ordering::Acquire)
    }

    /// Keep the context non-quiescent for the guard's lifetime.
    pub fn work(&self) -> WorkGuard<'_> {
        self.start_work();
        WorkGuard { ctx: self }
    }

    // ── Completion injection ─────────────────────────────────────────

    /// Inject a locally-satisfied completion. The record's result slot
    /// must already hold the outcome; the callback runs on whichever
    /// thread's dispatch pass picks the record up, exactly as if the
    /// port had produced it. Work accounting stays with the initiator:
    /// this does not touch the counter.
    pub fn post(&self, record: Arc<OpRecord>) -> Result<()> {
        {
            let mut state = self.dispatch.lock().unwrap();
            state.deferred.push_back(record);
        }
        self.request_dispatch()
    }

    /// Arm a timer: `record` completes with status 0 once `deadline`
    /// elapses. Does not touch the work counter (the initiator holds
    /// the start/finish pair).
    pub fn schedule_timer(&self, deadline: Instant, record: Arc<OpRecord>) -> Result<()> {
        {
            let mut state = self.dispatch.lock().unwrap();
            state.timers.insert(deadline, record);
        }
        self.next_timer_ns
            .fetch_min(self.instant_ns(deadline), Ordering::AcqRel);
        self.request_dispatch()
    }

    /// Flag deferred work and wake one waiter, deduplicated: only the
    /// transition into "dispatch required" posts a wake.
    fn request_dispatch(&self) -> Result<()> {
        if !self.dispatch_required.swap(true, Ordering::AcqRel) {
            self.port.post_wake()?;
        }
        Ok(())
    }

    // ── Stop / restart ───────────────────────────────────────────────

    /// Stop the context. Idempotent; posts at most one stop delivery so
    /// blocked runners unwind without a wake storm.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.post_stop_event();
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Permit a new run cycle after a stop. The caller must ensure no
    /// thread is still inside a run method.
    pub fn restart(&self) {
        self.stopped.store(false, Ordering::Release);
        self.stop_posted.store(false, Ordering::Release);
    }

    fn post_stop_event(&self) {
        if !self.stop_posted.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.port.post_stop() {
                rt_warn!("io-context: stop delivery failed: {}", e);
            }
        }
    }

    // ── Run methods ──────────────────────────────────────────────────

    /// Dispatch completions until the context stops or runs out of
    /// work. Returns the number of completions dispatched.
    pub fn run(&self) -> Result<usize> {
        let mut n = 0;
        while self.run_one(None)? == 1 {
            n += 1;
        }
        Ok(n)
    }

    /// Dispatch at most one completion, blocking up to `timeout`
    /// (`None` = until one arrives or the context stops). Returns 1 if
    /// a completion was dispatched, 0 on stop, quiescence, or timeout.
    pub fn run_one(&self, timeout: Option<Duration>) -> Result<usize> {
        if self.outstanding_work() == 0 {
            self.stop();
            return Ok(0);
        }
        if self.stopped() {
            return Ok(0);
        }
        self.do_one(timeout)
    }

    /// Dispatch ready completions without blocking. Returns the number
    /// dispatched.
    pub fn poll(&self) -> Result<usize> {
        let mut n = 0;
        while self.poll_one()? == 1 {
            n += 1;
        }
        Ok(n)
    }

    /// Dispatch at most one already-ready completion without blocking.
    pub fn poll_one(&self) -> Result<usize> {
        if self.outstanding_work() == 0 {
            self.stop();
            return Ok(0);
        }
        if self.stopped() {
            return Ok(0);
        }
        self.do_one(Some(Duration::ZERO))
    }

    /// The dispatch loop. One call dispatches at most one completion.
    fn do_one(&self, timeout: Option<Duration>) -> Result<usize> {
        let caller_deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if self.stopped() {
                return Ok(0);
            }

            let now = Instant::now();

            // Elapsed timers require a merge pass even when nothing was
            // posted since the wait began.
            if self.timer_due(now) {
                self.dispatch_required.store(true, Ordering::Release);
            }

            // Compare-and-clear: exactly one thread runs the merge for
            // a given arming of the flag.
            if self.dispatch_required.swap(false, Ordering::AcqRel) {
                self.flush_deferred(now)?;
            }

            match self.port.wait(self.wait_budget(caller_deadline))? {
                Delivery::Op { record, result } => {
                    // Synthetic deliveries carry their outcome in the
                    // record's own slot.
                    let result = result.unwrap_or_else(|| record.result());
                    if record.claim() {
                        record.invoke(result);
                        self.finish_work();
                        return Ok(1);
                    }
                    // Lost the claim: the other delivery path already
                    // ran this operation. Hands off the record.
                }
                Delivery::Wake => {
                    // Re-check deferred work at the top of the loop.
                }
                Delivery::Stop => {
                    if self.stopped() {
                        self.stop_posted.store(false, Ordering::Release);
                        if self.outstanding_work() != 0 {
                            // Pass the baton so sibling runners blocked
                            // on the port also observe the stop.
                            self.post_stop_event();
                        }
                        return Ok(0);
                    }
                    // Stale delivery from before a restart.
                }
                Delivery::TimedOut => {
                    if let Some(deadline) = caller_deadline {
                        if Instant::now() >= deadline {
                            return Ok(0);
                        }
                    }
                    // Internal poll interval expired on an unbounded
                    // wait; not a caller-visible timeout.
                }
            }
        }
    }

    /// Merge elapsed timers into the deferred queue and funnel every
    /// deferred record through the port, so all three completion
    /// sources share one delivery path.
    fn flush_deferred(&self, now: Instant) -> Result<()> {
        let mut state = self.dispatch.lock().unwrap();

        let ready = state.timers.drain_ready(now);
        for record in ready {
            state.deferred.push_back(record);
        }
        self.next_timer_ns.store(
            state
                .timers
                .next_deadline()
                .map_or(NO_DEADLINE, |d| self.instant_ns(d)),
            Ordering::Release,
        );

        while let Some(record) = state.deferred.pop_front() {
            if let Err(e) = self.port.post(Arc::clone(&record)) {
                // Keep the record queued; a later pass retries.
                state.deferred.push_front(record);
                self.dispatch_required.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Upper bound for the next blocking wait: the caller's remaining
    /// budget, the earliest armed timer, and the internal poll interval,
    /// whichever is closest.
    fn wait_budget(&self, caller_deadline: Option<Instant>) -> Option<Duration> {
        let now = Instant::now();
        let mut wait = self.poll_interval;
        if let Some(deadline) = caller_deadline {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        let timer_ns = self.next_timer_ns.load(Ordering::Acquire);
        if timer_ns != NO_DEADLINE {
            let timer_deadline = self.epoch + Duration::from_nanos(timer_ns);
            wait = wait.min(timer_deadline.saturating_duration_since(now));
        }
        Some(wait)
    }

    fn timer_due(&self, now: Instant) -> bool {
        let ns = self.next_timer_ns.load(Ordering::Acquire);
        ns != NO_DEADLINE && self.instant_ns(now) >= ns
    }

    fn instant_ns(&self, t: Instant) -> u64 {
        t.saturating_duration_since(self.epoch)
            .as_nanos()
            .min((NO_DEADLINE - 1) as u128) as u64
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        // Services shut down while the port is still usable, then the
        // port itself closes. Destroy runs from the context's own Drop.
        self.context.shutdown();
        self.port.shutdown();
    }
}

/// RAII work registration: holds one unit of outstanding work.
pub struct WorkGuard<'a> {
    ctx: &'a IoContext,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.ctx.finish_work();
    }
}
