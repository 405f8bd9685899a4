//! `QueuePort` — portable `CompletionPort` implementation.
//!
//! An in-process delivery queue guarded by a mutex/condvar pair.
//! Backends (or tests) inject primitive-sourced completions through
//! [`QueuePort::complete`]; the runtime posts synthetic completions and
//! wakes through the trait methods. Every posted item is handed to
//! exactly one waiter, in post order.
//!
//! No OS multiplexer is involved, so `associate` is a no-op: transports
//! built over this port deliver their completions with `complete`.

use proact_core::error::{PortError, Result};
use proact_core::port::{CompletionPort, Delivery};
use proact_core::record::OpRecord;

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A posted-but-undelivered item.
enum Posted {
    Op {
        record: Arc<OpRecord>,
        result: Option<i64>,
    },
    Wake,
    Stop,
}

struct QueueState {
    items: VecDeque<Posted>,
    closed: bool,
}

pub struct QueuePort {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl QueuePort {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Deliver a primitive-sourced completion: the backend produced
    /// `result` (bytes transferred, or negated errno).
    pub fn complete(&self, record: Arc<OpRecord>, result: i64) -> Result<()> {
        self.push(Posted::Op {
            record,
            result: Some(result),
        })
    }

    fn push(&self, item: Posted) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(PortError::Closed);
        }
        state.items.push_back(item);
        drop(state);
        self.cond.notify_one();
        Ok(())
    }
}

impl Default for QueuePort {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionPort for QueuePort {
    fn associate(&self, _fd: RawFd) -> Result<()> {
        // Nothing to register: completions arrive via `complete`.
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Delivery> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(PortError::Closed);
            }
            if let Some(item) = state.items.pop_front() {
                return Ok(match item {
                    Posted::Op { record, result } => Delivery::Op { record, result },
                    Posted::Wake => Delivery::Wake,
                    Posted::Stop => Delivery::Stop,
                });
            }
            state = match deadline {
                None => self.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Delivery::TimedOut);
                    }
                    let (guard, _timed_out) = self
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    guard
                }
            };
        }
    }

    fn post(&self, record: Arc<OpRecord>) -> Result<()> {
        self.push(Posted::Op {
            record,
            result: None,
        })
    }

    fn post_wake(&self) -> Result<()> {
        self.push(Posted::Wake)
    }

    fn post_stop(&self) -> Result<()> {
        self.push(Posted::Stop)
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.items.clear();
        drop(state);
        self.cond.notify_all();
    }
}
