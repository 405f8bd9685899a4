//! Operation records — the unit of in-flight asynchronous work.
//!
//! An `OpRecord` represents one pending asynchronous action: a one-shot
//! ready guard, a result slot, and an owned completion callback. Records
//! are shared as `Arc<OpRecord>` between the completion port and the
//! deferred-completion path; whichever side wins the claim runs the
//! callback. The loser must not touch the record again.
//!
//! The result slot uses a single `i64` for the whole outcome:
//! non-negative values are transferred byte counts, negative values are
//! negated errno codes. This is the same convention the completion ports
//! speak, so a result can flow from backend to callback without
//! re-encoding.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

/// Completion callback, invoked with (status, transferred bytes).
/// Status 0 means success; a negative status is a negated errno.
pub type CompleteFn = Box<dyn FnOnce(i32, usize) + Send>;

/// Ready-guard states. A record is claimed exactly once.
const PENDING: u8 = 0;
const CLAIMED: u8 = 1;

/// One in-flight asynchronous action.
///
/// Created by the initiator of an async operation, handed to the
/// completion port (or the deferred queue, or both when the paths race),
/// and finished by whichever dispatcher wins [`OpRecord::claim`].
/// The record's lifecycle ends the instant its callback returns.
pub struct OpRecord {
    /// One-shot ready guard: `PENDING` → `CLAIMED`, claimed exactly once.
    ready: AtomicU8,
    /// Result slot: bytes transferred (>= 0) or negated errno (< 0).
    result: AtomicI64,
    /// Owned completion callback, taken by the claim winner.
    complete: UnsafeCell<Option<CompleteFn>>,
}

// Safety: `complete` is only taken by the thread that won the `ready`
// CAS, so at most one thread ever touches the cell after construction.
unsafe impl Send for OpRecord {}
unsafe impl Sync for OpRecord {}

impl OpRecord {
    /// Create a record wrapping a completion callback.
    pub fn new<F>(complete: F) -> Arc<Self>
    where
        F: FnOnce(i32, usize) + Send + 'static,
    {
        Arc::new(Self {
            ready: AtomicU8::new(PENDING),
            result: AtomicI64::new(0),
            complete: UnsafeCell::new(Some(Box::new(complete))),
        })
    }

    /// Attempt to claim the record. Returns true for exactly one caller;
    /// every other (and every repeated) attempt returns false.
    #[inline]
    pub fn claim(&self) -> bool {
        self.ready
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether some path has already claimed this record.
    #[inline]
    pub fn is_claimed(&self) -> bool {
        self.ready.load(Ordering::Acquire) == CLAIMED
    }

    /// Store the operation outcome into the result slot.
    ///
    /// Used before posting the record as a result-bearing synthetic
    /// completion (timer expiry, synchronously satisfied operation).
    #[inline]
    pub fn set_result(&self, result: i64) {
        self.result.store(result, Ordering::Release);
    }

    /// Read the result slot.
    #[inline]
    pub fn result(&self) -> i64 {
        self.result.load(Ordering::Acquire)
    }

    /// Run the completion callback with a decoded result.
    ///
    /// Must only be called by the thread that won [`claim`](Self::claim);
    /// the claim is what makes taking the callback race-free.
    pub fn invoke(&self, result: i64) {
        debug_assert!(self.is_claimed());
        // Safety: the claim guard admits exactly one caller here.
        let complete = unsafe { (*self.complete.get()).take() };
        if let Some(complete) = complete {
            let (status, bytes) = split_result(result);
            complete(status, bytes);
        }
    }
}

impl std::fmt::Debug for OpRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpRecord")
            .field("claimed", &self.is_claimed())
            .field("result", &self.result())
            .finish()
    }
}

/// Decode an i64 result into (status, bytes transferred).
#[inline]
pub fn split_result(result: i64) -> (i32, usize) {
    if result < 0 {
        (result as i32, 0)
    } else {
        (0, result as usize)
    }
}
