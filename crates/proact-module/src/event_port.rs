//! `EventPort` — epoll + eventfd `CompletionPort` implementation (Linux).
//!
//! Posted items travel a bounded lock-free queue; a write to the
//! eventfd unblocks one `epoll_wait`er, which drains the eventfd and
//! pops exactly one item. If more items remain queued the eventfd is
//! re-armed so the next waiter wakes too (the eventfd counter coalesces
//! writes, so one read can swallow several signals).
//!
//! Transport handles registered with `associate` surface readiness as
//! [`Delivery::Wake`]: the owning transport service performs the
//! non-blocking I/O and injects the finished record through the
//! runtime's deferred path.

use proact_core::error::{PortError, Result};
use proact_core::port::{CompletionPort, Delivery};
use proact_core::record::OpRecord;

use crossbeam_queue::ArrayQueue;
use nix::errno::Errno;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// epoll user-data token marking the port's own eventfd.
const WAKE_TOKEN: u64 = u64::MAX;

/// Default capacity of the posted-item queue.
const DEFAULT_QUEUE_DEPTH: usize = 1024;

enum Posted {
    Op {
        record: Arc<OpRecord>,
        result: Option<i64>,
    },
    Wake,
    Stop,
}

pub struct EventPort {
    epoll_fd: RawFd,
    event_fd: RawFd,
    posted: ArrayQueue<Posted>,
    closed: AtomicBool,
}

impl EventPort {
    /// Create a port with the default queue depth.
    pub fn new() -> Result<Self> {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    /// Create a port whose posted-item queue holds `depth` entries.
    pub fn with_queue_depth(depth: usize) -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(PortError::Create(Errno::last_raw()));
        }

        let event_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if event_fd < 0 {
            let err = Errno::last_raw();
            unsafe { libc::close(epoll_fd) };
            return Err(PortError::Create(err));
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let ret = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, event_fd, &mut ev) };
        if ret < 0 {
            let err = Errno::last_raw();
            unsafe {
                libc::close(event_fd);
                libc::close(epoll_fd);
            }
            return Err(PortError::Create(err));
        }

        Ok(Self {
            epoll_fd,
            event_fd,
            posted: ArrayQueue::new(depth.max(1)),
            closed: AtomicBool::new(false),
        })
    }

    fn push(&self, item: Posted) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PortError::Closed);
        }
        if self.posted.push(item).is_err() {
            return Err(PortError::Post(libc::EAGAIN));
        }
        self.signal()
    }

    /// Bump the eventfd counter. EAGAIN means the counter would
    /// overflow, which implies a signal is already pending.
    fn signal(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.event_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last_raw();
            if errno != libc::EAGAIN {
                return Err(PortError::Post(errno));
            }
        }
        Ok(())
    }

    fn drain_eventfd(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(
                self.event_fd,
                &mut buf as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// Remaining whole milliseconds until `deadline`, rounded up so a
    /// sub-millisecond tail does not busy-spin.
    fn remaining_ms(deadline: Instant, now: Instant) -> libc::c_int {
        if now >= deadline {
            return 0;
        }
        let left = deadline - now;
        let mut ms = left.as_millis();
        if left.subsec_nanos() % 1_000_000 != 0 {
            ms += 1;
        }
        ms.min(libc::c_int::MAX as u128) as libc::c_int
    }
}

impl CompletionPort for EventPort {
    fn associate(&self, fd: RawFd) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLET) as u32,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret < 0 {
            return Err(PortError::Associate(Errno::last_raw()));
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Delivery> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(PortError::Closed);
            }

            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => Self::remaining_ms(deadline, Instant::now()),
            };

            let mut ev = libc::epoll_event { events: 0, u64: 0 };
            let n = unsafe { libc::epoll_wait(self.epoll_fd, &mut ev, 1, timeout_ms) };

            if self.closed.load(Ordering::Acquire) {
                return Err(PortError::Closed);
            }
            if n < 0 {
                let errno = Errno::last_raw();
                if errno == libc::EINTR {
                    continue;
                }
                return Err(PortError::Wait(errno));
            }
            if n == 0 {
                match deadline {
                    Some(deadline) if Instant::now() >= deadline => {
                        return Ok(Delivery::TimedOut)
                    }
                    // Spurious early return; re-wait for the remainder.
                    Some(_) => continue,
                    None => continue,
                }
            }

            if ev.u64 != WAKE_TOKEN {
                // Readiness on an associated transport handle.
                return Ok(Delivery::Wake);
            }

            self.drain_eventfd();
            match self.posted.pop() {
                Some(item) => {
                    if !self.posted.is_empty() {
                        // One eventfd read may have swallowed several
                        // signals; keep the remaining items visible.
                        let _ = self.signal();
                    }
                    return Ok(match item {
                        Posted::Op { record, result } => Delivery::Op { record, result },
                        Posted::Wake => Delivery::Wake,
                        Posted::Stop => Delivery::Stop,
                    });
                }
                // Another waiter drained the queue first.
                None => return Ok(Delivery::Wake),
            }
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
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Waiters check the closed flag before draining the eventfd, so
        // the level-triggered signal keeps waking them until each has
        // observed the flag.
        let _ = self.signal();
    }
}

impl Drop for EventPort {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        unsafe {
            libc::close(self.event_fd);
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_post_wake_delivers() {
        let port = EventPort::new().unwrap();
        port.post_wake().unwrap();
        assert!(matches!(
            port.wait(Some(Duration::from_millis(200))).unwrap(),
            Delivery::Wake
        ));
    }

    #[test]
    fn test_post_op_delivers_record() {
        let port = EventPort::new().unwrap();
        let record = OpRecord::new(|_, _| {});
        record.set_result(77);
        port.post(record).unwrap();

        match port.wait(Some(Duration::from_millis(200))).unwrap() {
            Delivery::Op { record, result } => {
                assert!(result.is_none());
                assert_eq!(record.result(), 77);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[test]
    fn test_wait_times_out() {
        let port = EventPort::new().unwrap();
        let start = Instant::now();
        assert!(matches!(
            port.wait(Some(Duration::from_millis(30))).unwrap(),
            Delivery::TimedOut
        ));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_coalesced_signals_still_deliver_all() {
        let port = EventPort::new().unwrap();
        for _ in 0..4 {
            port.post_stop().unwrap();
        }
        // The eventfd counter was bumped four times but one read drains
        // it; the re-arm in wait() must keep the rest deliverable.
        for _ in 0..4 {
            assert!(matches!(
                port.wait(Some(Duration::from_millis(200))).unwrap(),
                Delivery::Stop
            ));
        }
    }

    #[test]
    fn test_associated_fd_readiness_surfaces_as_wake() {
        let port = EventPort::new().unwrap();
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        port.associate(fds[0]).unwrap();

        let byte = 1u8;
        let wrote = unsafe { libc::write(fds[1], &byte as *const u8 as *const libc::c_void, 1) };
        assert_eq!(wrote, 1);

        assert!(matches!(
            port.wait(Some(Duration::from_millis(500))).unwrap(),
            Delivery::Wake
        ));

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_shutdown_wakes_blocked_waiter() {
        let port = Arc::new(EventPort::new().unwrap());
        let waiter = {
            let port = Arc::clone(&port);
            thread::spawn(move || port.wait(Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        port.shutdown();

        assert!(matches!(waiter.join().unwrap(), Err(PortError::Closed)));
        assert_eq!(port.post_wake(), Err(PortError::Closed));
    }
}
