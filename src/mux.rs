use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, pollfd};
use tracing::{debug, trace};

use crate::sys;

/// Events that count as "read-ready". Hangups and errors are included so a
/// dead peer is picked up by the next read, the way `select` reports them.
const READABLE: i16 = POLLIN | POLLHUP | POLLERR | POLLNVAL;

/// Platform primitive behind the multiplexer: one blocking call over the
/// whole descriptor set, marking `revents` in place.
pub trait Poller {
    fn poll(&mut self, fds: &mut [pollfd], timeout: Duration) -> io::Result<usize>;
}

/// `poll(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysPoller;

impl Poller for SysPoller {
    fn poll(&mut self, fds: &mut [pollfd], timeout: Duration) -> io::Result<usize> {
        sys::sys_poll(fds, timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one watched descriptor is ready.
    Ready(usize),
    TimedOut,
    /// Nothing was watched; the poller was not called.
    NoHandles,
}

/// Level-triggered read-readiness over a watch list rebuilt every iteration.
///
/// Usage per iteration is `reset`, `add` for every descriptor, `poll`, then
/// any number of `is_ready` queries. Adding the same descriptor twice is the
/// caller's mistake and is not detected.
pub struct Multiplexer<P = SysPoller> {
    poller: P,
    watch: Vec<pollfd>,
    ready: Vec<pollfd>,
    polled: bool,
}

impl Multiplexer<SysPoller> {
    pub fn new() -> Self {
        Self::with_poller(SysPoller)
    }
}

impl Default for Multiplexer<SysPoller> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Poller> Multiplexer<P> {
    pub fn with_poller(poller: P) -> Self {
        Self {
            poller,
            watch: Vec::new(),
            ready: Vec::new(),
            polled: false,
        }
    }

    pub fn reset(&mut self) {
        self.watch.clear();
        self.ready.clear();
        self.polled = false;
    }

    /// Watches `fd` for readability. Negative descriptors are refused.
    pub fn add(&mut self, fd: RawFd) -> bool {
        if fd < 0 {
            debug!(fd, "refusing to watch invalid descriptor");
            return false;
        }

        self.watch.push(pollfd {
            fd,
            events: POLLIN,
            revents: 0,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.watch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watch.is_empty()
    }

    /// Blocks for at most `timeout` until a watched descriptor is readable.
    ///
    /// The poller works on a copy of the watch list; `is_ready` reads that
    /// copy.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Readiness> {
        self.polled = false;

        if self.watch.is_empty() {
            trace!("no descriptors to watch");
            return Ok(Readiness::NoHandles);
        }

        self.ready.clone_from(&self.watch);

        let ready = self.poller.poll(&mut self.ready, timeout)?;
        if ready == 0 {
            trace!(watched = self.watch.len(), "poll timed out");
            return Ok(Readiness::TimedOut);
        }

        self.polled = true;
        trace!(watched = self.watch.len(), ready, "poll reported readiness");
        Ok(Readiness::Ready(ready))
    }

    /// Whether `fd` was reported readable by the last successful poll.
    pub fn is_ready(&self, fd: RawFd) -> bool {
        self.polled
            && self
                .ready
                .iter()
                .any(|entry| entry.fd == fd && entry.revents & READABLE != 0)
    }
}
