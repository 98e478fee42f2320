//! Kernel readiness backends.
//!
//! Three variants sit behind one tagged enum: the edge-triggered epoll
//! backend on Linux, the kqueue backend on the BSD family, and the portable
//! select fallback. Exactly one is active per multiplexer; dispatch is a
//! single match on the tag.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::Error;
use crate::types::{Backend, TimerId};

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
mod select;

#[cfg(target_os = "linux")]
use epoll::EdgePoller;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
use kqueue::QueuePoller;
use select::ScanPoller;

bitflags::bitflags! {
    /// Readiness kinds reported for one event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct EventKinds: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const TIMER = 1 << 2;
        const HANGUP = 1 << 3;
        const ERROR = 1 << 4;
    }
}

/// What an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Fd(RawFd),
    Timer(TimerId),
}

/// One readiness event reported by a backend wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub(crate) token: Token,
    pub(crate) kinds: EventKinds,
}

/// The active backend, selected at construction time.
pub(crate) enum Poller {
    #[cfg(target_os = "linux")]
    Edge(EdgePoller),
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    Queue(QueuePoller),
    Scan(ScanPoller),
}

impl Poller {
    /// Open the requested backend, resolving `Auto` to the feature-richest
    /// one available. Returns the poller and the resolved selection.
    pub(crate) fn open(requested: Backend) -> Result<(Poller, Backend), Error> {
        match requested {
            Backend::Auto => {
                #[cfg(target_os = "linux")]
                {
                    Ok((Poller::Edge(EdgePoller::new()?), Backend::EdgeReadiness))
                }
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "openbsd",
                    target_os = "dragonfly"
                ))]
                {
                    Ok((Poller::Queue(QueuePoller::new()?), Backend::KernelQueue))
                }
                #[cfg(not(any(
                    target_os = "linux",
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "openbsd",
                    target_os = "dragonfly"
                )))]
                {
                    Ok((Poller::Scan(ScanPoller::new()), Backend::BitsetScan))
                }
            }
            Backend::EdgeReadiness => {
                #[cfg(target_os = "linux")]
                {
                    Ok((Poller::Edge(EdgePoller::new()?), Backend::EdgeReadiness))
                }
                #[cfg(not(target_os = "linux"))]
                {
                    Err(Error::UnsupportedBackend(requested))
                }
            }
            Backend::KernelQueue => {
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "openbsd",
                    target_os = "dragonfly"
                ))]
                {
                    Ok((Poller::Queue(QueuePoller::new()?), Backend::KernelQueue))
                }
                #[cfg(not(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "openbsd",
                    target_os = "dragonfly"
                )))]
                {
                    Err(Error::UnsupportedBackend(requested))
                }
            }
            Backend::BitsetScan => Ok((Poller::Scan(ScanPoller::new()), Backend::BitsetScan)),
        }
    }

    /// Register interest in readiness for `fd`.
    pub(crate) fn attach(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Edge(p) => p.attach(fd, read, write),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Poller::Queue(p) => p.attach(fd, read, write),
            Poller::Scan(p) => p.attach(fd, read, write),
        }
    }

    /// Update interest flags for an attached descriptor.
    pub(crate) fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Edge(p) => p.modify(fd, read, write),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Poller::Queue(p) => p.modify(fd, read, write),
            Poller::Scan(p) => p.modify(fd, read, write),
        }
    }

    /// Remove interest. Tolerates a descriptor that has already been closed.
    pub(crate) fn detach(&mut self, fd: RawFd) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Edge(p) => p.detach(fd),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Poller::Queue(p) => p.detach(fd),
            Poller::Scan(p) => p.detach(fd),
        }
    }

    /// Arm a one-shot kernel timer. Backends without native timers return
    /// `ErrorKind::Unsupported` and the dispatch loop falls back to
    /// scanning the timer list.
    pub(crate) fn arm_timer(&mut self, id: TimerId, after: Duration) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Edge(p) => p.arm_timer(id, after),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Poller::Queue(p) => p.arm_timer(id, after),
            Poller::Scan(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "backend has no kernel timers",
            )),
        }
    }

    /// Disarm a kernel timer armed with `arm_timer`.
    pub(crate) fn disarm_timer(&mut self, id: TimerId) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Edge(p) => p.disarm_timer(id),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Poller::Queue(p) => p.disarm_timer(id),
            Poller::Scan(_) => Ok(()),
        }
    }

    /// Block for up to `timeout` (infinite when `None`) and append the
    /// reported events to `out`.
    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Event>,
    ) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Edge(p) => p.wait(timeout, out),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Poller::Queue(p) => p.wait(timeout, out),
            Poller::Scan(p) => p.wait(timeout, out),
        }
    }
}

/// `detach` must succeed when the descriptor is already gone.
pub(crate) fn ignore_stale(err: io::Error) -> io::Result<()> {
    match err.raw_os_error() {
        Some(libc::EBADF) | Some(libc::ENOENT) => Ok(()),
        _ => Err(err),
    }
}
