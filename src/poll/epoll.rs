//! Edge-triggered readiness backend (epoll, Linux).
//!
//! Descriptors carry edge-triggered read interest; write interest is toggled
//! on demand. Timers are one-shot timerfd descriptors registered alongside
//! the managed descriptors, with a token offset keeping the two namespaces
//! apart.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::debug;

use super::{ignore_stale, Event, EventKinds, Token};
use crate::types::TimerId;

/// Token offset for timer descriptors to avoid collision with managed fds.
const TIMER_TOKEN_OFFSET: u64 = 1 << 30;

/// Maximum events drained per wait.
const EVENT_BATCH: usize = 1024;

pub(crate) struct EdgePoller {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
    /// timer fd -> timeout id
    timer_ids: HashMap<RawFd, u64>,
    /// timeout id -> timer fd
    timer_fds: HashMap<u64, RawFd>,
}

impl EdgePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH],
            timer_ids: HashMap::new(),
            timer_fds: HashMap::new(),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, flags: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: flags,
            u64: token,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn interest_flags(read: bool, write: bool) -> u32 {
        let mut flags = 0u32;
        if read {
            flags |= (libc::EPOLLIN | libc::EPOLLET) as u32;
        }
        if write {
            flags |= libc::EPOLLOUT as u32;
        }
        flags
    }

    pub(crate) fn attach(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd,
            Self::interest_flags(read, write),
            fd as u64,
        )
    }

    pub(crate) fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_MOD,
            fd,
            Self::interest_flags(read, write),
            fd as u64,
        )
    }

    pub(crate) fn detach(&mut self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, 0, fd as u64) {
            Ok(()) => Ok(()),
            Err(e) => ignore_stale(e),
        }
    }

    pub(crate) fn arm_timer(&mut self, id: TimerId, after: Duration) -> io::Result<()> {
        let tfd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if tfd == -1 {
            return Err(io::Error::last_os_error());
        }

        // A fully zeroed it_value would disarm the timer; clamp to 1ns so a
        // zero duration still fires.
        let nanos = after.subsec_nanos().max(if after.as_secs() == 0 { 1 } else { 0 });
        let timerspec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: after.as_secs() as libc::time_t,
                tv_nsec: nanos as libc::c_long,
            },
        };
        let rc = unsafe { libc::timerfd_settime(tfd, 0, &timerspec, std::ptr::null_mut()) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(tfd) };
            return Err(err);
        }

        let flags = libc::EPOLLIN as u32 | libc::EPOLLONESHOT as u32;
        if let Err(e) = self.ctl(
            libc::EPOLL_CTL_ADD,
            tfd,
            flags,
            TIMER_TOKEN_OFFSET | tfd as u64,
        ) {
            unsafe { libc::close(tfd) };
            return Err(e);
        }

        self.timer_ids.insert(tfd, id.as_u64());
        self.timer_fds.insert(id.as_u64(), tfd);
        Ok(())
    }

    pub(crate) fn disarm_timer(&mut self, id: TimerId) -> io::Result<()> {
        if let Some(tfd) = self.timer_fds.remove(&id.as_u64()) {
            self.timer_ids.remove(&tfd);
            let _ = self.ctl(libc::EPOLL_CTL_DEL, tfd, 0, 0);
            unsafe { libc::close(tfd) };
        }
        Ok(())
    }

    /// Drain the expiry counter and release a fired timer descriptor.
    fn retire_timer_fd(&mut self, tfd: RawFd) -> Option<u64> {
        let id = self.timer_ids.remove(&tfd)?;
        self.timer_fds.remove(&id);
        let mut expirations = [0u8; 8];
        unsafe {
            libc::read(tfd, expirations.as_mut_ptr() as *mut libc::c_void, 8);
        }
        let _ = self.ctl(libc::EPOLL_CTL_DEL, tfd, 0, 0);
        unsafe { libc::close(tfd) };
        Some(id)
    }

    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Event>,
    ) -> io::Result<()> {
        let ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                ms,
            )
        };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }

        for i in 0..n as usize {
            let raw = self.events[i];
            let token = raw.u64;
            if token >= TIMER_TOKEN_OFFSET {
                let tfd = (token - TIMER_TOKEN_OFFSET) as RawFd;
                match self.retire_timer_fd(tfd) {
                    Some(id) => out.push(Event {
                        token: Token::Timer(TimerId::new(id)),
                        kinds: EventKinds::TIMER,
                    }),
                    None => debug!(tfd, "event for unknown timer descriptor"),
                }
                continue;
            }

            let mut kinds = EventKinds::empty();
            if raw.events & libc::EPOLLIN as u32 != 0 {
                kinds |= EventKinds::READ;
            }
            if raw.events & libc::EPOLLOUT as u32 != 0 {
                kinds |= EventKinds::WRITE;
            }
            if raw.events & libc::EPOLLHUP as u32 != 0 {
                kinds |= EventKinds::HANGUP;
            }
            if raw.events & libc::EPOLLERR as u32 != 0 {
                kinds |= EventKinds::ERROR;
            }
            // Anything else the kernel might report still means the
            // descriptor is unusable.
            if kinds.is_empty() {
                kinds = EventKinds::ERROR;
            }
            out.push(Event {
                token: Token::Fd(token as RawFd),
                kinds,
            });
        }
        Ok(())
    }
}

impl Drop for EdgePoller {
    fn drop(&mut self) {
        for (&tfd, _) in self.timer_ids.iter() {
            unsafe { libc::close(tfd) };
        }
        unsafe { libc::close(self.epfd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_poller() {
        let poller = EdgePoller::new();
        assert!(poller.is_ok());
    }

    #[test]
    fn test_detach_unknown_fd_is_silent() {
        let mut poller = EdgePoller::new().unwrap();
        assert!(poller.detach(999).is_ok());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let mut poller = EdgePoller::new().unwrap();
        let mut out = Vec::new();
        poller
            .wait(Some(Duration::from_millis(1)), &mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_timer_fires_as_event() {
        let mut poller = EdgePoller::new().unwrap();
        let id = TimerId::new(7);
        poller.arm_timer(id, Duration::from_millis(10)).unwrap();

        let mut out = Vec::new();
        poller
            .wait(Some(Duration::from_millis(500)), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token, Token::Timer(id));
        assert!(out[0].kinds.contains(EventKinds::TIMER));
    }

    #[test]
    fn test_disarmed_timer_does_not_fire() {
        let mut poller = EdgePoller::new().unwrap();
        let id = TimerId::new(9);
        poller.arm_timer(id, Duration::from_millis(10)).unwrap();
        poller.disarm_timer(id).unwrap();

        let mut out = Vec::new();
        poller
            .wait(Some(Duration::from_millis(50)), &mut out)
            .unwrap();
        assert!(out.is_empty());
    }
}
