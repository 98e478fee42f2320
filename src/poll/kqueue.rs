//! Kernel event queue backend (kqueue, BSD family).
//!
//! Each descriptor holds at most two filters, read and write; timers use the
//! timer filter keyed by the timeout id with one-shot semantics.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{ignore_stale, Event, EventKinds, Token};
use crate::types::TimerId;

/// Maximum events drained per wait.
const EVENT_BATCH: usize = 1024;

pub(crate) struct QueuePoller {
    kq: RawFd,
    events: Vec<libc::kevent>,
}

/// Build a kevent from the portable subset of fields. Starting from zeroed
/// storage sidesteps the struct-layout differences between the BSDs.
fn kev(ident: usize, filter: i16, flags: u16, data: i64) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = ident as libc::uintptr_t;
    ev.filter = filter;
    ev.flags = flags;
    ev.data = data as _;
    ev
}

impl QueuePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            kq,
            events: vec![unsafe { std::mem::zeroed() }; EVENT_BATCH],
        })
    }

    fn change(&self, ev: &libc::kevent) -> io::Result<()> {
        let poll = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::kevent(self.kq, ev, 1, std::ptr::null_mut(), 0, &poll) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn attach(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        if read {
            self.change(&kev(fd as usize, libc::EVFILT_READ, libc::EV_ADD, 0))?;
        }
        if write {
            self.change(&kev(fd as usize, libc::EVFILT_WRITE, libc::EV_ADD, 0))?;
        }
        Ok(())
    }

    pub(crate) fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        let read_ev = kev(
            fd as usize,
            libc::EVFILT_READ,
            if read { libc::EV_ADD } else { libc::EV_DELETE },
            0,
        );
        match self.change(&read_ev) {
            Ok(()) => {}
            Err(e) if !read => ignore_stale(e)?,
            Err(e) => return Err(e),
        }
        let write_ev = kev(
            fd as usize,
            libc::EVFILT_WRITE,
            if write { libc::EV_ADD } else { libc::EV_DELETE },
            0,
        );
        match self.change(&write_ev) {
            Ok(()) => Ok(()),
            Err(e) if !write => ignore_stale(e),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn detach(&mut self, fd: RawFd) -> io::Result<()> {
        let read_ev = kev(fd as usize, libc::EVFILT_READ, libc::EV_DELETE, 0);
        if let Err(e) = self.change(&read_ev) {
            ignore_stale(e)?;
        }
        let write_ev = kev(fd as usize, libc::EVFILT_WRITE, libc::EV_DELETE, 0);
        if let Err(e) = self.change(&write_ev) {
            ignore_stale(e)?;
        }
        Ok(())
    }

    pub(crate) fn arm_timer(&mut self, id: TimerId, after: Duration) -> io::Result<()> {
        let msecs = after.as_millis().min(i64::MAX as u128) as i64;
        self.change(&kev(
            id.as_u64() as usize,
            libc::EVFILT_TIMER,
            libc::EV_ADD | libc::EV_ONESHOT,
            msecs,
        ))
    }

    pub(crate) fn disarm_timer(&mut self, id: TimerId) -> io::Result<()> {
        let ev = kev(id.as_u64() as usize, libc::EVFILT_TIMER, libc::EV_DELETE, 0);
        match self.change(&ev) {
            Ok(()) => Ok(()),
            Err(e) => ignore_stale(e),
        }
    }

    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Event>,
    ) -> io::Result<()> {
        let ts;
        let ts_ptr = match timeout {
            None => std::ptr::null(),
            Some(d) => {
                ts = libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as libc::c_long,
                };
                &ts as *const libc::timespec
            }
        };

        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                ts_ptr,
            )
        };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }

        for i in 0..n as usize {
            let raw = self.events[i];
            if raw.filter == libc::EVFILT_TIMER {
                out.push(Event {
                    token: Token::Timer(TimerId::new(raw.ident as u64)),
                    kinds: EventKinds::TIMER,
                });
                continue;
            }

            let mut kinds = EventKinds::empty();
            if raw.filter == libc::EVFILT_READ {
                kinds |= EventKinds::READ;
            }
            if raw.filter == libc::EVFILT_WRITE {
                kinds |= EventKinds::WRITE;
            }
            if raw.flags & libc::EV_EOF != 0 {
                kinds |= EventKinds::HANGUP;
            }
            if raw.flags & libc::EV_ERROR != 0 {
                kinds |= EventKinds::ERROR;
            }
            out.push(Event {
                token: Token::Fd(raw.ident as RawFd),
                kinds,
            });
        }
        Ok(())
    }
}

impl Drop for QueuePoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_poller() {
        assert!(QueuePoller::new().is_ok());
    }

    #[test]
    fn test_detach_unknown_fd_is_silent() {
        let mut poller = QueuePoller::new().unwrap();
        assert!(poller.detach(999).is_ok());
    }

    #[test]
    fn test_timer_fires_as_event() {
        let mut poller = QueuePoller::new().unwrap();
        let id = TimerId::new(3);
        poller.arm_timer(id, Duration::from_millis(10)).unwrap();

        let mut out = Vec::new();
        poller
            .wait(Some(Duration::from_millis(500)), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].token, Token::Timer(id));
    }

    #[test]
    fn test_disarmed_timer_does_not_fire() {
        let mut poller = QueuePoller::new().unwrap();
        let id = TimerId::new(4);
        poller.arm_timer(id, Duration::from_millis(10)).unwrap();
        poller.disarm_timer(id).unwrap();

        let mut out = Vec::new();
        poller
            .wait(Some(Duration::from_millis(50)), &mut out)
            .unwrap();
        assert!(out.is_empty());
    }
}
