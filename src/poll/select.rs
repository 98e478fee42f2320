//! Bitset scan backend (select, portable).
//!
//! No persistent kernel state: the poller mirrors interest in a user-space
//! table and rebuilds the read/write bitsets for every wait. Timers are not
//! supported here; the dispatch loop scans the timer list instead.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Event, EventKinds, Token};

#[derive(Debug, Clone, Copy)]
struct Interest {
    read: bool,
    write: bool,
}

pub(crate) struct ScanPoller {
    interest: Vec<Option<Interest>>,
    maxfd: RawFd,
}

impl ScanPoller {
    pub(crate) fn new() -> Self {
        let mut interest = Vec::with_capacity(libc::FD_SETSIZE);
        interest.resize_with(libc::FD_SETSIZE, || None);
        Self {
            interest,
            maxfd: -1,
        }
    }

    fn check_range(fd: RawFd) -> io::Result<usize> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fd exceeds FD_SETSIZE",
            ));
        }
        Ok(fd as usize)
    }

    pub(crate) fn attach(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        let slot = Self::check_range(fd)?;
        self.interest[slot] = Some(Interest { read, write });
        if fd > self.maxfd {
            self.maxfd = fd;
        }
        Ok(())
    }

    pub(crate) fn modify(&mut self, fd: RawFd, read: bool, write: bool) -> io::Result<()> {
        self.attach(fd, read, write)
    }

    pub(crate) fn detach(&mut self, fd: RawFd) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Ok(());
        }
        self.interest[fd as usize] = None;
        while self.maxfd >= 0 && self.interest[self.maxfd as usize].is_none() {
            self.maxfd -= 1;
        }
        Ok(())
    }

    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Event>,
    ) -> io::Result<()> {
        let mut rin: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut rout: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut rin);
            libc::FD_ZERO(&mut rout);
        }

        for fd in 0..=self.maxfd {
            if let Some(interest) = self.interest[fd as usize] {
                if interest.read {
                    unsafe { libc::FD_SET(fd, &mut rin) };
                }
                if interest.write {
                    unsafe { libc::FD_SET(fd, &mut rout) };
                }
            }
        }

        let mut tv;
        let tv_ptr = match timeout {
            None => std::ptr::null_mut(),
            Some(d) => {
                tv = libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv as *mut libc::timeval
            }
        };

        let n = unsafe {
            libc::select(
                self.maxfd + 1,
                &mut rin,
                &mut rout,
                std::ptr::null_mut(),
                tv_ptr,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            // A signal or a transient shortage just ends the iteration.
            return match err.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) => Ok(()),
                _ => Err(err),
            };
        }
        if n == 0 {
            return Ok(());
        }

        for fd in 0..=self.maxfd {
            if self.interest[fd as usize].is_none() {
                continue;
            }
            let mut kinds = EventKinds::empty();
            if unsafe { libc::FD_ISSET(fd, &rin) } {
                kinds |= EventKinds::READ;
            }
            if unsafe { libc::FD_ISSET(fd, &rout) } {
                kinds |= EventKinds::WRITE;
            }
            if !kinds.is_empty() {
                out.push(Event {
                    token: Token::Fd(fd),
                    kinds,
                });
            }
        }
        Ok(())
    }
}
