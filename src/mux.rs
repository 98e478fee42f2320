//! The multiplexer: registry, write buffering, timers, and the dispatch loop.

use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::builder::MuxBuilder;
use crate::callbacks::{Callbacks, EventFn, TimerCb};
use crate::connection::{ConnFlags, Connection, ConnectionTable};
use crate::error::Error;
use crate::poll::{Event, EventKinds, Poller, Token};
use crate::timer::{Timeout, TimerList};
use crate::types::{Backend, TimerId, MAX_DESCRIPTORS};

/// Size of the per-read stack buffer handed to the input callback.
const READ_BUF_SIZE: usize = 16384;

/// Maximum drain attempts while closing a descriptor with pending output.
const FLUSH_MAX_RETRIES: u32 = 5;

/// Process-wide hangup flag, typically set from a signal handler. The hangup
/// hook runs strictly between loop iterations, so user code observes the
/// flag without signal-safety constraints.
static HANGUP: AtomicBool = AtomicBool::new(false);

/// Raise the process-wide hangup flag. Async-signal-safe.
pub fn raise_hangup() {
    HANGUP.store(true, Ordering::SeqCst);
}

/// Clear the process-wide hangup flag.
pub fn clear_hangup() {
    HANGUP.store(false, Ordering::SeqCst);
}

/// Whether the process-wide hangup flag is raised.
pub fn hangup_raised() -> bool {
    HANGUP.load(Ordering::Relaxed)
}

type HookFn = Box<dyn FnMut(&mut Mux)>;

type EventSlot = fn(&mut Callbacks) -> &mut Option<EventFn>;

/// Single-threaded I/O multiplexer.
///
/// Owns a set of non-blocking descriptors and drives their callbacks from
/// [`run`](Mux::run) / [`run_loop`](Mux::run_loop). All callbacks execute on
/// the calling thread; they may invoke any public method on the same
/// multiplexer, including removing or closing the descriptor they were
/// invoked for.
pub struct Mux {
    conns: ConnectionTable,
    timers: TimerList,
    last_timeout_id: u64,
    last_check: Option<Instant>,
    leave: bool,
    loop_end: Option<HookFn>,
    hangup: Option<HookFn>,
    poller: Poller,
    backend: Backend,
    events: Vec<Event>,
    /// Events paired with the generation of their target at wait time, so
    /// stale events are dropped even when a callback re-registers the fd.
    batch: Vec<(Event, u64)>,
    buffer_capacity: usize,
}

impl Mux {
    /// Create a multiplexer with default settings.
    pub fn new() -> Result<Self, Error> {
        MuxBuilder::new().build()
    }

    /// Create a builder for configuring the multiplexer.
    pub fn builder() -> MuxBuilder {
        MuxBuilder::new()
    }

    pub(crate) fn from_parts(poller: Poller, backend: Backend, buffer_capacity: usize) -> Self {
        Self {
            conns: ConnectionTable::new(),
            timers: TimerList::new(),
            last_timeout_id: 0,
            last_check: None,
            leave: false,
            loop_end: None,
            hangup: None,
            poller,
            backend,
            events: Vec::with_capacity(256),
            batch: Vec::with_capacity(256),
            buffer_capacity,
        }
    }

    /// The resolved readiness backend driving this multiplexer.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    // === Registry ===

    /// Register a descriptor with its callback set.
    ///
    /// The descriptor is switched to non-blocking mode and registered with
    /// the backend for read readiness (plus write readiness when an
    /// `on_output` callback is present). On failure nothing is registered.
    pub fn add(&mut self, fd: RawFd, cbs: Callbacks) -> Result<(), Error> {
        if fd < 0 {
            return Err(Error::InvalidFd(fd));
        }
        if fd as usize >= MAX_DESCRIPTORS {
            return Err(Error::FdOutOfRange(fd));
        }
        if self.conns.get(fd).is_some() {
            return Err(Error::AlreadyRegistered(fd));
        }
        if cbs.is_empty() {
            return Err(Error::NoCallbacks(fd));
        }

        unsafe {
            libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
        }
        self.poller.attach(fd, true, cbs.on_output.is_some())?;
        self.conns.insert(fd, Connection::new(cbs, self.buffer_capacity));
        Ok(())
    }

    /// Remove a descriptor from the multiplexer.
    ///
    /// Silent on an unknown descriptor. Unschedules any associated timeout
    /// and detaches from the backend, tolerating an already-closed
    /// descriptor. The descriptor itself stays open; the caller owns it.
    pub fn remove(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.remove(fd) else {
            return;
        };
        if let Some(id) = conn.timeout_id {
            self.unschedule(id);
        }
        if let Err(e) = self.poller.detach(fd) {
            debug!(fd, error = %e, "backend detach failed");
        }
    }

    /// Put a registered descriptor into listening state.
    ///
    /// The descriptor must carry an `on_connection` callback and must
    /// already be bound; readable events then accept connections instead of
    /// reading bytes.
    pub fn listen(&mut self, fd: RawFd) -> Result<(), Error> {
        let Some(conn) = self.conns.get_mut(fd) else {
            return Err(Error::NotRegistered(fd));
        };
        if conn.cbs.on_connection.is_none() {
            return Err(Error::MissingConnectionCallback(fd));
        }
        if unsafe { libc::listen(fd, -1) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        conn.flags.insert(ConnFlags::SERVER);
        Ok(())
    }

    /// Whether no descriptors are registered.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Number of registered descriptors.
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    // === Buffered output ===

    /// Append bytes to the descriptor's output buffer.
    ///
    /// Never blocks. Accepts at most the remaining buffer capacity and
    /// returns the number of bytes taken; the caller retries the rest later.
    /// Accepting any bytes registers write interest with the backend.
    pub fn write(&mut self, fd: RawFd, data: &[u8]) -> Result<usize, Error> {
        let free = match self.conns.get(fd) {
            Some(conn) => self.buffer_capacity - conn.outbuf.len(),
            None => return Err(Error::NotRegistered(fd)),
        };
        let wlen = data.len().min(free);
        if wlen > 0 {
            self.poller.modify(fd, true, true)?;
            if let Some(conn) = self.conns.get_mut(fd) {
                conn.outbuf.extend_from_slice(&data[..wlen]);
            }
        }
        Ok(wlen)
    }

    /// Close a descriptor: drain pending output with a bounded number of
    /// retries, invoke `on_eof` exactly once, then remove the record.
    ///
    /// The underlying descriptor is not closed; its lifetime beyond
    /// detachment belongs to the caller.
    pub fn close(&mut self, fd: RawFd) {
        {
            let Some(conn) = self.conns.get_mut(fd) else {
                return;
            };
            if conn.eof {
                return;
            }
            conn.eof = true;
        }
        self.flush_pending(fd);
        self.invoke_event_cb(fd, |c| &mut c.on_eof);
        self.remove(fd);
    }

    fn flush_pending(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get_mut(fd) else {
            return;
        };
        if conn.outbuf.is_empty() {
            return;
        }
        let mut retries = 0;
        while !conn.outbuf.is_empty() && retries <= FLUSH_MAX_RETRIES {
            let n = unsafe {
                libc::write(
                    fd,
                    conn.outbuf.as_ptr() as *const libc::c_void,
                    conn.outbuf.len(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => {
                        retries += 1;
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    _ => break,
                }
            } else if n == 0 {
                break;
            } else {
                conn.outbuf.drain(..n as usize);
            }
        }
        if !conn.outbuf.is_empty() {
            warn!(
                fd,
                pending = conn.outbuf.len(),
                "closing descriptor with undelivered output"
            );
        }
    }

    // === Timers ===

    fn next_timeout_id(&mut self) -> TimerId {
        self.last_timeout_id = self.last_timeout_id.wrapping_add(1);
        if self.last_timeout_id == 0 {
            self.last_timeout_id = 1;
        }
        TimerId(self.last_timeout_id)
    }

    /// Schedule a one-shot timer. The callback runs exactly once unless the
    /// timer is unscheduled first.
    pub fn schedule(&mut self, after: Duration, cb: TimerCb) -> Result<TimerId, Error> {
        if self.last_check.is_none() {
            self.last_check = Some(Instant::now());
        }
        let id = self.next_timeout_id();
        let armed = match self.poller.arm_timer(id, after) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::Unsupported => false,
            Err(e) => return Err(e.into()),
        };
        self.timers.insert(Timeout {
            id,
            remaining: after,
            cb,
            armed,
        });
        Ok(id)
    }

    /// Reset the wait of an existing timer, or schedule a fresh one when the
    /// id is unknown. An existing timer keeps its callback and id; only the
    /// wait is replaced. Returns the effective id.
    pub fn reschedule(
        &mut self,
        id: TimerId,
        after: Duration,
        cb: TimerCb,
    ) -> Result<TimerId, Error> {
        match self.timers.remove_by_id(id) {
            Some(mut timeout) => {
                if timeout.armed {
                    let _ = self.poller.disarm_timer(id);
                }
                timeout.remaining = after;
                timeout.armed = match self.poller.arm_timer(id, after) {
                    Ok(()) => true,
                    Err(e) if e.kind() == io::ErrorKind::Unsupported => false,
                    Err(e) => return Err(e.into()),
                };
                self.timers.insert(timeout);
                Ok(id)
            }
            None => self.schedule(after, cb),
        }
    }

    /// Cancel a timer. Returns whether it was pending.
    pub fn unschedule(&mut self, id: TimerId) -> bool {
        match self.timers.remove_by_id(id) {
            Some(timeout) => {
                if timeout.armed {
                    let _ = self.poller.disarm_timer(id);
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every timer scheduled with this callback handle. Returns the
    /// number removed.
    pub fn unschedule_all(&mut self, cb: &TimerCb) -> usize {
        let removed = self.timers.remove_matching(cb);
        for timeout in &removed {
            if timeout.armed {
                let _ = self.poller.disarm_timer(timeout.id);
            }
        }
        removed.len()
    }

    /// Associate a one-shot timeout with a descriptor, or clear it.
    ///
    /// On expiry the descriptor's `on_timeout` callback runs, provided the
    /// descriptor is still registered. A timeout that fired needs to be set
    /// again. Returns the timer id, or `None` when cleared or when the
    /// descriptor is unknown.
    pub fn set_timeout(&mut self, fd: RawFd, after: Option<Duration>) -> Option<TimerId> {
        self.conns.get(fd)?;
        match after {
            None => {
                if let Some(id) = self.conns.get_mut(fd).and_then(|c| c.timeout_id.take()) {
                    self.unschedule(id);
                }
                None
            }
            Some(after) => {
                let previous = self.conns.get(fd).and_then(|c| c.timeout_id);
                let bridge: TimerCb = Rc::new(move |mux: &mut Mux| mux.connection_timer_fired(fd));
                let id = match previous {
                    Some(prev) => self.reschedule(prev, after, bridge),
                    None => self.schedule(after, bridge),
                }
                .ok()?;
                if let Some(conn) = self.conns.get_mut(fd) {
                    conn.timeout_id = Some(id);
                }
                Some(id)
            }
        }
    }

    /// Bridge from a fired timer to the owning connection's callback.
    fn connection_timer_fired(&mut self, fd: RawFd) {
        match self.conns.get_mut(fd) {
            Some(conn) => conn.timeout_id = None,
            None => return,
        }
        self.invoke_event_cb(fd, |c| &mut c.on_timeout);
    }

    // === Loop control ===

    /// Install the hook invoked after every loop iteration.
    pub fn set_loop_end_hook(&mut self, cb: impl FnMut(&mut Mux) + 'static) {
        self.loop_end = Some(Box::new(cb));
    }

    /// Install the hook invoked between iterations while the process-wide
    /// hangup flag is raised.
    pub fn set_hangup_hook(&mut self, cb: impl FnMut(&mut Mux) + 'static) {
        self.hangup = Some(Box::new(cb));
    }

    /// Request that [`run_loop`](Mux::run_loop) return after the current
    /// iteration completes.
    pub fn end_loop(&mut self) {
        self.leave = true;
    }

    /// Repeat [`run`](Mux::run) with the given default wait in whole seconds
    /// until [`end_loop`](Mux::end_loop) is called, invoking the loop-end
    /// hook each iteration and the hangup hook when the flag is raised.
    pub fn run_loop(&mut self, default_secs: u64) {
        while !self.leave {
            self.run(Some(Duration::from_secs(default_secs)));

            if let Some(mut cb) = self.loop_end.take() {
                cb(self);
                if self.loop_end.is_none() {
                    self.loop_end = Some(cb);
                }
            }
            if hangup_raised() {
                if let Some(mut cb) = self.hangup.take() {
                    cb(self);
                    if self.hangup.is_none() {
                        self.hangup = Some(cb);
                    }
                }
            }
        }
        self.leave = false;
    }

    // === Dispatch ===

    /// One iteration: block for readiness or timer expiry, dispatch the
    /// reported events in order, then decay and sweep the timer list.
    ///
    /// The effective wait is the smaller of `default_wait` and the earliest
    /// pending timer; it is infinite only when both are absent.
    pub fn run(&mut self, default_wait: Option<Duration>) {
        let wait = self.merged_wait(default_wait);

        let mut events = std::mem::take(&mut self.events);
        events.clear();
        match self.poller.wait(wait, &mut events) {
            Ok(()) => {
                let mut batch = std::mem::take(&mut self.batch);
                batch.clear();
                for event in events.iter().copied() {
                    let generation = match event.token {
                        Token::Fd(fd) => {
                            self.conns.get(fd).map(|c| c.generation).unwrap_or(0)
                        }
                        Token::Timer(_) => 0,
                    };
                    batch.push((event, generation));
                }
                for (event, generation) in batch.iter().copied() {
                    self.dispatch(event, generation);
                }
                self.batch = batch;
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    warn!(error = %e, "backend wait failed");
                }
            }
        }
        self.events = events;

        self.update_timers();
        self.sweep_timers();
    }

    fn merged_wait(&self, default_wait: Option<Duration>) -> Option<Duration> {
        match (default_wait, self.timers.head_remaining()) {
            (Some(d), Some(h)) => Some(d.min(h)),
            (Some(d), None) => Some(d),
            (None, Some(h)) => Some(h),
            (None, None) => None,
        }
    }

    fn dispatch(&mut self, event: Event, expected_generation: u64) {
        match event.token {
            Token::Timer(id) => self.fire_timer(id),
            Token::Fd(fd) => {
                let (generation, is_server) = match self.conns.get(fd) {
                    Some(conn) => (conn.generation, conn.is_server()),
                    None => {
                        debug!(fd, "event for unregistered descriptor");
                        return;
                    }
                };
                if generation != expected_generation {
                    debug!(fd, "skipping event for a stale registration");
                    return;
                }

                if is_server && event.kinds.contains(EventKinds::READ) {
                    self.accept_pending(fd);
                } else {
                    if event.kinds.contains(EventKinds::READ) {
                        self.read_fd(fd);
                    }
                    if !self.still_registered(fd, generation) {
                        return;
                    }
                    if event.kinds.contains(EventKinds::WRITE) {
                        self.write_fd(fd);
                    }
                }
                if !self.still_registered(fd, generation) {
                    return;
                }
                if event
                    .kinds
                    .intersects(EventKinds::HANGUP | EventKinds::ERROR)
                {
                    self.close(fd);
                }
            }
        }
    }

    /// A descriptor survives an event only if the same record is still in
    /// place; a callback that removed and re-added the fd ends the event.
    fn still_registered(&self, fd: RawFd, generation: u64) -> bool {
        self.conns.get(fd).map(|c| c.generation) == Some(generation)
    }

    /// Accept every pending connection on a listening descriptor.
    fn accept_pending(&mut self, fd: RawFd) {
        let Some(generation) = self.conns.get(fd).map(|c| c.generation) else {
            return;
        };
        loop {
            let newfd = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };
            if newfd < 0 {
                break;
            }
            self.invoke_connection_cb(fd, newfd);
            if !self.still_registered(fd, generation) {
                break;
            }
        }
    }

    fn read_fd(&mut self, fd: RawFd) {
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if !matches!(
                err.raw_os_error(),
                Some(libc::EINTR) | Some(libc::EAGAIN)
            ) {
                warn!(fd, error = %err, "read failed");
                self.close(fd);
            }
        } else if n == 0 {
            self.close(fd);
        } else {
            self.invoke_input(fd, &buf[..n as usize]);
        }
    }

    fn write_fd(&mut self, fd: RawFd) {
        let (generation, empty, has_output_cb) = match self.conns.get(fd) {
            Some(conn) => (
                conn.generation,
                conn.outbuf.is_empty(),
                conn.cbs.on_output.is_some(),
            ),
            None => return,
        };
        // The output callback refills an empty buffer.
        if empty && has_output_cb {
            self.invoke_event_cb(fd, |c| &mut c.on_output);
            if !self.still_registered(fd, generation) {
                return;
            }
        }

        let n = {
            let Some(conn) = self.conns.get_mut(fd) else {
                return;
            };
            if conn.outbuf.is_empty() {
                return;
            }
            unsafe {
                libc::write(
                    fd,
                    conn.outbuf.as_ptr() as *const libc::c_void,
                    conn.outbuf.len(),
                )
            }
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if !matches!(
                err.raw_os_error(),
                Some(libc::EINTR) | Some(libc::EAGAIN)
            ) {
                warn!(fd, error = %err, "write failed");
                self.close(fd);
            }
        } else if n == 0 {
            self.close(fd);
        } else {
            let mut drop_write_interest = false;
            if let Some(conn) = self.conns.get_mut(fd) {
                // Keep the residue of a short write in place.
                conn.outbuf.drain(..n as usize);
                drop_write_interest = conn.outbuf.is_empty() && conn.cbs.on_output.is_none();
            }
            if drop_write_interest {
                if let Err(e) = self.poller.modify(fd, true, false) {
                    warn!(fd, error = %e, "failed to drop write interest");
                }
            }
        }
    }

    /// A kernel-armed timer fired as a backend event.
    fn fire_timer(&mut self, id: TimerId) {
        let Some(timeout) = self.timers.remove_by_id(id) else {
            debug!(id = id.as_u64(), "event for unknown timer");
            return;
        };
        (timeout.cb)(self);
    }

    /// Decay every remaining wait by the elapsed wall time since the last
    /// check, so the caller's wait ceiling and the timers share one clock.
    fn update_timers(&mut self) {
        let now = Instant::now();
        let elapsed = match self.last_check {
            Some(previous) => now.duration_since(previous),
            None => Duration::ZERO,
        };
        self.last_check = Some(now);
        self.timers.decay(elapsed);
    }

    /// Fire due timers that are not backed by a kernel timer (the bitset
    /// backend path; kernel-timer backends deliver expiry as events).
    fn sweep_timers(&mut self) {
        while let Some(timeout) = self.timers.pop_due() {
            (timeout.cb)(self);
        }
    }

    // === Callback plumbing ===
    //
    // A callback is moved out of its slot for the duration of the call so it
    // can borrow the multiplexer, then restored only when the same record
    // still occupies the slot.

    fn invoke_input(&mut self, fd: RawFd, data: &[u8]) {
        let (generation, mut cb) = {
            let Some(conn) = self.conns.get_mut(fd) else {
                return;
            };
            let Some(cb) = conn.cbs.on_input.take() else {
                return;
            };
            (conn.generation, cb)
        };
        cb(self, fd, data);
        if let Some(conn) = self.conns.get_mut(fd) {
            if conn.generation == generation && conn.cbs.on_input.is_none() {
                conn.cbs.on_input = Some(cb);
            }
        }
    }

    fn invoke_event_cb(&mut self, fd: RawFd, slot: EventSlot) {
        let (generation, mut cb) = {
            let Some(conn) = self.conns.get_mut(fd) else {
                return;
            };
            let Some(cb) = slot(&mut conn.cbs).take() else {
                return;
            };
            (conn.generation, cb)
        };
        cb(self, fd);
        if let Some(conn) = self.conns.get_mut(fd) {
            if conn.generation == generation && slot(&mut conn.cbs).is_none() {
                *slot(&mut conn.cbs) = Some(cb);
            }
        }
    }

    fn invoke_connection_cb(&mut self, fd: RawFd, newfd: RawFd) {
        let (generation, mut cb) = {
            let Some(conn) = self.conns.get_mut(fd) else {
                return;
            };
            let Some(cb) = conn.cbs.on_connection.take() else {
                return;
            };
            (conn.generation, cb)
        };
        cb(self, fd, newfd);
        if let Some(conn) = self.conns.get_mut(fd) {
            if conn.generation == generation && conn.cbs.on_connection.is_none() {
                conn.cbs.on_connection = Some(cb);
            }
        }
    }
}

impl Drop for Mux {
    /// Close every live connection from the highest descriptor down.
    fn drop(&mut self) {
        let Some(mut fd) = self.conns.highest() else {
            return;
        };
        while fd >= 0 {
            if self.conns.get(fd).is_some() {
                self.close(fd);
            }
            fd -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn close_fd(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    fn input_only() -> Callbacks {
        Callbacks::new().on_input(|_, _, _| {})
    }

    #[test]
    fn test_add_invalid_fd() {
        let mut mux = Mux::new().unwrap();
        assert!(matches!(mux.add(-1, input_only()), Err(Error::InvalidFd(-1))));
    }

    #[test]
    fn test_add_out_of_range_fd() {
        let mut mux = Mux::new().unwrap();
        let fd = MAX_DESCRIPTORS as RawFd;
        assert!(matches!(
            mux.add(fd, input_only()),
            Err(Error::FdOutOfRange(_))
        ));
    }

    #[test]
    fn test_add_without_callbacks() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = pipe_pair();
        assert!(matches!(
            mux.add(rd, Callbacks::new()),
            Err(Error::NoCallbacks(_))
        ));
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn test_add_twice() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = pipe_pair();
        mux.add(rd, input_only()).unwrap();
        assert!(matches!(
            mux.add(rd, input_only()),
            Err(Error::AlreadyRegistered(_))
        ));
        mux.remove(rd);
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn test_add_remove_restores_empty() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = pipe_pair();
        assert!(mux.is_empty());
        mux.add(rd, input_only()).unwrap();
        assert!(!mux.is_empty());
        assert_eq!(mux.connection_count(), 1);
        mux.remove(rd);
        assert!(mux.is_empty());
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn test_remove_unknown_is_silent() {
        let mut mux = Mux::new().unwrap();
        mux.remove(1234);
        mux.remove(-1);
    }

    #[test]
    fn test_write_unknown_fd() {
        let mut mux = Mux::new().unwrap();
        assert!(matches!(
            mux.write(1234, b"hi"),
            Err(Error::NotRegistered(1234))
        ));
    }

    #[test]
    fn test_write_clamps_to_capacity() {
        let mut mux = Mux::builder().buffer_capacity(8).build().unwrap();
        let (rd, wr) = pipe_pair();
        mux.add(wr, Callbacks::new().on_eof(|_, _| {})).unwrap();
        assert_eq!(mux.write(wr, b"123456").unwrap(), 6);
        assert_eq!(mux.write(wr, b"123456").unwrap(), 2);
        assert_eq!(mux.write(wr, b"1").unwrap(), 0);
        mux.remove(wr);
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn test_listen_requires_connection_callback() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = pipe_pair();
        mux.add(rd, input_only()).unwrap();
        assert!(matches!(
            mux.listen(rd),
            Err(Error::MissingConnectionCallback(_))
        ));
        assert!(matches!(mux.listen(999), Err(Error::NotRegistered(999))));
        mux.remove(rd);
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn test_set_timeout_unknown_fd() {
        let mut mux = Mux::new().unwrap();
        assert_eq!(mux.set_timeout(999, Some(Duration::from_secs(1))), None);
    }

    #[test]
    fn test_set_timeout_clear_unschedules() {
        let mut mux = Mux::new().unwrap();
        let (rd, wr) = pipe_pair();
        mux.add(rd, Callbacks::new().on_timeout(|_, _| {})).unwrap();
        let id = mux.set_timeout(rd, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(mux.set_timeout(rd, None), None);
        assert!(!mux.unschedule(id));
        mux.remove(rd);
        close_fd(rd);
        close_fd(wr);
    }

    #[test]
    fn test_schedule_ids_increase() {
        let mut mux = Mux::new().unwrap();
        let cb: TimerCb = Rc::new(|_: &mut Mux| {});
        let a = mux.schedule(Duration::from_secs(1), cb.clone()).unwrap();
        let b = mux.schedule(Duration::from_secs(1), cb.clone()).unwrap();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_unschedule_reports_presence() {
        let mut mux = Mux::new().unwrap();
        let cb: TimerCb = Rc::new(|_: &mut Mux| {});
        let id = mux.schedule(Duration::from_secs(5), cb).unwrap();
        assert!(mux.unschedule(id));
        assert!(!mux.unschedule(id));
        assert!(!mux.unschedule(TimerId::new(99999)));
    }

    #[test]
    fn test_unschedule_all_matches_identity() {
        let mut mux = Mux::new().unwrap();
        let shared: TimerCb = Rc::new(|_: &mut Mux| {});
        let other: TimerCb = Rc::new(|_: &mut Mux| {});
        mux.schedule(Duration::from_secs(1), shared.clone()).unwrap();
        mux.schedule(Duration::from_secs(2), shared.clone()).unwrap();
        mux.schedule(Duration::from_secs(3), other.clone()).unwrap();
        assert_eq!(mux.unschedule_all(&shared), 2);
        assert_eq!(mux.unschedule_all(&shared), 0);
        assert_eq!(mux.unschedule_all(&other), 1);
    }

    #[test]
    fn test_reschedule_unknown_creates_fresh() {
        let mut mux = Mux::new().unwrap();
        let cb: TimerCb = Rc::new(|_: &mut Mux| {});
        let id = mux
            .reschedule(TimerId::new(777), Duration::from_secs(1), cb)
            .unwrap();
        assert!(mux.unschedule(id));
    }

    #[test]
    fn test_reschedule_existing_keeps_id() {
        let mut mux = Mux::new().unwrap();
        let fired = Rc::new(RefCell::new(false));
        let fired2 = fired.clone();
        let cb: TimerCb = Rc::new(move |_: &mut Mux| *fired2.borrow_mut() = true);
        let id = mux.schedule(Duration::from_secs(30), cb).unwrap();
        let replacement: TimerCb = Rc::new(|_: &mut Mux| {});
        let id2 = mux
            .reschedule(id, Duration::from_secs(60), replacement)
            .unwrap();
        assert_eq!(id, id2);
        assert!(mux.unschedule(id));
    }

    #[test]
    fn test_close_unknown_is_silent() {
        let mut mux = Mux::new().unwrap();
        mux.close(999);
    }

    #[test]
    fn test_hangup_flag_roundtrip() {
        clear_hangup();
        assert!(!hangup_raised());
        raise_hangup();
        assert!(hangup_raised());
        clear_hangup();
        assert!(!hangup_raised());
    }
}
