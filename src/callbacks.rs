//! Per-descriptor callback sets.

use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::mux::Mux;

/// Input callback: invoked with the bytes read from a ready descriptor.
pub type InputFn = Box<dyn FnMut(&mut Mux, RawFd, &[u8])>;

/// Descriptor event callback (output, timeout, eof).
pub type EventFn = Box<dyn FnMut(&mut Mux, RawFd)>;

/// Connection callback: invoked with the listening descriptor and the
/// freshly accepted one. The callback typically calls [`Mux::add`] for the
/// new descriptor.
pub type AcceptFn = Box<dyn FnMut(&mut Mux, RawFd, RawFd)>;

/// Shared one-shot timer callback handle.
///
/// The handle is an `Rc` so the same callback instance can be scheduled
/// several times and matched by identity in [`Mux::unschedule_all`]; any
/// state the C original would have passed through an opaque pointer is
/// captured by the closure instead.
pub type TimerCb = Rc<dyn Fn(&mut Mux)>;

/// The set of callbacks attached to one descriptor.
///
/// Every field is optional, but [`Mux::add`] rejects a set with no callbacks
/// at all. The presence of [`on_output`](Self::on_output) keeps the
/// descriptor registered for write readiness continuously; without it, write
/// interest is raised only while buffered output is pending.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_input: Option<InputFn>,
    pub(crate) on_output: Option<EventFn>,
    pub(crate) on_timeout: Option<EventFn>,
    pub(crate) on_eof: Option<EventFn>,
    pub(crate) on_connection: Option<AcceptFn>,
}

impl Callbacks {
    /// Create an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked with the bytes read when the descriptor becomes readable.
    pub fn on_input(mut self, f: impl FnMut(&mut Mux, RawFd, &[u8]) + 'static) -> Self {
        self.on_input = Some(Box::new(f));
        self
    }

    /// Invoked when the descriptor is writable and the output buffer is
    /// empty; the callback is expected to refill it via [`Mux::write`].
    pub fn on_output(mut self, f: impl FnMut(&mut Mux, RawFd) + 'static) -> Self {
        self.on_output = Some(Box::new(f));
        self
    }

    /// Invoked when the timeout associated with the descriptor via
    /// [`Mux::set_timeout`] expires.
    pub fn on_timeout(mut self, f: impl FnMut(&mut Mux, RawFd) + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    /// Invoked exactly once when the descriptor is closed, after any pending
    /// output has been drained.
    pub fn on_eof(mut self, f: impl FnMut(&mut Mux, RawFd) + 'static) -> Self {
        self.on_eof = Some(Box::new(f));
        self
    }

    /// Invoked for every descriptor accepted on a listening socket.
    pub fn on_connection(mut self, f: impl FnMut(&mut Mux, RawFd, RawFd) + 'static) -> Self {
        self.on_connection = Some(Box::new(f));
        self
    }

    /// Whether no callback is set at all.
    pub fn is_empty(&self) -> bool {
        self.on_input.is_none()
            && self.on_output.is_none()
            && self.on_timeout.is_none()
            && self.on_eof.is_none()
            && self.on_connection.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set() {
        assert!(Callbacks::new().is_empty());
    }

    #[test]
    fn test_single_callback_is_not_empty() {
        assert!(!Callbacks::new().on_input(|_, _, _| {}).is_empty());
        assert!(!Callbacks::new().on_eof(|_, _| {}).is_empty());
        assert!(!Callbacks::new().on_connection(|_, _, _| {}).is_empty());
    }

    #[test]
    fn test_chaining() {
        let cbs = Callbacks::new()
            .on_input(|_, _, _| {})
            .on_output(|_, _| {})
            .on_timeout(|_, _| {})
            .on_eof(|_, _| {})
            .on_connection(|_, _, _| {});
        assert!(cbs.on_input.is_some());
        assert!(cbs.on_output.is_some());
        assert!(cbs.on_timeout.is_some());
        assert!(cbs.on_eof.is_some());
        assert!(cbs.on_connection.is_some());
    }
}
