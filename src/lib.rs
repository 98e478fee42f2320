//! fdmux - single-threaded I/O multiplexer with pluggable readiness backends.
//!
//! This crate owns a set of non-blocking file descriptors and drives user
//! callbacks when those descriptors become ready for reading, writing,
//! accepting, or when they hang up, together with scheduled one-shot timers.
//! Everything runs on the thread that calls [`Mux::run`] or [`Mux::run_loop`];
//! there are no internal locks and no worker threads.
//!
//! # Features
//!
//! - **Selectable backend**: an edge-triggered epoll backend on Linux, a
//!   kqueue backend on the BSD family, and a portable select fallback.
//! - **Per-descriptor write buffering**: writes never block; excess bytes are
//!   dropped and reported to the caller.
//! - **Unified timers**: one-shot timers share the blocking wait with I/O
//!   readiness, backed by kernel timers where the backend supports them.
//! - **Re-entrant callbacks**: callbacks may add, remove, or close any
//!   descriptor on the same multiplexer, including their own.
//!
//! # Quick Start
//!
//! ```ignore
//! use fdmux::{Callbacks, Mux};
//! use std::time::Duration;
//!
//! let mut mux = Mux::new()?;
//!
//! // Register an already-listening socket; accepted descriptors are handed
//! // to the connection callback, which typically adds them to the mux.
//! mux.add(
//!     listener_fd,
//!     Callbacks::new().on_connection(|mux, _listener, newfd| {
//!         let cbs = Callbacks::new().on_input(|mux, fd, data| {
//!             // Echo whatever arrives.
//!             let _ = mux.write(fd, data);
//!         });
//!         let _ = mux.add(newfd, cbs);
//!     }),
//! )?;
//! mux.listen(listener_fd)?;
//!
//! // Stop the loop after five seconds.
//! mux.schedule(Duration::from_secs(5), std::rc::Rc::new(|mux| mux.end_loop()))?;
//!
//! mux.run_loop(1);
//! ```
//!
//! # Backend Selection
//!
//! The backend is chosen when the multiplexer is built; [`Backend::Auto`]
//! picks the feature-richest one available on the platform:
//!
//! ```ignore
//! use fdmux::{Backend, Mux};
//!
//! // Force the portable select backend.
//! let mux = Mux::builder().backend(Backend::BitsetScan).build()?;
//! ```

mod builder;
mod callbacks;
mod connection;
mod error;
mod mux;
mod poll;
mod timer;
mod types;

// Re-exports
pub use builder::MuxBuilder;
pub use callbacks::{AcceptFn, Callbacks, EventFn, InputFn, TimerCb};
pub use error::Error;
pub use mux::{clear_hangup, hangup_raised, raise_hangup, Mux};
pub use types::{Backend, TimerId, DEFAULT_BUFFER_CAPACITY, MAX_DESCRIPTORS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_new() {
        let result = Mux::new();
        assert!(result.is_ok());
    }

    #[test]
    fn test_mux_builder() {
        let result = Mux::builder().build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_new_mux_is_empty() {
        let mux = Mux::new().unwrap();
        assert!(mux.is_empty());
        assert_eq!(mux.connection_count(), 0);
    }
}
