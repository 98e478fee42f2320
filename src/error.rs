use std::io;
use std::os::unix::io::RawFd;

use crate::types::Backend;

/// Errors returned by the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Negative descriptor.
    #[error("fd {0} is invalid")]
    InvalidFd(RawFd),
    /// Descriptor at or beyond the registration cap.
    #[error("fd {0} exceeds the descriptor limit")]
    FdOutOfRange(RawFd),
    /// Descriptor already registered with this multiplexer.
    #[error("fd {0} already added")]
    AlreadyRegistered(RawFd),
    /// Empty callback set supplied to `add`.
    #[error("no callbacks specified for fd {0}")]
    NoCallbacks(RawFd),
    /// `listen` requires a connection callback on the descriptor.
    #[error("no connection callback installed for fd {0}")]
    MissingConnectionCallback(RawFd),
    /// Operation on a descriptor the multiplexer does not know about.
    #[error("fd {0} is not registered")]
    NotRegistered(RawFd),
    /// The requested backend is not available on this platform.
    #[error("backend {0} is not supported on this platform")]
    UnsupportedBackend(Backend),
    /// The kernel rejected a backend operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings() {
        assert_eq!(format!("{}", Error::InvalidFd(-1)), "fd -1 is invalid");
        assert_eq!(format!("{}", Error::AlreadyRegistered(5)), "fd 5 already added");
        assert_eq!(
            format!("{}", Error::UnsupportedBackend(Backend::KernelQueue)),
            "backend queue is not supported on this platform"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
