//! Multiplexer builder with fluent API.

use crate::error::Error;
use crate::mux::Mux;
use crate::poll::Poller;
use crate::types::{Backend, DEFAULT_BUFFER_CAPACITY};

/// Builder for creating a multiplexer with custom configuration.
///
/// # Example
///
/// ```ignore
/// use fdmux::{Backend, Mux};
///
/// let mux = Mux::builder()
///     .backend(Backend::Auto)
///     .buffer_capacity(32 * 1024)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct MuxBuilder {
    backend: Backend,
    buffer_capacity: usize,
}

impl Default for MuxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            backend: Backend::Auto,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Set the readiness backend to use.
    ///
    /// - `Auto`: feature-richest available backend (default)
    /// - `EdgeReadiness`: epoll (Linux only)
    /// - `KernelQueue`: kqueue (BSD family only)
    /// - `BitsetScan`: select (everywhere)
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the per-descriptor output buffer capacity in bytes.
    ///
    /// Writes beyond this capacity are truncated and reported to the caller.
    /// Default: 16 KB.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Build the multiplexer with the configured settings.
    pub fn build(self) -> Result<Mux, Error> {
        let (poller, resolved) = Poller::open(self.backend)?;
        Ok(Mux::from_parts(poller, resolved, self.buffer_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_new() {
        let builder = MuxBuilder::new();
        assert_eq!(builder.backend, Backend::Auto);
        assert_eq!(builder.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_builder_default() {
        let builder1 = MuxBuilder::new();
        let builder2 = MuxBuilder::default();
        assert_eq!(builder1.backend, builder2.backend);
        assert_eq!(builder1.buffer_capacity, builder2.buffer_capacity);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = MuxBuilder::new()
            .backend(Backend::BitsetScan)
            .buffer_capacity(8192);
        assert_eq!(builder.backend, Backend::BitsetScan);
        assert_eq!(builder.buffer_capacity, 8192);
    }

    #[test]
    fn test_builder_build_auto() {
        let result = MuxBuilder::new().build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_build_bitset_scan() {
        let mux = MuxBuilder::new().backend(Backend::BitsetScan).build().unwrap();
        assert_eq!(mux.backend(), Backend::BitsetScan);
    }

    #[test]
    fn test_auto_resolves_to_concrete_backend() {
        let mux = MuxBuilder::new().build().unwrap();
        assert_ne!(mux.backend(), Backend::Auto);
    }

    #[test]
    #[cfg(not(target_os = "linux"))]
    fn test_edge_readiness_unsupported_off_linux() {
        let result = MuxBuilder::new().backend(Backend::EdgeReadiness).build();
        assert!(matches!(result, Err(Error::UnsupportedBackend(_))));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_kernel_queue_unsupported_on_linux() {
        let result = MuxBuilder::new().backend(Backend::KernelQueue).build();
        assert!(matches!(result, Err(Error::UnsupportedBackend(_))));
    }
}
