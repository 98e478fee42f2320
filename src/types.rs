//! Core types for the fdmux multiplexer.

/// Hard cap on simultaneously registered descriptors.
pub const MAX_DESCRIPTORS: usize = 65535;

/// Default per-descriptor output buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16384;

/// Opaque one-shot timer identifier.
///
/// Ids are non-zero and monotonically increasing for the lifetime of a
/// multiplexer; an id is never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    /// Create a timer id from a raw value.
    ///
    /// This is primarily useful for testing purposes.
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value of the timer id.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Readiness backend selection.
///
/// Determines which kernel primitive drives the blocking wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// Automatically select the feature-richest available backend.
    ///
    /// Edge-triggered readiness (epoll) on Linux, the kernel event queue
    /// (kqueue) on the BSD family, the bitset scan (select) elsewhere.
    #[default]
    Auto,

    /// Edge-triggered readiness set (epoll). Linux only.
    EdgeReadiness,

    /// Kernel event queue with per-descriptor filters (kqueue). BSD/macOS.
    KernelQueue,

    /// Per-iteration bitset scan (select). Available everywhere.
    BitsetScan,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Auto => write!(f, "auto"),
            Backend::EdgeReadiness => write!(f, "edge"),
            Backend::KernelQueue => write!(f, "queue"),
            Backend::BitsetScan => write!(f, "scan"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "edge" | "epoll" => Ok(Backend::EdgeReadiness),
            "queue" | "kqueue" => Ok(Backend::KernelQueue),
            "scan" | "select" => Ok(Backend::BitsetScan),
            _ => Err(format!("unknown backend: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_timer_id_new_and_as_u64() {
        let id = TimerId::new(42);
        assert_eq!(id.as_u64(), 42);
    }

    #[test]
    fn test_timer_id_equality() {
        assert_eq!(TimerId::new(1), TimerId::new(1));
        assert_ne!(TimerId::new(1), TimerId::new(2));
    }

    #[test]
    fn test_timer_id_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(TimerId::new(1));
        set.insert(TimerId::new(2));
        set.insert(TimerId::new(1)); // duplicate
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_backend_default() {
        assert_eq!(Backend::default(), Backend::Auto);
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Auto), "auto");
        assert_eq!(format!("{}", Backend::EdgeReadiness), "edge");
        assert_eq!(format!("{}", Backend::KernelQueue), "queue");
        assert_eq!(format!("{}", Backend::BitsetScan), "scan");
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("auto").unwrap(), Backend::Auto);
        assert_eq!(Backend::from_str("AUTO").unwrap(), Backend::Auto);
        assert_eq!(Backend::from_str("edge").unwrap(), Backend::EdgeReadiness);
        assert_eq!(Backend::from_str("epoll").unwrap(), Backend::EdgeReadiness);
        assert_eq!(Backend::from_str("queue").unwrap(), Backend::KernelQueue);
        assert_eq!(Backend::from_str("kqueue").unwrap(), Backend::KernelQueue);
        assert_eq!(Backend::from_str("scan").unwrap(), Backend::BitsetScan);
        assert_eq!(Backend::from_str("select").unwrap(), Backend::BitsetScan);
    }

    #[test]
    fn test_backend_from_str_error() {
        let result = Backend::from_str("invalid");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("unknown backend"));
    }
}
