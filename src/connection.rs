//! Connection records and the descriptor-indexed registry.

use std::os::unix::io::RawFd;

use crate::callbacks::Callbacks;
use crate::types::{TimerId, MAX_DESCRIPTORS};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct ConnFlags: u32 {
        /// The descriptor is a listening socket.
        const SERVER = 1 << 0;
    }
}

/// State attached to one registered descriptor.
pub(crate) struct Connection {
    pub(crate) flags: ConnFlags,
    pub(crate) cbs: Callbacks,
    /// Pending output, bounded by the multiplexer's buffer capacity.
    pub(crate) outbuf: Vec<u8>,
    /// Set once teardown has begun so `on_eof` fires exactly once.
    pub(crate) eof: bool,
    /// Timer associated via `set_timeout`, if any.
    pub(crate) timeout_id: Option<TimerId>,
    /// Stale-slot detection: bumped for every insertion so a callback that
    /// removed and re-added the same fd is never handed old state.
    pub(crate) generation: u64,
}

impl Connection {
    pub(crate) fn new(cbs: Callbacks, capacity: usize) -> Self {
        Self {
            flags: ConnFlags::empty(),
            cbs,
            outbuf: Vec::with_capacity(capacity),
            eof: false,
            timeout_id: None,
            generation: 0,
        }
    }

    pub(crate) fn is_server(&self) -> bool {
        self.flags.contains(ConnFlags::SERVER)
    }
}

/// Cursor marker: `minfd` when the registry is empty (+inf).
const EMPTY_MIN: RawFd = MAX_DESCRIPTORS as RawFd;
/// Cursor marker: `maxfd` when the registry is empty (-1).
const EMPTY_MAX: RawFd = -1;

/// Dense registry indexed by descriptor.
///
/// `minfd` and `maxfd` bound the occupied range; when the registry is empty
/// they hold the -1/+inf markers. Every slot in `[minfd, maxfd]` is either
/// occupied or empty, and both endpoints are always occupied when the
/// registry is non-empty.
pub(crate) struct ConnectionTable {
    slots: Vec<Option<Box<Connection>>>,
    minfd: RawFd,
    maxfd: RawFd,
    count: usize,
    next_generation: u64,
}

impl ConnectionTable {
    pub(crate) fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_DESCRIPTORS);
        slots.resize_with(MAX_DESCRIPTORS, || None);
        Self {
            slots,
            minfd: EMPTY_MIN,
            maxfd: EMPTY_MAX,
            count: 0,
            next_generation: 1,
        }
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<&Connection> {
        if fd < 0 || fd as usize >= MAX_DESCRIPTORS {
            return None;
        }
        self.slots[fd as usize].as_deref()
    }

    pub(crate) fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        if fd < 0 || fd as usize >= MAX_DESCRIPTORS {
            return None;
        }
        self.slots[fd as usize].as_deref_mut()
    }

    /// Insert a record for `fd`. The slot must be empty and in range.
    /// Returns the generation assigned to the record.
    pub(crate) fn insert(&mut self, fd: RawFd, mut conn: Connection) -> u64 {
        debug_assert!(fd >= 0 && (fd as usize) < MAX_DESCRIPTORS);
        debug_assert!(self.slots[fd as usize].is_none());

        let generation = self.next_generation;
        self.next_generation += 1;
        conn.generation = generation;

        self.slots[fd as usize] = Some(Box::new(conn));
        self.count += 1;
        if fd < self.minfd {
            self.minfd = fd;
        }
        if fd > self.maxfd {
            self.maxfd = fd;
        }
        generation
    }

    /// Take the record for `fd`, rewinding `maxfd` downward and advancing
    /// `minfd` upward past any now-empty slots.
    pub(crate) fn remove(&mut self, fd: RawFd) -> Option<Box<Connection>> {
        if fd < 0 || fd as usize >= MAX_DESCRIPTORS {
            return None;
        }
        let conn = self.slots[fd as usize].take()?;
        self.count -= 1;

        if self.count == 0 {
            self.minfd = EMPTY_MIN;
            self.maxfd = EMPTY_MAX;
            return Some(conn);
        }
        if fd == self.maxfd {
            while self.maxfd >= 0 && self.slots[self.maxfd as usize].is_none() {
                self.maxfd -= 1;
            }
        }
        if fd == self.minfd {
            while self.minfd < self.maxfd && self.slots[self.minfd as usize].is_none() {
                self.minfd += 1;
            }
        }
        Some(conn)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Highest occupied descriptor, if any.
    pub(crate) fn highest(&self) -> Option<RawFd> {
        if self.count == 0 {
            None
        } else {
            Some(self.maxfd)
        }
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> (RawFd, RawFd) {
        (self.minfd, self.maxfd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() -> Connection {
        Connection::new(Callbacks::new().on_input(|_, _, _| {}), 64)
    }

    #[test]
    fn test_empty_markers() {
        let table = ConnectionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.cursors(), (EMPTY_MIN, EMPTY_MAX));
        assert_eq!(table.highest(), None);
    }

    #[test]
    fn test_insert_updates_cursors() {
        let mut table = ConnectionTable::new();
        table.insert(7, dummy());
        assert_eq!(table.cursors(), (7, 7));
        table.insert(3, dummy());
        assert_eq!(table.cursors(), (3, 7));
        table.insert(12, dummy());
        assert_eq!(table.cursors(), (3, 12));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_remove_rewinds_cursors() {
        let mut table = ConnectionTable::new();
        table.insert(3, dummy());
        table.insert(7, dummy());
        table.insert(12, dummy());

        table.remove(12);
        assert_eq!(table.cursors(), (3, 7));
        table.remove(3);
        assert_eq!(table.cursors(), (7, 7));
        table.remove(7);
        assert_eq!(table.cursors(), (EMPTY_MIN, EMPTY_MAX));
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_interior_keeps_cursors() {
        let mut table = ConnectionTable::new();
        table.insert(3, dummy());
        table.insert(7, dummy());
        table.insert(12, dummy());
        table.remove(7);
        assert_eq!(table.cursors(), (3, 12));
    }

    #[test]
    fn test_remove_empty_slot_is_none() {
        let mut table = ConnectionTable::new();
        assert!(table.remove(5).is_none());
        assert!(table.remove(-1).is_none());
        assert!(table.remove(MAX_DESCRIPTORS as RawFd).is_none());
    }

    #[test]
    fn test_reinsert_bumps_generation() {
        let mut table = ConnectionTable::new();
        let g1 = table.insert(5, dummy());
        table.remove(5);
        let g2 = table.insert(5, dummy());
        assert!(g2 > g1);
    }

    #[test]
    fn test_out_of_range_get() {
        let table = ConnectionTable::new();
        assert!(table.get(-1).is_none());
        assert!(table.get(MAX_DESCRIPTORS as RawFd).is_none());
    }
}
