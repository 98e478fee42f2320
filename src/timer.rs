//! One-shot timer records kept in an ascending list.

use std::rc::Rc;
use std::time::Duration;

use crate::callbacks::TimerCb;
use crate::types::TimerId;

/// A pending one-shot timer.
pub(crate) struct Timeout {
    pub(crate) id: TimerId,
    /// Remaining wait, decayed by elapsed wall time every iteration.
    pub(crate) remaining: Duration,
    pub(crate) cb: TimerCb,
    /// Whether the backend holds a kernel timer for this entry. Armed
    /// entries fire as backend events; unarmed ones fire from the sweep.
    pub(crate) armed: bool,
}

/// Timers ordered ascending by remaining wait.
///
/// Insertion is linear; the list stays small in practice. Equal-time entries
/// keep their insertion order so ties fire first-scheduled-first.
pub(crate) struct TimerList {
    entries: Vec<Timeout>,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert at the sorted position, after any entry with an equal wait.
    pub(crate) fn insert(&mut self, timeout: Timeout) {
        let pos = self
            .entries
            .partition_point(|e| e.remaining <= timeout.remaining);
        self.entries.insert(pos, timeout);
    }

    pub(crate) fn remove_by_id(&mut self, id: TimerId) -> Option<Timeout> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove every entry sharing the callback handle's identity.
    pub(crate) fn remove_matching(&mut self, cb: &TimerCb) -> Vec<Timeout> {
        let all = std::mem::take(&mut self.entries);
        let (removed, kept): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|e| Rc::ptr_eq(&e.cb, cb));
        self.entries = kept;
        removed
    }

    /// Remaining wait of the earliest timer.
    pub(crate) fn head_remaining(&self) -> Option<Duration> {
        self.entries.first().map(|e| e.remaining)
    }

    /// Take the first due entry that is not backed by a kernel timer.
    ///
    /// Armed entries with zero remaining stay in the list; their backend
    /// event is about to be delivered.
    pub(crate) fn pop_due(&mut self) -> Option<Timeout> {
        let pos = self
            .entries
            .iter()
            .take_while(|e| e.remaining.is_zero())
            .position(|e| !e.armed)?;
        Some(self.entries.remove(pos))
    }

    /// Subtract elapsed wall time from every remaining wait. Saturating, so
    /// an overdue entry sits at zero; ordering is preserved.
    pub(crate) fn decay(&mut self, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        for entry in &mut self.entries {
            entry.remaining = entry.remaining.saturating_sub(elapsed);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<TimerId> {
        self.entries.iter().map(|e| e.id).collect()
    }
}
