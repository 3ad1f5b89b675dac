//! Sliding-window event counter.

use std::collections::VecDeque;
use std::hash::Hash;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::clock::{duration_ms, Millis};
use super::decision::Admission;

/// Outcome of a sliding-window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAdmission {
    /// Whether the event was admitted.
    pub admission: Admission,
    /// Events inside the window after the check, oldest first. Includes the
    /// new event when it was admitted.
    pub retained: Vec<Millis>,
}

impl WindowAdmission {
    pub fn is_admitted(&self) -> bool {
        self.admission.is_admitted()
    }
}

/// Counts events per key over a trailing time window.
///
/// An event at `t` is inside the window at `now` while `now - t < window`.
/// The check-and-record cycle for one key runs under that key's shard
/// lock, so concurrent callers can never overshoot the limit.
pub struct SlidingWindowCounter<K> {
    /// Admitted event timestamps per key, oldest first
    events: DashMap<K, VecDeque<Millis>>,
}

impl<K: Eq + Hash + Clone> SlidingWindowCounter<K> {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    /// Admit and record an event for `key` if fewer than `limit` events
    /// fall inside the window ending at `now`.
    ///
    /// A denied event is not recorded and leaves the stored sequence
    /// untouched.
    pub fn admit(&self, key: &K, now: Millis, window: Duration, limit: u32) -> WindowAdmission {
        let window_ms = duration_ms(window);
        let limit = limit as usize;

        match self.events.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let in_window: Vec<Millis> = entry
                    .get()
                    .iter()
                    .copied()
                    .filter(|&t| within(t, now, window_ms))
                    .collect();

                if in_window.len() >= limit {
                    let retry_after = retry_after(&in_window, now, window_ms, limit);
                    trace!(count = in_window.len(), limit, "Sliding window full");
                    return WindowAdmission {
                        admission: Admission::Denied { retry_after },
                        retained: in_window,
                    };
                }

                let events = entry.get_mut();
                events.retain(|&t| within(t, now, window_ms));
                events.push_back(now);

                WindowAdmission {
                    admission: Admission::Admitted,
                    retained: events.iter().copied().collect(),
                }
            }
            Entry::Vacant(entry) => {
                if limit == 0 {
                    return WindowAdmission {
                        admission: Admission::Denied {
                            retry_after: window,
                        },
                        retained: Vec::new(),
                    };
                }

                entry.insert(VecDeque::from([now]));
                WindowAdmission {
                    admission: Admission::Admitted,
                    retained: vec![now],
                }
            }
        }
    }

    /// Number of recorded events for `key` inside the window ending at `now`.
    pub fn count(&self, key: &K, now: Millis, window: Duration) -> usize {
        let window_ms = duration_ms(window);
        self.events
            .get(key)
            .map(|events| events.iter().filter(|&&t| within(t, now, window_ms)).count())
            .unwrap_or(0)
    }

    /// Drop expired events and forget keys left with none.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: Millis, window: Duration) -> usize {
        let window_ms = duration_ms(window);
        let before = self.events.len();

        self.events.retain(|_, events| {
            events.retain(|&t| within(t, now, window_ms));
            !events.is_empty()
        });

        before.saturating_sub(self.events.len())
    }

    /// Cap the number of tracked keys, evicting the keys whose most recent
    /// event is oldest.
    ///
    /// Returns the number of keys removed.
    pub fn evict_to(&self, max_keys: usize) -> usize {
        let current = self.events.len();
        if current <= max_keys {
            return 0;
        }

        let mut entries: Vec<(K, Millis)> = self
            .events
            .iter()
            .map(|e| (e.key().clone(), e.value().back().copied().unwrap_or(0)))
            .collect();
        entries.sort_by_key(|(_, newest)| *newest);

        let to_remove = current - max_keys;
        for (key, _) in entries.into_iter().take(to_remove) {
            self.events.remove(&key);
        }
        to_remove
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.events.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for SlidingWindowCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn within(t: Millis, now: Millis, window_ms: Millis) -> bool {
    now.saturating_sub(t) < window_ms
}

/// Time until enough events leave the window for one more to fit.
fn retry_after(in_window: &[Millis], now: Millis, window_ms: Millis, limit: usize) -> Duration {
    match in_window.get(in_window.len() - limit) {
        Some(&t) if limit > 0 => {
            Duration::from_millis(t.saturating_add(window_ms).saturating_sub(now))
        }
        _ => Duration::from_millis(window_ms),
    }
}
