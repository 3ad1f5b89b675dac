//! Fixed-interval cooldown gate.

use std::hash::Hash;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::clock::{duration_ms, Millis};
use super::decision::Admission;

/// Admits at most one event per key per cooldown interval.
pub struct CooldownGate<K> {
    /// Time of the last admitted event per key
    last_admitted: DashMap<K, Millis>,
}

impl<K: Eq + Hash + Clone> CooldownGate<K> {
    pub fn new() -> Self {
        Self {
            last_admitted: DashMap::new(),
        }
    }

    /// Admit an event for `key` if at least `cooldown` has passed since its
    /// last admitted event.
    ///
    /// A key seen for the first time is always admitted. A denial leaves the
    /// stored time unchanged and reports the remaining wait, which is
    /// always non-zero.
    pub fn admit(&self, key: &K, now: Millis, cooldown: Duration) -> Admission {
        let cooldown_ms = duration_ms(cooldown);

        match self.last_admitted.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.saturating_sub(*entry.get());
                if elapsed >= cooldown_ms {
                    entry.insert(now);
                    Admission::Admitted
                } else {
                    Admission::Denied {
                        retry_after: Duration::from_millis(cooldown_ms - elapsed),
                    }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Admission::Admitted
            }
        }
    }

    /// When `key` was last admitted.
    pub fn last_admitted(&self, key: &K) -> Option<Millis> {
        self.last_admitted.get(key).map(|last| *last)
    }

    /// Forget keys whose cooldown has fully elapsed.
    ///
    /// Such keys would be admitted anyway, so this never changes a later
    /// decision. Returns the number of keys removed.
    pub fn sweep(&self, now: Millis, cooldown: Duration) -> usize {
        let cooldown_ms = duration_ms(cooldown);
        let before = self.last_admitted.len();

        self.last_admitted
            .retain(|_, last| now.saturating_sub(*last) < cooldown_ms);

        before.saturating_sub(self.last_admitted.len())
    }

    /// Cap the number of tracked keys, evicting the least recently admitted.
    ///
    /// Returns the number of keys removed.
    pub fn evict_to(&self, max_keys: usize) -> usize {
        let current = self.last_admitted.len();
        if current <= max_keys {
            return 0;
        }

        let mut entries: Vec<(K, Millis)> = self
            .last_admitted
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, last)| *last);

        let to_remove = current - max_keys;
        for (key, _) in entries.into_iter().take(to_remove) {
            self.last_admitted.remove(&key);
        }
        to_remove
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.last_admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_admitted.is_empty()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.last_admitted.clear();
    }
}

impl<K: Eq + Hash + Clone> Default for CooldownGate<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(1000);

    #[test]
    fn test_post_scenario() {
        let gate = CooldownGate::new();
        let key = "u1".to_string();

        assert_eq!(gate.admit(&key, 0, COOLDOWN), Admission::Admitted);
        assert_eq!(
            gate.admit(&key, 500, COOLDOWN),
            Admission::Denied {
                retry_after: Duration::from_millis(500)
            }
        );
        assert_eq!(gate.admit(&key, 1000, COOLDOWN), Admission::Admitted);
    }

    #[test]
    fn test_wait_is_cooldown_minus_elapsed() {
        let gate = CooldownGate::new();
        let key = "k".to_string();
        gate.admit(&key, 10_000, COOLDOWN);

        for elapsed in [0, 1, 250, 999] {
            let result = gate.admit(&key, 10_000 + elapsed, COOLDOWN);
            assert_eq!(
                result.retry_after(),
                Some(Duration::from_millis(1000 - elapsed))
            );
        }
    }

    #[test]
    fn test_denial_does_not_move_last_admitted() {
        let gate = CooldownGate::new();
        let key = "k".to_string();

        gate.admit(&key, 0, COOLDOWN);
        assert!(!gate.admit(&key, 900, COOLDOWN).is_admitted());
        assert_eq!(gate.last_admitted(&key), Some(0));

        // Measured from t=0, not from the denied attempt at t=900.
        assert!(gate.admit(&key, 1000, COOLDOWN).is_admitted());
        assert_eq!(gate.last_admitted(&key), Some(1000));
    }

    #[test]
    fn test_zero_cooldown_always_admits() {
        let gate = CooldownGate::new();
        let key = "k".to_string();

        for _ in 0..3 {
            assert!(gate.admit(&key, 5, Duration::ZERO).is_admitted());
        }
    }

    #[test]
    fn test_clock_going_backwards_denies() {
        let gate = CooldownGate::new();
        let key = "k".to_string();

        gate.admit(&key, 5000, COOLDOWN);
        assert_eq!(
            gate.admit(&key, 4000, COOLDOWN).retry_after(),
            Some(COOLDOWN)
        );
    }

    #[test]
    fn test_sweep_only_removes_elapsed_keys() {
        let gate = CooldownGate::new();
        let old = "old".to_string();
        let recent = "recent".to_string();

        gate.admit(&old, 0, COOLDOWN);
        gate.admit(&recent, 1500, COOLDOWN);

        assert_eq!(gate.sweep(2000, COOLDOWN), 1);
        assert_eq!(gate.last_admitted(&old), None);
        assert!(!gate.admit(&recent, 2000, COOLDOWN).is_admitted());
    }

    #[test]
    fn test_evict_to_removes_oldest() {
        let gate = CooldownGate::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            gate.admit(&name.to_string(), i as u64, COOLDOWN);
        }

        assert_eq!(gate.evict_to(1), 2);
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.last_admitted(&"c".to_string()), Some(2));
    }
}
