//! Failed-login tracking and username lockout.
//!
//! Each username moves through three states:
//!
//! - `Clear`: no recent failures
//! - `Accumulating`: some failures, below the threshold
//! - `Locked`: `max_attempts` or more failures; every login is refused until
//!   `cooldown` has passed since the last failure
//!
//! A record whose last attempt is at least `cooldown` old is treated as
//! reset, whatever state it was in. A successful login also resets it.
//!
//! Credential checks are bracketed by [`LoginAttemptTracker::reserve`] and
//! one of [`LoginAttemptTracker::record_failure`] or
//! [`LoginAttemptTracker::record_success`]. A reservation holds one of the
//! remaining attempts while the password is verified, so concurrent guesses
//! can never evaluate more credentials than the threshold allows.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use super::clock::{duration_ms, Millis};
use super::policy::LockoutRule;

/// Lockout state of a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No recent failures.
    Clear,
    /// Failures recorded, still below the threshold.
    Accumulating { attempts: u32 },
    /// Logins refused for `retry_after`. `attempts` is the number of
    /// failures recorded so far, which may be below the threshold while
    /// the last remaining attempt is being verified.
    Locked { attempts: u32, retry_after: Duration },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }

    /// Failures counted in this state.
    pub fn attempts(&self) -> u32 {
        match self {
            LockState::Clear => 0,
            LockState::Accumulating { attempts } | LockState::Locked { attempts, .. } => *attempts,
        }
    }
}

/// Failed attempts for one username.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginAttemptRecord {
    /// Consecutive failures
    pub attempts: u32,
    /// Attempts reserved whose outcome is not recorded yet
    pub pending: u32,
    /// Time of the most recent attempt
    pub last_attempt: Millis,
}

impl LoginAttemptRecord {
    fn in_use(&self) -> u32 {
        self.attempts.saturating_add(self.pending)
    }
}

/// Tracks failed logins per username and locks out brute-force attempts.
///
/// Thresholds are passed in on every call so a policy reload applies to
/// existing records immediately.
#[derive(Default)]
pub struct LoginAttemptTracker {
    records: DashMap<String, LoginAttemptRecord>,
}

impl LoginAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `username`.
    ///
    /// An expired record is reset here, so a lockout ends exactly when
    /// `now - last_attempt >= cooldown`.
    pub fn check(&self, username: &str, now: Millis, rule: LockoutRule) -> LockState {
        let cooldown_ms = duration_ms(rule.cooldown);

        match self.records.entry(username.to_string()) {
            Entry::Occupied(entry) => {
                let record = *entry.get();
                if expired(&record, now, cooldown_ms) {
                    if record.attempts >= rule.max_attempts {
                        debug!(username = %username, "Login lockout expired");
                    }
                    entry.remove();
                    return LockState::Clear;
                }
                classify(&record, now, rule.max_attempts, cooldown_ms)
            }
            Entry::Vacant(_) => LockState::Clear,
        }
    }

    /// Claim one attempt for `username` before its credentials are checked.
    ///
    /// Returns `Locked` without touching the record when no attempt is
    /// left, counting attempts still being verified. Otherwise the attempt
    /// is held until the outcome is recorded and the state before the
    /// reservation is returned. The decision and the reservation happen
    /// under the same entry lock.
    pub fn reserve(&self, username: &str, now: Millis, rule: LockoutRule) -> LockState {
        let cooldown_ms = duration_ms(rule.cooldown);

        let mut entry = self.records.entry(username.to_string()).or_default();
        let record = entry.value_mut();

        if expired(record, now, cooldown_ms) {
            *record = LoginAttemptRecord::default();
        }

        let state = classify(record, now, rule.max_attempts, cooldown_ms);
        if state.is_locked() {
            return state;
        }

        record.pending = record.pending.saturating_add(1);
        record.last_attempt = record.last_attempt.max(now);
        state
    }

    /// Record a failed credential check and return the resulting state.
    ///
    /// Consumes a reservation if one is held. The failure that brings the
    /// count to `max_attempts` is the one that locks the username.
    pub fn record_failure(&self, username: &str, now: Millis, rule: LockoutRule) -> LockState {
        let cooldown_ms = duration_ms(rule.cooldown);

        let mut entry = self.records.entry(username.to_string()).or_default();
        let record = entry.value_mut();

        if expired(record, now, cooldown_ms) {
            *record = LoginAttemptRecord::default();
        }
        record.pending = record.pending.saturating_sub(1);
        record.attempts = record.attempts.saturating_add(1);
        record.last_attempt = record.last_attempt.max(now);

        let state = classify(record, now, rule.max_attempts, cooldown_ms);
        if record.attempts == rule.max_attempts {
            warn!(
                username = %username,
                attempts = record.attempts,
                lockout_secs = rule.cooldown.as_secs(),
                "Too many failed logins, locking username"
            );
        }
        state
    }

    /// Record a successful login, clearing any failures and reservations.
    pub fn record_success(&self, username: &str) {
        if self.records.remove(username).is_some() {
            debug!(username = %username, "Login succeeded, clearing failed attempts");
        }
    }

    /// Consecutive failures currently counted for `username`.
    pub fn attempts(&self, username: &str, now: Millis, rule: LockoutRule) -> u32 {
        let cooldown_ms = duration_ms(rule.cooldown);
        self.records
            .get(username)
            .filter(|record| !expired(record, now, cooldown_ms))
            .map(|record| record.attempts)
            .unwrap_or(0)
    }

    /// Forget records whose last attempt is at least `cooldown` old.
    /// Returns the number removed.
    ///
    /// Expired records already read as `Clear`, so this never changes a
    /// later decision.
    pub fn sweep(&self, now: Millis, cooldown: Duration) -> usize {
        let cooldown_ms = duration_ms(cooldown);
        let before = self.records.len();

        self.records.retain(|_, record| !expired(record, now, cooldown_ms));

        before.saturating_sub(self.records.len())
    }

    /// Number of tracked usernames.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget every username.
    pub fn clear(&self) {
        self.records.clear();
    }
}

fn expired(record: &LoginAttemptRecord, now: Millis, cooldown_ms: Millis) -> bool {
    now.saturating_sub(record.last_attempt) >= cooldown_ms
}

fn classify(record: &LoginAttemptRecord, now: Millis, max_attempts: u32, cooldown_ms: Millis) -> LockState {
    if record.in_use() >= max_attempts {
        let unlock_at = record.last_attempt.saturating_add(cooldown_ms);
        LockState::Locked {
            attempts: record.attempts,
            retry_after: Duration::from_millis(unlock_at.saturating_sub(now)),
        }
    } else if record.attempts > 0 {
        LockState::Accumulating {
            attempts: record.attempts,
        }
    } else {
        LockState::Clear
    }
}
