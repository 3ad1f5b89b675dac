//! Request admission controller.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::{Clock, Millis, SystemClock};
use super::cooldown::CooldownGate;
use super::decision::{Admission, Decision, Denial};
use super::identity::Identity;
use super::login::{LockState, LoginAttemptTracker};
use super::policy::{file_extension, ActionKind, AdmissionPolicy, Check, LockoutRule, WindowRule};
use super::window::SlidingWindowCounter;

/// An inbound request as seen by the admission layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// HTTP method
    pub method: String,
    /// Who is making the request
    pub identity: Identity,
    /// What the request is trying to do
    pub action: ActionKind,
    /// Submitted username, for login requests
    pub username: Option<String>,
    /// Name of the attached file, for uploads
    pub filename: Option<String>,
    /// Request time
    pub now: Millis,
}

impl AdmissionRequest {
    pub fn new(method: impl Into<String>, identity: Identity, action: ActionKind, now: Millis) -> Self {
        Self {
            method: method.into(),
            identity,
            action,
            username: None,
            filename: None,
            now,
        }
    }

    /// A POST request.
    pub fn post(identity: Identity, action: ActionKind, now: Millis) -> Self {
        Self::new("POST", identity, action, now)
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Result of a full login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials accepted; failures cleared.
    Succeeded,
    /// Credentials rejected; the failure was recorded.
    Rejected(LockState),
    /// The username is locked; credentials were not checked.
    Locked { retry_after: Duration },
}

/// Number of keys held by each store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackedKeys {
    pub cooldowns: usize,
    pub uploads: usize,
    pub logins: usize,
}

impl TrackedKeys {
    pub fn total(&self) -> usize {
        self.cooldowns + self.uploads + self.logins
    }
}

/// Decides whether requests may proceed and records the events later
/// decisions depend on.
///
/// One instance is built at start-up and shared across request handlers.
/// All checks are short CPU-only critical sections and never block on I/O.
pub struct AdmissionController {
    /// Current thresholds
    policy: RwLock<AdmissionPolicy>,
    /// Time source for callers that do not supply their own timestamp
    clock: Arc<dyn Clock>,
    /// Last admitted POST per identity
    cooldowns: CooldownGate<Identity>,
    /// Recent uploads per identity
    uploads: SlidingWindowCounter<Identity>,
    /// Failed logins per username
    logins: LoginAttemptTracker,
}

impl AdmissionController {
    /// Create a controller using the system clock.
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a controller with a custom clock.
    pub fn with_clock(policy: AdmissionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy: RwLock::new(policy),
            clock,
            cooldowns: CooldownGate::new(),
            uploads: SlidingWindowCounter::new(),
            logins: LoginAttemptTracker::new(),
        }
    }

    /// Get the current policy.
    pub fn policy(&self) -> AdmissionPolicy {
        self.policy.read().clone()
    }

    /// Replace the policy. Recorded state is kept.
    pub fn set_policy(&self, policy: AdmissionPolicy) {
        let mut current = self.policy.write();
        *current = policy;
    }

    /// Current time according to the controller's clock.
    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    /// Run every check the policy assigns to this request, in order, and
    /// stop at the first denial.
    ///
    /// Checks that already passed keep their effect when a later one denies,
    /// so a POST refused for its upload quota still starts a new cooldown.
    ///
    /// An admitted login holds one of the username's remaining attempts
    /// until the outcome is recorded with [`Self::record_login_failure`] or
    /// [`Self::record_login_success`].
    pub fn admit(&self, request: &AdmissionRequest) -> Decision {
        let checks = self.policy.read().checks_for(&request.method, request.action);

        trace!(
            identity = %request.identity,
            method = %request.method,
            action = ?request.action,
            checks = checks.len(),
            "Checking admission"
        );

        for check in checks {
            let result = match check {
                Check::Cooldown(cooldown) => {
                    self.check_cooldown(&request.identity, request.now, cooldown)
                }
                Check::UploadExtension(allowed) => match request.filename.as_deref() {
                    Some(filename) if !filename.is_empty() => check_extension(filename, &allowed),
                    // No attachment.
                    _ => Ok(()),
                },
                Check::UploadWindow(rule) => self.check_upload(&request.identity, request.now, rule),
                Check::LoginLockout(rule) => match request.username.as_deref() {
                    Some(username) => self.check_lockout(username, request.now, rule),
                    // No username, no credentials to evaluate.
                    None => Ok(()),
                },
            };

            if let Err(denial) = result {
                debug!(
                    identity = %request.identity,
                    reason = denial.reason_code(),
                    retry_after_ms = denial.retry_after().as_millis() as u64,
                    "Request denied"
                );
                return Decision::Deny(denial);
            }
        }

        Decision::Admit
    }

    /// Apply only the POST cooldown for `identity`.
    pub fn admit_post(&self, identity: &Identity, now: Millis) -> Decision {
        let cooldown = self.policy.read().post_cooldown;
        self.check_cooldown(identity, now, cooldown).into()
    }

    /// Apply only the upload quota for `identity`.
    pub fn admit_upload(&self, identity: &Identity, now: Millis) -> Decision {
        let rule = self.policy.read().upload;
        self.check_upload(identity, now, rule).into()
    }

    /// Lockout state of `username`.
    pub fn check_login(&self, username: &str, now: Millis) -> LockState {
        let rule = self.policy.read().login;
        self.logins.check(username, now, rule)
    }

    /// Record a failed credential check.
    pub fn record_login_failure(&self, username: &str, now: Millis) -> LockState {
        let rule = self.policy.read().login;
        self.logins.record_failure(username, now, rule)
    }

    /// Record a successful login.
    pub fn record_login_success(&self, username: &str) {
        self.logins.record_success(username);
    }

    /// Run a login attempt end to end.
    ///
    /// `verify` is only called when an attempt could be reserved for the
    /// username. Its result is recorded as a success or a failure.
    pub fn attempt_login<F>(&self, username: &str, now: Millis, verify: F) -> LoginOutcome
    where
        F: FnOnce() -> bool,
    {
        let rule = self.policy.read().login;
        if let LockState::Locked { retry_after, .. } = self.logins.reserve(username, now, rule) {
            return LoginOutcome::Locked { retry_after };
        }

        if verify() {
            self.record_login_success(username);
            LoginOutcome::Succeeded
        } else {
            LoginOutcome::Rejected(self.record_login_failure(username, now))
        }
    }

    /// Drop expired state from every store, then cap the cooldown and
    /// upload stores to the policy's key limit.
    ///
    /// Login records are only dropped once expired, so a sweep never lifts
    /// a lockout early. Returns the number of keys removed.
    pub fn sweep(&self, now: Millis) -> usize {
        let policy = self.policy();

        let cooldowns = self.cooldowns.sweep(now, policy.post_cooldown)
            + self.cooldowns.evict_to(policy.max_tracked_keys);
        let uploads = self.uploads.sweep(now, policy.upload.window)
            + self.uploads.evict_to(policy.max_tracked_keys);
        let logins = self.logins.sweep(now, policy.login.cooldown);

        let removed = cooldowns + uploads + logins;
        if removed > 0 {
            debug!(cooldowns, uploads, logins, "Swept admission state");
        }
        removed
    }

    /// Spawn a task that sweeps every `interval` until the controller is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                let now = controller.now();
                controller.sweep(now);
            }
        })
    }

    /// Number of keys in each store.
    pub fn tracked_keys(&self) -> TrackedKeys {
        TrackedKeys {
            cooldowns: self.cooldowns.len(),
            uploads: self.uploads.len(),
            logins: self.logins.len(),
        }
    }

    /// Forget all recorded state.
    pub fn clear(&self) {
        self.cooldowns.clear();
        self.uploads.clear();
        self.logins.clear();
    }

    fn check_cooldown(&self, identity: &Identity, now: Millis, cooldown: Duration) -> Result<(), Denial> {
        match self.cooldowns.admit(identity, now, cooldown) {
            Admission::Admitted => Ok(()),
            Admission::Denied { retry_after } => Err(Denial::Cooldown { retry_after }),
        }
    }

    fn check_upload(&self, identity: &Identity, now: Millis, rule: WindowRule) -> Result<(), Denial> {
        let result = self.uploads.admit(identity, now, rule.window, rule.limit);
        match result.admission {
            Admission::Admitted => Ok(()),
            Admission::Denied { retry_after } => Err(Denial::UploadQuota {
                limit: rule.limit,
                window: rule.window,
                retry_after,
            }),
        }
    }

    fn check_lockout(&self, username: &str, now: Millis, rule: LockoutRule) -> Result<(), Denial> {
        match self.logins.reserve(username, now, rule) {
            LockState::Locked { retry_after, .. } => Err(Denial::LockoutActive { retry_after }),
            LockState::Clear | LockState::Accumulating { .. } => Ok(()),
        }
    }
}

fn check_extension(filename: &str, allowed: &[String]) -> Result<(), Denial> {
    let extension = file_extension(filename).unwrap_or_default();
    if allowed.iter().any(|ext| *ext == extension) {
        Ok(())
    } else {
        debug!(filename = %filename, "Rejected upload extension");
        Err(Denial::IllegalExtension { extension })
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionPolicy::default())
    }
}
