//! Admission control: cooldowns, upload quotas and login lockouts.

mod clock;
mod controller;
mod cooldown;
mod decision;
mod identity;
mod login;
mod policy;
mod window;

pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use controller::{AdmissionController, AdmissionRequest, LoginOutcome, TrackedKeys};
pub use cooldown::CooldownGate;
pub use decision::{Admission, Decision, Denial, TOO_MANY_REQUESTS};
pub use identity::Identity;
pub use login::{LockState, LoginAttemptRecord, LoginAttemptTracker};
pub use policy::{file_extension, is_post, ActionKind, AdmissionPolicy, Check, LockoutRule, WindowRule};
pub use window::{SlidingWindowCounter, WindowAdmission};
