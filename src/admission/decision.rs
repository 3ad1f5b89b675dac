//! Admission outcomes handed back to the web layer.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

/// HTTP status for rate limit rejections.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Result of a single limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event was admitted and recorded.
    Admitted,
    /// The event was refused; nothing was recorded.
    Denied {
        /// How long until the same event would be admitted.
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the event was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Retry hint for a denied event.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Admission::Admitted => None,
            Admission::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Why a request was refused.
///
/// `Display` renders the user-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The identity posted again before its cooldown elapsed.
    #[error("Rate limit: wait {}ms before next POST.", .retry_after.as_millis())]
    Cooldown { retry_after: Duration },

    /// The identity used up its upload quota for the current window.
    #[error("Too many uploads")]
    UploadQuota {
        limit: u32,
        window: Duration,
        retry_after: Duration,
    },

    /// The username is locked after too many failed logins.
    #[error("Too many login attempts, please try again later.")]
    LockoutActive { retry_after: Duration },

    /// The upload's file type is not on the allowlist.
    #[error("Illegal file extension")]
    IllegalExtension { extension: String },
}

impl Denial {
    /// Machine-readable reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Denial::Cooldown { .. } => "cooldown",
            Denial::UploadQuota { .. } => "upload_quota",
            Denial::LockoutActive { .. } => "lockout_active",
            Denial::IllegalExtension { .. } => "illegal_extension",
        }
    }

    /// How long the caller should wait before retrying. Zero when waiting
    /// would not help.
    pub fn retry_after(&self) -> Duration {
        match self {
            Denial::Cooldown { retry_after }
            | Denial::UploadQuota { retry_after, .. }
            | Denial::LockoutActive { retry_after } => *retry_after,
            Denial::IllegalExtension { .. } => Duration::ZERO,
        }
    }

    /// Additional explanation shown alongside the message.
    pub fn detail(&self) -> Option<String> {
        match self {
            Denial::UploadQuota { limit, window, .. } => Some(format!(
                "Limit is {} uploads per {} seconds.",
                limit,
                window.as_secs()
            )),
            _ => None,
        }
    }

    /// Lockouts and rejected file types are flashed to the user instead of
    /// answered with an HTTP error.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Denial::LockoutActive { .. } | Denial::IllegalExtension { .. }
        )
    }

    /// HTTP status for the rejection, if it is answered with one.
    pub fn http_status(&self) -> Option<u16> {
        if self.is_warning() {
            None
        } else {
            Some(TOO_MANY_REQUESTS)
        }
    }

    /// JSON body for a 429 response.
    pub fn json_body(&self) -> Option<Value> {
        if self.is_warning() {
            return None;
        }

        let mut body = json!({ "error": self.to_string() });
        if let Some(detail) = self.detail() {
            body["message"] = Value::String(detail);
        }
        Some(body)
    }
}

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Continue with normal route handling.
    Admit,
    /// Reject the request.
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Admit => None,
            Decision::Deny(denial) => Some(denial),
        }
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        self.denial().map(Denial::reason_code)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.denial().map(Denial::retry_after)
    }

    pub fn http_status(&self) -> Option<u16> {
        self.denial().and_then(Denial::http_status)
    }

    pub fn json_body(&self) -> Option<Value> {
        self.denial().and_then(Denial::json_body)
    }

    /// Flash message for a warning-style denial.
    pub fn warning(&self) -> Option<String> {
        self.denial()
            .filter(|denial| denial.is_warning())
            .map(ToString::to_string)
    }

    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Decision::Admit => Ok(()),
            Decision::Deny(denial) => Err(denial),
        }
    }
}

impl From<Result<(), Denial>> for Decision {
    fn from(result: Result<(), Denial>) -> Self {
        match result {
            Ok(()) => Decision::Admit,
            Err(denial) => Decision::Deny(denial),
        }
    }
}

impl From<Denial> for Decision {
    fn from(denial: Denial) -> Self {
        Decision::Deny(denial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_message() {
        let denial = Denial::Cooldown {
            retry_after: Duration::from_millis(500),
        };

        assert_eq!(denial.to_string(), "Rate limit: wait 500ms before next POST.");
        assert_eq!(denial.reason_code(), "cooldown");
        assert_eq!(denial.http_status(), Some(429));
        assert_eq!(
            denial.json_body().unwrap(),
            json!({ "error": "Rate limit: wait 500ms before next POST." })
        );
    }

    #[test]
    fn test_upload_body_reports_window() {
        let denial = Denial::UploadQuota {
            limit: 5,
            window: Duration::from_secs(60),
            retry_after: Duration::from_secs(15),
        };

        assert_eq!(
            denial.json_body().unwrap(),
            json!({
                "error": "Too many uploads",
                "message": "Limit is 5 uploads per 60 seconds."
            })
        );
        assert_eq!(denial.retry_after(), Duration::from_secs(15));
    }

    #[test]
    fn test_lockout_is_a_warning() {
        let decision = Decision::from(Denial::LockoutActive {
            retry_after: Duration::from_secs(30),
        });

        assert!(!decision.is_allowed());
        assert_eq!(decision.http_status(), None);
        assert_eq!(decision.json_body(), None);
        assert_eq!(
            decision.warning().as_deref(),
            Some("Too many login attempts, please try again later.")
        );
        assert_eq!(decision.reason_code(), Some("lockout_active"));
    }

    #[test]
    fn test_illegal_extension_is_a_warning() {
        let denial = Denial::IllegalExtension {
            extension: ".exe".to_string(),
        };

        assert_eq!(denial.reason_code(), "illegal_extension");
        assert_eq!(denial.retry_after(), Duration::ZERO);
        assert_eq!(denial.http_status(), None);
        assert_eq!(
            Decision::from(denial).warning().as_deref(),
            Some("Illegal file extension")
        );
    }

    #[test]
    fn test_admit_has_no_hints() {
        let decision = Decision::Admit;

        assert!(decision.is_allowed());
        assert_eq!(decision.retry_after(), None);
        assert_eq!(decision.warning(), None);
        assert!(decision.into_result().is_ok());
    }

    #[test]
    fn test_admission_retry_after() {
        assert_eq!(Admission::Admitted.retry_after(), None);
        let denied = Admission::Denied {
            retry_after: Duration::from_millis(10),
        };
        assert!(!denied.is_admitted());
        assert_eq!(denied.retry_after(), Some(Duration::from_millis(10)));
    }
}
