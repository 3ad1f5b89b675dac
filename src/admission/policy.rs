//! Admission policy table.
//!
//! This is the one place that decides which checks run for a request and
//! with which thresholds. Route handlers never carry their own limits.

use std::path::Path;
use std::time::Duration;

use crate::config::AdmissionConfig;

/// What the request is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Any other mutating action: posts, comments, friend requests, profile edits.
    Generic,
    /// A post carrying a file attachment.
    Upload,
    /// A login form submission.
    Login,
}

/// Limit on events inside a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRule {
    /// Maximum events per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

/// Failed-login lockout thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutRule {
    /// Failures that lock a username
    pub max_attempts: u32,
    /// Lockout length, counted from the last failure
    pub cooldown: Duration,
}

/// A single check the controller runs, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Per-identity cooldown between POSTs.
    Cooldown(Duration),
    /// File type allowlist for attachments, lowercase with a leading dot.
    UploadExtension(Vec<String>),
    /// Per-identity upload quota.
    UploadWindow(WindowRule),
    /// Per-username login lockout.
    LoginLockout(LockoutRule),
}

/// Thresholds for every admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Minimum interval between two admitted POSTs from one identity
    pub post_cooldown: Duration,
    /// Upload quota
    pub upload: WindowRule,
    /// Login lockout
    pub login: LockoutRule,
    /// Attachment suffixes accepted on upload, lowercase with a leading dot
    pub allowed_extensions: Vec<String>,
    /// Identities kept per store after a sweep
    pub max_tracked_keys: usize,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::from_config(&AdmissionConfig::default())
    }
}

impl From<&AdmissionConfig> for AdmissionPolicy {
    fn from(config: &AdmissionConfig) -> Self {
        Self::from_config(config)
    }
}

impl AdmissionPolicy {
    /// Build the policy from validated configuration.
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            post_cooldown: config.cooldown(),
            upload: WindowRule {
                limit: config.upload_limit,
                window: config.upload_window(),
            },
            login: LockoutRule {
                max_attempts: config.max_login_attempts,
                cooldown: config.login_cooldown(),
            },
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
            max_tracked_keys: config.max_tracked_keys,
        }
    }

    /// Checks to run for a request, in evaluation order.
    ///
    /// Only POSTs are limited. The cooldown gate always comes first because
    /// it guards the request-entry boundary; the action-specific checks
    /// follow. Uploads check the file type before the quota so a rejected
    /// file never uses an upload slot.
    pub fn checks_for(&self, method: &str, action: ActionKind) -> Vec<Check> {
        if !is_post(method) {
            return Vec::new();
        }

        let mut checks = vec![Check::Cooldown(self.post_cooldown)];
        match action {
            ActionKind::Generic => {}
            ActionKind::Upload => {
                checks.push(Check::UploadExtension(self.allowed_extensions.clone()));
                checks.push(Check::UploadWindow(self.upload));
            }
            ActionKind::Login => checks.push(Check::LoginLockout(self.login)),
        }
        checks
    }
}

/// Whether `method` is a POST, ignoring case.
pub fn is_post(method: &str) -> bool {
    method.trim().eq_ignore_ascii_case("POST")
}

/// Final suffix of `filename`, lowercase with a leading dot.
///
/// Dotfiles such as `.png` and names without a dot have no suffix.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_default_config() {
        let policy = AdmissionPolicy::default();

        assert_eq!(policy.post_cooldown, Duration::from_millis(1000));
        assert_eq!(
            policy.upload,
            WindowRule {
                limit: 5,
                window: Duration::from_secs(60)
            }
        );
        assert_eq!(
            policy.login,
            LockoutRule {
                max_attempts: 5,
                cooldown: Duration::from_secs(3600)
            }
        );
    }

    #[test]
    fn test_non_post_runs_no_checks() {
        let policy = AdmissionPolicy::default();

        for method in ["GET", "HEAD", "OPTIONS", "put", "DELETE"] {
            assert!(policy.checks_for(method, ActionKind::Generic).is_empty());
            assert!(policy.checks_for(method, ActionKind::Upload).is_empty());
            assert!(policy.checks_for(method, ActionKind::Login).is_empty());
        }
    }

    #[test]
    fn test_generic_post_runs_cooldown_only() {
        let policy = AdmissionPolicy::default();

        assert_eq!(
            policy.checks_for("POST", ActionKind::Generic),
            vec![Check::Cooldown(Duration::from_millis(1000))]
        );
    }

    #[test]
    fn test_upload_runs_cooldown_extension_then_window() {
        let policy = AdmissionPolicy::default();

        let checks = policy.checks_for("post", ActionKind::Upload);
        assert_eq!(checks.len(), 3);
        assert!(matches!(checks[0], Check::Cooldown(_)));
        assert_eq!(
            checks[1],
            Check::UploadExtension(policy.allowed_extensions.clone())
        );
        assert_eq!(checks[2], Check::UploadWindow(policy.upload));
    }

    #[test]
    fn test_default_allowed_extensions() {
        let policy = AdmissionPolicy::default();
        assert_eq!(
            policy.allowed_extensions,
            vec![".jpeg", ".jpg", ".gif", ".png", ".webp"]
        );
    }

    #[test]
    fn test_allowed_extensions_are_normalized() {
        let config = AdmissionConfig {
            allowed_extensions: vec!["PNG".to_string(), " .Gif".to_string()],
            ..AdmissionConfig::default()
        };
        let policy = AdmissionPolicy::from_config(&config);
        assert_eq!(policy.allowed_extensions, vec![".png", ".gif"]);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("cat.PNG").as_deref(), Some(".png"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(file_extension("dir/photo.webp").as_deref(), Some(".webp"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".png"), None);
    }

    #[test]
    fn test_login_runs_cooldown_then_lockout() {
        let policy = AdmissionPolicy::default();

        let checks = policy.checks_for("Post", ActionKind::Login);
        assert_eq!(
            checks,
            vec![
                Check::Cooldown(policy.post_cooldown),
                Check::LoginLockout(policy.login)
            ]
        );
    }

    #[test]
    fn test_custom_config() {
        let config = AdmissionConfig {
            cooldown_ms: 250,
            upload_limit: 2,
            upload_window_secs: 10,
            ..AdmissionConfig::default()
        };
        let policy = AdmissionPolicy::from(&config);

        assert_eq!(policy.post_cooldown, Duration::from_millis(250));
        assert_eq!(policy.upload.limit, 2);
        assert_eq!(policy.upload.window, Duration::from_secs(10));
    }
}
