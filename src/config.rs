//! Configuration management for Gatehouse.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `GATEHOUSE__`-prefixed environment variables such as
//! `GATEHOUSE__ADMISSION__COOLDOWN_MS=500`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatehouseError, Result};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "GATEHOUSE";

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control thresholds
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Admission control configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Minimum interval between two admitted POSTs from one identity
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Maximum uploads per identity inside the upload window
    #[serde(default = "default_upload_limit")]
    pub upload_limit: u32,

    /// Length of the trailing upload window in seconds
    #[serde(default = "default_upload_window_secs")]
    pub upload_window_secs: u64,

    /// Consecutive failed logins that lock a username
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,

    /// How long a lockout lasts, counted from the last failure
    #[serde(default = "default_login_cooldown_secs")]
    pub login_cooldown_secs: u64,

    /// How often expired limiter state is swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on identities tracked per store after a sweep
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,

    /// File suffixes accepted on upload, with a leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            upload_limit: default_upload_limit(),
            upload_window_secs: default_upload_window_secs(),
            max_login_attempts: default_max_login_attempts(),
            login_cooldown_secs: default_login_cooldown_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_tracked_keys: default_max_tracked_keys(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_cooldown_ms() -> u64 {
    1000
}

fn default_upload_limit() -> u32 {
    5
}

fn default_upload_window_secs() -> u64 {
    60
}

fn default_max_login_attempts() -> u32 {
    5
}

fn default_login_cooldown_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_tracked_keys() -> usize {
    100_000
}

fn default_allowed_extensions() -> Vec<String> {
    [".jpeg", ".jpg", ".gif", ".png", ".webp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl AdmissionConfig {
    /// Cooldown between admitted POSTs.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Trailing upload window.
    pub fn upload_window(&self) -> Duration {
        Duration::from_secs(self.upload_window_secs)
    }

    /// Lockout length.
    pub fn login_cooldown(&self) -> Duration {
        Duration::from_secs(self.login_cooldown_secs)
    }

    /// Interval of the background sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl GatehouseConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let config: GatehouseConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatehouseConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatehouseError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the admission core cannot work with.
    ///
    /// A zero upload limit or cooldown is allowed; it means "deny every
    /// upload" and "no POST cooldown" respectively.
    pub fn validate(&self) -> Result<()> {
        let admission = &self.admission;

        if admission.upload_window_secs == 0 {
            return Err(GatehouseError::Config(
                "admission.upload_window_secs must be greater than zero".to_string(),
            ));
        }
        if admission.max_login_attempts == 0 {
            return Err(GatehouseError::Config(
                "admission.max_login_attempts must be greater than zero".to_string(),
            ));
        }
        if admission.login_cooldown_secs == 0 {
            return Err(GatehouseError::Config(
                "admission.login_cooldown_secs must be greater than zero".to_string(),
            ));
        }
        if admission.sweep_interval_secs == 0 {
            return Err(GatehouseError::Config(
                "admission.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(ext) = admission
            .allowed_extensions
            .iter()
            .find(|ext| ext.trim().trim_start_matches('.').is_empty())
        {
            return Err(GatehouseError::Config(format!(
                "admission.allowed_extensions contains an empty suffix: {:?}",
                ext
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatehouseConfig::default();

        assert_eq!(
            config.server.grpc_addr,
            "127.0.0.1:8081".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.admission.cooldown_ms, 1000);
        assert_eq!(config.admission.upload_limit, 5);
        assert_eq!(config.admission.upload_window(), Duration::from_secs(60));
        assert_eq!(config.admission.max_login_attempts, 5);
        assert_eq!(config.admission.login_cooldown(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
admission:
  cooldown_ms: 250
  upload_limit: 2
"#;
        let config = GatehouseConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.admission.cooldown(), Duration::from_millis(250));
        assert_eq!(config.admission.upload_limit, 2);
        assert_eq!(config.admission.upload_window_secs, 60);
        assert_eq!(config.admission.max_login_attempts, 5);
    }

    #[test]
    fn test_server_address_from_yaml() {
        let yaml = r#"
server:
  grpc_addr: "0.0.0.0:9000"
"#;
        let config = GatehouseConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9000);
    }

    #[test]
    fn test_zero_upload_window_rejected() {
        let yaml = r#"
admission:
  upload_window_secs: 0
"#;
        let result = GatehouseConfig::from_yaml(yaml);
        assert!(matches!(result, Err(GatehouseError::Config(_))));
    }

    #[test]
    fn test_zero_login_attempts_rejected() {
        let mut config = GatehouseConfig::default();
        config.admission.max_login_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_upload_limit_allowed() {
        let mut config = GatehouseConfig::default();
        config.admission.upload_limit = 0;
        config.admission.cooldown_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let result = GatehouseConfig::from_yaml("admission: [1, 2");
        assert!(matches!(result, Err(GatehouseError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "gatehouse-config-test-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "admission:\n  max_login_attempts: 3\n  login_cooldown_secs: 120\n",
        )
        .unwrap();

        let config = GatehouseConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.admission.max_login_attempts, 3);
        assert_eq!(config.admission.login_cooldown(), Duration::from_secs(120));
        assert_eq!(config.admission.cooldown_ms, 1000);
    }

    #[test]
    fn test_empty_extension_rejected() {
        let yaml = r#"
admission:
  allowed_extensions: [".png", "."]
"#;
        let result = GatehouseConfig::from_yaml(yaml);
        assert!(matches!(result, Err(GatehouseError::Config(_))));
    }

    #[test]
    fn test_environment_overrides_file_and_defaults() {
        let path = std::env::temp_dir().join(format!(
            "gatehouse-env-test-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "admission:\n  sweep_interval_secs: 30\n").unwrap();

        std::env::set_var("GATEHOUSE__ADMISSION__SWEEP_INTERVAL_SECS", "15");
        std::env::set_var("GATEHOUSE__ADMISSION__UPLOAD_LIMIT", "9");
        let result = GatehouseConfig::load(Some(&path));
        std::env::remove_var("GATEHOUSE__ADMISSION__SWEEP_INTERVAL_SECS");
        std::env::remove_var("GATEHOUSE__ADMISSION__UPLOAD_LIMIT");
        std::fs::remove_file(&path).unwrap();

        let config = result.unwrap();
        assert_eq!(config.admission.sweep_interval_secs, 15);
        assert_eq!(config.admission.upload_limit, 9);
        assert_eq!(config.admission.upload_window_secs, 60);
    }

    #[test]
    fn test_from_file_missing_path() {
        let result = GatehouseConfig::from_file("/nonexistent/gatehouse.yaml");
        assert!(matches!(result, Err(GatehouseError::Io(_))));
    }
}
