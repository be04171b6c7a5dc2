//! Service configuration
//!
//! Defaults are layered under `APP__`-prefixed environment variables, e.g.
//! `APP__SERVER__PORT=9000` or `APP__VERIFICATION__MAX_ATTEMPTS=20`.
//! Call `dotenv().ok()` before [`Settings::load`] to pick up a local `.env`.

use crate::verification::polling::BackoffPolicy;
use crate::verification::state_machine::VerificationPolicy;
use config::{builder::DefaultState, ConfigBuilder, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Default provider reference format: alphanumerics plus `.`, `_`, `=` and `-`
pub const DEFAULT_REFERENCE_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._=\-]{2,99}$";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub verification: VerificationSettings,
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Falls back to the in-memory store when unset
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationSettings {
    pub max_attempts: u32,
    pub deadline_secs: u64,
    pub poll_initial_delay_secs: u64,
    pub poll_max_delay_secs: u64,
    pub max_consecutive_errors: u32,
    pub reference_pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub base_url: String,
    #[serde(default)]
    pub secret_key: String,
    pub timeout_secs: u64,
}

impl Settings {
    /// Defaults overlaid with the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Settings = Self::defaults()?
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Built-in defaults only
    pub fn from_defaults() -> Result<Self, ConfigError> {
        let settings: Settings = Self::defaults()?.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("database.max_connections", 10_i64)?
            .set_default("verification.max_attempts", 12_i64)?
            .set_default("verification.deadline_secs", 600_i64)?
            .set_default("verification.poll_initial_delay_secs", 2_i64)?
            .set_default("verification.poll_max_delay_secs", 8_i64)?
            .set_default("verification.max_consecutive_errors", 3_i64)?
            .set_default("verification.reference_pattern", DEFAULT_REFERENCE_PATTERN)?
            .set_default("gateway.base_url", "https://api.paystack.co")?
            .set_default("gateway.timeout_secs", 10_i64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.verification;
        if v.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "verification.max_attempts must be at least 1".to_string(),
            ));
        }
        if v.deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "verification.deadline_secs must be positive".to_string(),
            ));
        }
        if v.poll_initial_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "verification.poll_initial_delay_secs must be positive".to_string(),
            ));
        }
        if v.poll_max_delay_secs < v.poll_initial_delay_secs {
            return Err(ConfigError::Invalid(format!(
                "verification.poll_max_delay_secs ({}) is below poll_initial_delay_secs ({})",
                v.poll_max_delay_secs, v.poll_initial_delay_secs
            )));
        }
        if v.max_consecutive_errors == 0 {
            return Err(ConfigError::Invalid(
                "verification.max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        regex::Regex::new(&v.reference_pattern).map_err(|e| {
            ConfigError::Invalid(format!("verification.reference_pattern: {}", e))
        })?;
        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl VerificationSettings {
    pub fn policy(&self) -> VerificationPolicy {
        VerificationPolicy {
            max_attempts: self.max_attempts,
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_secs(self.poll_initial_delay_secs),
            max_delay: Duration::from_secs(self.poll_max_delay_secs),
            max_consecutive_errors: self.max_consecutive_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::from_defaults().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.verification.max_attempts, 12);
        assert_eq!(settings.verification.poll_initial_delay_secs, 2);
        assert_eq!(settings.verification.poll_max_delay_secs, 8);
        assert!(settings.database.url.is_none());
        assert!(settings.gateway.secret_key.is_empty());
    }

    #[test]
    fn test_policy_conversion() {
        let settings = Settings::from_defaults().unwrap();
        let policy = settings.verification.policy();
        assert_eq!(policy.max_attempts, 12);
        assert_eq!(policy.deadline, Duration::from_secs(600));

        let backoff = settings.verification.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_secs(2));
        assert_eq!(backoff.max_delay, Duration::from_secs(8));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::from_defaults().unwrap();
        settings.verification.max_attempts = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = Settings::from_defaults().unwrap();
        settings.verification.poll_max_delay_secs = 1;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = Settings::from_defaults().unwrap();
        settings.verification.reference_pattern = "([".to_string();
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }
}
