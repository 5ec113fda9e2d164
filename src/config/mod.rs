//! Application configuration
//!
//! Typed configuration loaded from environment variables with the `config`
//! and `dotenvy` crates. Variables carry the `DELEGATED_BILLING` prefix and
//! nested keys are separated by double underscores.
//!
//! ```no_run
//! use delegated_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Ticking every {:?}", config.scheduler.interval());
//! ```

mod database;
mod email;
mod error;
mod logging;
mod redemption;
mod scheduler;

pub use database::DatabaseConfig;
pub use email::EmailConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::{Environment, LoggingConfig};
pub use redemption::RedemptionConfig;
pub use scheduler::SchedulerSettings;

use serde::Deserialize;

/// Root configuration for the billing worker.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,

    pub email: EmailConfig,

    /// Required only when payment retries are enabled
    #[serde(default)]
    pub redemption: RedemptionConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// A `.env` file is read first when present.
    ///
    /// - `DELEGATED_BILLING__DATABASE__URL=...` -> `database.url`
    /// - `DELEGATED_BILLING__SCHEDULER__INTERVAL_SECS=60` -> `scheduler.interval_secs`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when required variables are missing or values
    /// cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("DELEGATED_BILLING")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Semantic validation of every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.email.validate()?;
        self.scheduler.validate()?;
        self.logging.validate()?;
        if self.scheduler.payment_retries_enabled {
            self.redemption.validate()?;
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.logging.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use std::time::Duration;

    // Environment variables are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "DELEGATED_BILLING__DATABASE__URL",
        "DELEGATED_BILLING__EMAIL__RESEND_API_KEY",
        "DELEGATED_BILLING__SCHEDULER__INTERVAL_SECS",
        "DELEGATED_BILLING__SCHEDULER__PAYMENT_RETRIES_ENABLED",
        "DELEGATED_BILLING__REDEMPTION__SERVICE_URL",
        "DELEGATED_BILLING__LOGGING__ENVIRONMENT",
    ];

    fn set_minimal_env() {
        env::set_var(
            "DELEGATED_BILLING__DATABASE__URL",
            "postgresql://test@localhost/billing",
        );
        env::set_var("DELEGATED_BILLING__EMAIL__RESEND_API_KEY", "re_xxx");
    }

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn load_with(extra: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        set_minimal_env();
        for (key, value) in extra {
            env::set_var(key, value);
        }
        let result = AppConfig::load();
        clear_env();
        result
    }

    #[test]
    fn test_load_from_environment() {
        let config = load_with(&[]).unwrap();
        assert_eq!(config.database.url, "postgresql://test@localhost/billing");
        assert_eq!(config.email.resend_api_key, "re_xxx");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = load_with(&[]).unwrap();
        assert_eq!(config.scheduler.interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler.pass_timeout(), Duration::from_secs(300));
        assert!(!config.scheduler.payment_retries_enabled);
        assert_eq!(config.logging.environment, Environment::Development);
    }

    #[test]
    fn test_custom_interval() {
        let config = load_with(&[("DELEGATED_BILLING__SCHEDULER__INTERVAL_SECS", "15")]).unwrap();
        assert_eq!(config.scheduler.interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_zero_interval_fails_validation() {
        let config = load_with(&[("DELEGATED_BILLING__SCHEDULER__INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(config.validate(), Err(ValidationError::InvalidInterval));
    }

    #[test]
    fn test_payment_retries_require_redemption_url() {
        let config = load_with(&[(
            "DELEGATED_BILLING__SCHEDULER__PAYMENT_RETRIES_ENABLED",
            "true",
        )])
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingRequired(_))
        ));

        let config = load_with(&[
            ("DELEGATED_BILLING__SCHEDULER__PAYMENT_RETRIES_ENABLED", "true"),
            (
                "DELEGATED_BILLING__REDEMPTION__SERVICE_URL",
                "https://redeemer.internal",
            ),
        ])
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_is_production() {
        let config = load_with(&[("DELEGATED_BILLING__LOGGING__ENVIRONMENT", "production")]).unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_missing_database_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
        env::set_var("DELEGATED_BILLING__EMAIL__RESEND_API_KEY", "re_xxx");
        let result = AppConfig::load();
        clear_env();
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
