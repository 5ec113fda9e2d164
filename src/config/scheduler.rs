//! Scheduler configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::domain::billing::RetrySchedule;

/// Tick cadence, pass bound and payment-retry backoff.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Upper bound on one pass, checked before each stage
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// Runs the payment-retry stage when set
    #[serde(default)]
    pub payment_retries_enabled: bool,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::new(
            Duration::from_secs(self.retry_base_delay_secs),
            Duration::from_secs(self.retry_max_delay_secs),
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidInterval);
        }
        if self.pass_timeout_secs == 0 {
            return Err(ValidationError::InvalidPassTimeout);
        }
        if self.retry_base_delay_secs == 0 || self.retry_base_delay_secs > self.retry_max_delay_secs
        {
            return Err(ValidationError::InvalidRetryDelays);
        }
        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            pass_timeout_secs: default_pass_timeout(),
            payment_retries_enabled: false,
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
        }
    }
}

fn default_interval() -> u64 {
    60
}

fn default_pass_timeout() -> u64 {
    300
}

fn default_retry_base_delay() -> u64 {
    24 * 60 * 60
}

fn default_retry_max_delay() -> u64 {
    7 * 24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.interval(), Duration::from_secs(60));
        assert_eq!(settings.pass_timeout(), Duration::from_secs(300));
        assert!(!settings.payment_retries_enabled);
        assert_eq!(settings.retry_schedule(), RetrySchedule::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let settings = SchedulerSettings {
            interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ValidationError::InvalidInterval));
    }

    #[test]
    fn zero_pass_timeout_is_rejected() {
        let settings = SchedulerSettings {
            pass_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ValidationError::InvalidPassTimeout));
    }

    #[test]
    fn base_delay_above_max_is_rejected() {
        let settings = SchedulerSettings {
            retry_base_delay_secs: 3_600,
            retry_max_delay_secs: 60,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ValidationError::InvalidRetryDelays));
    }
}
