use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_config::AppConfig;

use crate::error::ReminderError;

/// One week.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_SEND_DELAY_MS: u64 = 60_000;

/// Live scheduler settings. Seeded from the environment, changed afterwards
/// only through `ReminderScheduler::update_config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    /// Pause between two outbound emails.
    pub send_delay_ms: u64,
}

impl SchedulerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            enabled: config.reminder_scheduler_enabled,
            interval_minutes: config.reminder_interval_minutes,
            send_delay_ms: config.reminder_send_delay_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ReminderError> {
        if self.interval_minutes == 0 {
            return Err(ReminderError::InvalidConfig(
                "interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ReminderError::InvalidConfig(format!(
                "interval_minutes must be at most {}",
                MAX_INTERVAL_MINUTES
            )));
        }
        if self.send_delay_ms > MAX_SEND_DELAY_MS {
            return Err(ReminderError::InvalidConfig(format!(
                "send_delay_ms must be at most {}",
                MAX_SEND_DELAY_MS
            )));
        }
        Ok(())
    }

    pub fn apply(&self, update: &SchedulerConfigUpdate) -> Self {
        Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            interval_minutes: update.interval_minutes.unwrap_or(self.interval_minutes),
            send_delay_ms: update.send_delay_ms.unwrap_or(self.send_delay_ms),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfigUpdate {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<u64>,
    pub send_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub is_running: bool,
    pub interval_minutes: u64,
    pub send_delay_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub total_sent: u64,
    pub total_errors: u64,
    pub skipped_ticks: u64,
    pub last_error: Option<String>,
}

/// Outcome of one dispatcher pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatchSummary {
    pub branches_checked: u64,
    pub candidates: u64,
    pub sent: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}
