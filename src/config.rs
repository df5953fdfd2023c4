//! Gateway configuration
//!
//! Strongly-typed throttling and pacing options. Keys are camelCase to
//! match the gateway's JSON config surface; every field has a default so a
//! partial (or absent) section still yields a working gateway.

use serde::{Deserialize, Serialize};

/// Throughput, retry, and pacing options for the dispatch core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Ceiling on sends per session in any trailing 60 seconds
    pub max_messages_per_minute: u32,
    /// Ceiling on sends per session in any trailing hour
    pub max_messages_per_hour: u32,
    /// Ceiling on sends per session to a single recipient in any trailing hour
    pub max_messages_per_recipient_per_hour: u32,
    /// Delivery attempts before a message is terminally failed
    pub max_retry_attempts: u32,
    /// Lower bound of the uniform inter-message delay (milliseconds)
    pub message_delay_min: u64,
    /// Upper bound of the uniform inter-message delay (milliseconds)
    pub message_delay_max: u64,
    /// Lower bound of the simulated typing duration (milliseconds)
    pub typing_min_ms: u64,
    /// Upper bound of the simulated typing duration (milliseconds)
    pub typing_max_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_messages_per_minute: 10,
            max_messages_per_hour: 100,
            max_messages_per_recipient_per_hour: 10,
            max_retry_attempts: 3,
            message_delay_min: 2_000,
            message_delay_max: 5_000,
            typing_min_ms: 1_000,
            typing_max_ms: 5_000,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be a positive integer")]
    NotPositive(&'static str),
    #[error("{0} must not exceed {1}")]
    InvertedRange(&'static str, &'static str),
}

impl GatewayConfig {
    /// Check that every option is positive and both delay ranges are ordered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages_per_minute == 0 {
            return Err(ConfigError::NotPositive("maxMessagesPerMinute"));
        }
        if self.max_messages_per_hour == 0 {
            return Err(ConfigError::NotPositive("maxMessagesPerHour"));
        }
        if self.max_messages_per_recipient_per_hour == 0 {
            return Err(ConfigError::NotPositive("maxMessagesPerRecipientPerHour"));
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::NotPositive("maxRetryAttempts"));
        }
        if self.message_delay_min == 0 {
            return Err(ConfigError::NotPositive("messageDelayMin"));
        }
        if self.message_delay_min > self.message_delay_max {
            return Err(ConfigError::InvertedRange(
                "messageDelayMin",
                "messageDelayMax",
            ));
        }
        if self.typing_min_ms > self.typing_max_ms {
            return Err(ConfigError::InvertedRange("typingMinMs", "typingMaxMs"));
        }
        Ok(())
    }

    /// Simulated typing duration for a message body, scaled by length and
    /// clamped to the configured bounds.
    pub fn typing_duration_ms(&self, body_len: usize) -> u64 {
        let scaled = (body_len as u64).saturating_mul(50);
        scaled.clamp(self.typing_min_ms, self.typing_max_ms)
    }
}
