//! Validator and sync configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidatorConfig
// ---------------------------------------------------------------------------

/// Limits the [`MessageValidator`](crate::MessageValidator) enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Messages older than this are treated as replays.
    pub max_message_age: Duration,

    /// How far in the future a timestamp may be before it is refused.
    pub clock_skew_tolerance: Duration,

    /// Length of the rate-limit sliding window.
    pub rate_window: Duration,

    /// Messages of one kind from one sender allowed per window.
    pub max_messages_per_window: usize,

    /// Minimum spacing between two messages of one kind from one sender.
    pub min_message_interval: Duration,

    /// How often the sync actor prunes rate-limit history.
    pub prune_interval: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_message_age: Duration::from_secs(30),
            clock_skew_tolerance: Duration::from_secs(5),
            rate_window: Duration::from_secs(60),
            max_messages_per_window: 10,
            min_message_interval: Duration::from_millis(100),
            prune_interval: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Settings for a [`SyncService`](crate::SyncService) and its actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub validator: ValidatorConfig,

    /// Bound of the actor's command queue. Callers wait when it is full.
    pub queue_capacity: usize,

    /// Buffer of the state-changed broadcast channel.
    pub state_channel_capacity: usize,

    /// Shared session secret. When set, outgoing messages are signed and
    /// incoming ones must carry a valid signature.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            validator: ValidatorConfig::default(),
            queue_capacity: 256,
            state_channel_capacity: 64,
            secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_config_default() {
        let config = ValidatorConfig::default();
        assert_eq!(config.max_message_age, Duration::from_secs(30));
        assert_eq!(config.clock_skew_tolerance, Duration::from_secs(5));
        assert_eq!(config.rate_window, Duration::from_secs(60));
        assert_eq!(config.max_messages_per_window, 10);
        assert_eq!(config.min_message_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_sync_config_never_serializes_secret() {
        let config = SyncConfig {
            secret: Some("hemligt".into()),
            ..SyncConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hemligt"));
    }
}
