//! Process configuration.
//!
//! Every tunable is read from the environment once at startup via
//! [`Config::from_env`]; unset or unparsable values fall back to their
//! documented defaults with a warning.

use std::time::Duration;

use tracing::warn;

/// Which notifier implementation the host runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostType {
    /// No external cognitive host; Layer 1 dispatches are logged and dropped.
    #[default]
    Noop,
    /// OpenClaw webhook host.
    OpenClaw,
}

/// Runtime configuration for the ClawBuds core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hourly ceiling for non-audit, non-keepalive reflex executions.
    pub hard_max_messages_per_hour: u32,
    /// Layer-1 queue size that forces a flush.
    pub l1_batch_size: usize,
    /// Maximum age of the oldest queued Layer-1 item before a flush.
    pub l1_max_wait: Duration,
    /// Days after which an unchanged carapace counts as stale.
    pub carapace_stale_days: u32,
    /// Share of a single emoji among phatic reactions that counts as monotony.
    pub monotony_threshold: f64,
    /// Share of a single groom phrase that counts as repetition.
    pub groom_repetition_threshold: f64,
    /// Monthly multiplicative decay applied to trust Q scores.
    pub trust_monthly_decay: f64,
    /// Half-life of relationship strength, in days.
    pub relationship_halflife_days: f64,
    /// Selected notifier implementation.
    pub host_type: HostType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hard_max_messages_per_hour: 20,
            l1_batch_size: 10,
            l1_max_wait: Duration::from_millis(600_000),
            carapace_stale_days: 60,
            monotony_threshold: 0.90,
            groom_repetition_threshold: 0.85,
            trust_monthly_decay: 0.99,
            relationship_halflife_days: 7.0,
            host_type: HostType::Noop,
        }
    }
}

impl Config {
    /// Build a configuration from process environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hard_max_messages_per_hour: env_parse(
                "HARD_MAX_MESSAGES_PER_HOUR",
                defaults.hard_max_messages_per_hour,
            ),
            l1_batch_size: env_parse("L1_BATCH_SIZE", defaults.l1_batch_size),
            l1_max_wait: Duration::from_millis(env_parse(
                "L1_MAX_WAIT_MS",
                defaults.l1_max_wait.as_millis() as u64,
            )),
            carapace_stale_days: env_parse("CARAPACE_STALE_DAYS", defaults.carapace_stale_days),
            monotony_threshold: env_parse("MONOTONY_THRESHOLD", defaults.monotony_threshold),
            groom_repetition_threshold: env_parse(
                "GROOM_REPETITION_THRESHOLD",
                defaults.groom_repetition_threshold,
            ),
            trust_monthly_decay: env_parse("TRUST_MONTHLY_DECAY", defaults.trust_monthly_decay),
            relationship_halflife_days: env_parse(
                "RELATIONSHIP_HALFLIFE_DAYS",
                defaults.relationship_halflife_days,
            ),
            host_type: match std::env::var("HOST_TYPE").as_deref() {
                Ok("openclaw") => HostType::OpenClaw,
                Ok("noop") | Err(_) => HostType::Noop,
                Ok(other) => {
                    warn!(value = other, "unrecognized HOST_TYPE, using noop");
                    HostType::Noop
                }
            },
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparsable config value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.hard_max_messages_per_hour, 20);
        assert_eq!(config.l1_batch_size, 10);
        assert_eq!(config.l1_max_wait, Duration::from_millis(600_000));
        assert_eq!(config.carapace_stale_days, 60);
        assert!((config.monotony_threshold - 0.90).abs() < f64::EPSILON);
        assert!((config.trust_monthly_decay - 0.99).abs() < f64::EPSILON);
        assert_eq!(config.host_type, HostType::Noop);
    }
}
