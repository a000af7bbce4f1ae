//! Runtime settings shared by the binaries
//!
//! Everything here is plain data filled in from command-line flags (and their
//! environment variable fallbacks); nothing is read from disk.

use std::time::Duration;

use crate::{NyftError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentConfig {
    /// Upper bound on waiting for in-flight handlers during graceful shutdown
    pub drain_timeout: Duration,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Absolute ceiling for one discovery round
    pub hard_deadline: Duration,
    /// Round ends once no reply arrived for this long
    pub idle_window: Duration,
    /// Timeout for each follow-up status query
    pub status_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            hard_deadline: Duration::from_secs(2),
            idle_window: Duration::from_millis(150),
            status_timeout: Duration::from_millis(500),
        }
    }
}

/// Parse `500ms`, `2s`, `5m` or `1h`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1u64)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1000u64)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000u64)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000u64)
    } else {
        return Err(NyftError::Config(format!(
            "invalid duration '{}', use e.g. 500ms, 2s, 5m, 1h",
            s
        )));
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| NyftError::Config(format!("invalid duration number in '{}'", s)))?;

    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| NyftError::Config(format!("duration '{}' is too large", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("2").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_discovery_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.hard_deadline, Duration::from_secs(2));
        assert_eq!(config.idle_window, Duration::from_millis(150));
        assert_eq!(config.status_timeout, Duration::from_millis(500));
    }
}
