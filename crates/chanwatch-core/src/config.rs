use std::time::Duration;

use chrono::TimeDelta;

const MAX_LOOKBACK_HOURS: i64 = 24 * 365;

/// Engine tunables shared by the ingestion and notification loops.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub ingest_interval: Duration,
    pub notify_interval: Duration,
    /// How far back the dispatcher looks for undelivered work items.
    pub lookback: TimeDelta,
    /// Channel fetches in flight at once within one run.
    pub max_concurrent_fetches: usize,
    /// Messages requested per channel fetch.
    pub page_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ingest_interval: Duration::from_secs(60),
            notify_interval: Duration::from_secs(120),
            lookback: TimeDelta::hours(24),
            max_concurrent_fetches: 5,
            page_size: 200,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ingest_secs = env_parse("CHANWATCH_INGEST_INTERVAL_SECS", defaults.ingest_interval.as_secs());
        let notify_secs = env_parse("CHANWATCH_NOTIFY_INTERVAL_SECS", defaults.notify_interval.as_secs());
        let lookback_hours = env_parse("CHANWATCH_NOTIFY_LOOKBACK_HOURS", defaults.lookback.num_hours());

        Self {
            ingest_interval: Duration::from_secs(ingest_secs.max(1)),
            notify_interval: Duration::from_secs(notify_secs.max(1)),
            lookback: TimeDelta::hours(lookback_hours.clamp(1, MAX_LOOKBACK_HOURS)),
            max_concurrent_fetches: env_parse("CHANWATCH_MAX_CONCURRENT_FETCHES", defaults.max_concurrent_fetches),
            page_size: env_parse("CHANWATCH_FETCH_PAGE_SIZE", defaults.page_size),
        }
        .clamped()
    }

    /// Zero is never a usable cap or page size.
    pub fn clamped(mut self) -> Self {
        self.max_concurrent_fetches = self.max_concurrent_fetches.max(1);
        self.page_size = self.page_size.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cap_and_page_size_are_clamped() {
        let config = MonitorConfig {
            max_concurrent_fetches: 0,
            page_size: 0,
            ..MonitorConfig::default()
        }
        .clamped();
        assert_eq!(config.max_concurrent_fetches, 1);
        assert_eq!(config.page_size, 1);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.ingest_interval, Duration::from_secs(60));
        assert_eq!(config.notify_interval, Duration::from_secs(120));
        assert_eq!(config.lookback, TimeDelta::hours(24));
        assert_eq!(config.page_size, 200);
    }
}
