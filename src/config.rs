use std::time::Duration;

use serde::Deserialize;

/// Runtime knobs shared by the session, the store and the reaper.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// A commit without an answer after this long is reverted.
    #[serde(with = "millis")]
    pub commit_timeout: Duration,
    /// How often the reaper scans for expired drafts.
    #[serde(with = "millis")]
    pub reaper_interval: Duration,
    /// How long a fresh draft is held before the reaper cancels it.
    #[serde(with = "millis")]
    pub draft_hold: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(10),
            reaper_interval: Duration::from_secs(5),
            draft_hold: Duration::from_secs(24 * 3600),
            metrics_port: None,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `FLEETSLOT_*` environment variables.
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| var(key).and_then(|s| s.parse::<u64>().ok());
        let mut config = Self::default();
        // A zero timeout reverts every commit and a zero interval cannot tick.
        if let Some(ms) = parse("FLEETSLOT_COMMIT_TIMEOUT_MS").filter(|&ms| ms > 0) {
            config.commit_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse("FLEETSLOT_REAPER_INTERVAL_MS").filter(|&ms| ms > 0) {
            config.reaper_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse("FLEETSLOT_DRAFT_HOLD_SECS") {
            config.draft_hold = Duration::from_secs(secs);
        }
        config.metrics_port = var("FLEETSLOT_METRICS_PORT").and_then(|s| s.parse().ok());
        config
    }

    /// `hold_until` for a draft created at `now`.
    pub fn hold_deadline(&self, now: crate::model::Ms) -> crate::model::Ms {
        now.saturating_add(self.draft_hold.as_millis() as i64)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
