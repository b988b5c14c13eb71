use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};

use crate::model::Ms;

/// Engine-level scheduling policy.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Whether an ADMINISTRATOR passes the staff role check. Off by default:
    /// only EMPLOYEE users can be booked as staff.
    pub role_check_includes_admin: bool,
    /// The single local time zone used for working-hour comparisons.
    pub utc_offset: FixedOffset,
    /// Attempts of a whole validate-then-persist sequence on transient failure.
    pub max_commit_attempts: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            role_check_includes_admin: false,
            utc_offset: Utc.fix(),
            max_commit_attempts: 3,
        }
    }
}

impl Policy {
    pub fn time_of_day(&self, t: Ms) -> Option<NaiveTime> {
        DateTime::from_timestamp_millis(t).map(|dt| dt.with_timezone(&self.utc_offset).time())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            policy: Policy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<i64>().ok());

        let utc_offset = parsed("SLOTKEEP_UTC_OFFSET_MINUTES")
            .and_then(|m| i32::try_from(m * 60).ok())
            .and_then(FixedOffset::east_opt)
            .unwrap_or(defaults.policy.utc_offset);

        Self {
            data_dir: lookup("SLOTKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SLOTKEEP_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: lookup("SLOTKEEP_COMPACT_THRESHOLD")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.compact_threshold),
            compact_interval: lookup("SLOTKEEP_COMPACT_INTERVAL_SECS")
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            policy: Policy {
                role_check_includes_admin: lookup("SLOTKEEP_ROLE_CHECK_INCLUDES_ADMIN")
                    .and_then(|s| parse_flag(&s))
                    .unwrap_or(defaults.policy.role_check_includes_admin),
                utc_offset,
                max_commit_attempts: lookup("SLOTKEEP_MAX_COMMIT_ATTEMPTS")
                    .and_then(|s| s.trim().parse().ok())
                    .filter(|n: &u32| *n > 0)
                    .unwrap_or(defaults.policy.max_commit_attempts),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeep.wal")
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
