//! Sync tuning configuration.
//!
//! Connection endpoints come from the CLI option structs in `lib.rs`; the
//! knobs that shape a pass (cadence, windows, batch sizes, throttles) live
//! here. All of them have defaults, and all of them can be overridden from an
//! optional YAML file passed with `--config`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::extract::Entity;

/// Resolved tuning values used by the engine and scheduler.
#[derive(Debug, Clone)]
pub struct SyncTuning {
    /// Time between scheduler ticks.
    pub interval: Duration,
    /// Default replay window when no checkpoint exists.
    pub default_window_days: i64,
    /// Narrow window for transactions once the backfill has completed.
    pub recent_window_days: i64,
    /// Hard floor: a first run never reads further back than this.
    pub max_replay_horizon_days: i64,
    /// Sleep between upsert batches within one pass.
    pub inter_batch_delay: Duration,
    /// Per-entity batch size overrides, keyed by entity name.
    pub batch_sizes: HashMap<String, usize>,
    /// Calendar window walked per backfill step.
    pub backfill_window_days: i64,
    /// Rows per bulk write during the backfill.
    pub backfill_batch_size: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            default_window_days: 30,
            recent_window_days: 3,
            max_replay_horizon_days: 90,
            inter_batch_delay: Duration::from_millis(200),
            batch_sizes: HashMap::new(),
            backfill_window_days: 7,
            backfill_batch_size: 500,
        }
    }
}

impl SyncTuning {
    /// Load tuning from a YAML file, falling back to defaults for anything
    /// the file does not mention. `None` returns the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let file: TuningFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let mut tuning = Self::default();
        if let Some(s) = file.interval {
            tuning.interval = Duration::from_secs(parse_duration_to_secs(&s)? as u64);
        }
        if let Some(d) = file.default_window_days {
            tuning.default_window_days = d;
        }
        if let Some(d) = file.recent_window_days {
            tuning.recent_window_days = d;
        }
        if let Some(d) = file.max_replay_horizon_days {
            tuning.max_replay_horizon_days = d;
        }
        if let Some(ms) = file.inter_batch_delay_ms {
            tuning.inter_batch_delay = Duration::from_millis(ms);
        }
        if let Some(sizes) = file.batch_sizes {
            tuning.batch_sizes = sizes;
        }
        if let Some(d) = file.backfill_window_days {
            tuning.backfill_window_days = d;
        }
        if let Some(n) = file.backfill_batch_size {
            tuning.backfill_batch_size = n;
        }
        Ok(tuning)
    }

    /// Batch size for one entity: the per-entity override when configured,
    /// otherwise the entity's built-in default.
    pub fn batch_size_for(&self, entity: Entity) -> usize {
        self.batch_sizes
            .get(entity.key())
            .copied()
            .unwrap_or_else(|| entity.default_batch_size())
    }
}

/// On-disk shape; every key optional.
#[derive(Debug, Default, Deserialize)]
struct TuningFile {
    interval: Option<String>,
    default_window_days: Option<i64>,
    recent_window_days: Option<i64>,
    max_replay_horizon_days: Option<i64>,
    inter_batch_delay_ms: Option<u64>,
    batch_sizes: Option<HashMap<String, usize>>,
    backfill_window_days: Option<i64>,
    backfill_batch_size: Option<usize>,
}

/// Parse a duration string like "1h", "30m", "300s", "300" into seconds.
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
pub fn parse_duration_to_secs(s: &str) -> anyhow::Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    if let Some(num_str) = s.strip_suffix('h') {
        let hours: i64 = num_str
            .parse()
            .with_context(|| format!("Invalid hours value: {num_str}"))?;
        return Ok(hours * 3600);
    }
    if let Some(num_str) = s.strip_suffix('m') {
        let minutes: i64 = num_str
            .parse()
            .with_context(|| format!("Invalid minutes value: {num_str}"))?;
        return Ok(minutes * 60);
    }
    if let Some(num_str) = s.strip_suffix('s') {
        let secs: i64 = num_str
            .parse()
            .with_context(|| format!("Invalid seconds value: {num_str}"))?;
        return Ok(secs);
    }

    s.parse::<i64>()
        .with_context(|| format!("Invalid duration value: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration_to_secs("2m").unwrap(), 120);
        assert_eq!(parse_duration_to_secs("1h").unwrap(), 3600);
        assert_eq!(parse_duration_to_secs("45s").unwrap(), 45);
        assert_eq!(parse_duration_to_secs("300").unwrap(), 300);
        assert!(parse_duration_to_secs("").is_err());
        assert!(parse_duration_to_secs("abc").is_err());
    }

    #[test]
    fn defaults_without_file() {
        let tuning = SyncTuning::load(None).unwrap();
        assert_eq!(tuning.interval, Duration::from_secs(120));
        assert_eq!(tuning.recent_window_days, 3);
        assert_eq!(tuning.batch_size_for(Entity::Transactions), 200);
        assert_eq!(tuning.batch_size_for(Entity::Products), 500);
    }

    #[test]
    fn file_overrides_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "interval: 5m\nbatch_sizes:\n  transactions: 100\n  products: 1000\n"
        )
        .unwrap();

        let tuning = SyncTuning::load(Some(file.path())).unwrap();
        assert_eq!(tuning.interval, Duration::from_secs(300));
        assert_eq!(tuning.batch_size_for(Entity::Transactions), 100);
        assert_eq!(tuning.batch_size_for(Entity::Products), 1000);
        // untouched keys keep their defaults
        assert_eq!(tuning.default_window_days, 30);
        assert_eq!(tuning.batch_size_for(Entity::Customers), 500);
    }
}
