//! Schedule state carried across wake cycles.
//!
//! [`ScheduleState`] replaces the refresh counters a display app would
//! otherwise keep in globals. It is loaded at wake, threaded through the
//! scheduler, and saved before the device goes back to sleep.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Unit of the configured refresh interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Hours,
    Minutes,
}

impl IntervalUnit {
    /// Inclusive range the configured interval is clamped into.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            IntervalUnit::Hours => (1, 24),
            IntervalUnit::Minutes => (1, 1440),
        }
    }

    /// Interval used when the host supplies none.
    pub fn default_interval(self) -> u32 {
        match self {
            IntervalUnit::Hours => 1,
            IntervalUnit::Minutes => 60,
        }
    }

    pub fn seconds(self) -> u64 {
        match self {
            IntervalUnit::Hours => 3600,
            IntervalUnit::Minutes => 60,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IntervalUnit::Hours => "hours",
            IntervalUnit::Minutes => "minutes",
        }
    }
}

/// Clamp a configured interval into the unit's range.
pub fn clamp_interval(raw: i64, unit: IntervalUnit) -> u32 {
    let (min, max) = unit.bounds();
    raw.clamp(min as i64, max as i64) as u32
}

/// Seconds until the next wake for an already clamped interval.
pub fn wake_delay_secs(interval: u32, unit: IntervalUnit) -> u64 {
    interval as u64 * unit.seconds()
}

/// Display update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshKind {
    Full,
    Partial,
}

impl fmt::Display for RefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshKind::Full => f.write_str("full"),
            RefreshKind::Partial => f.write_str("partial"),
        }
    }
}

/// What to do about the next wake when a cycle aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Schedule nothing; the host decides what happens next.
    Defer,
    /// Schedule a wake after `secs`, deep sleep allowed.
    RetryAfter { secs: u64 },
}

/// Result of the most recent fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    #[default]
    Never,
    Ok,
    ConfigurationError,
    FetchError,
    ContentError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    #[serde(default)]
    pub last_status: FetchStatus,
    #[serde(default)]
    pub partial_refresh_count: u32,
    #[serde(default = "default_true")]
    pub full_refresh_pending: bool,
    #[serde(default)]
    pub next_wake_secs: Option<u64>,
    #[serde(default)]
    pub allow_deep_sleep: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleState {
    /// A fresh device starts with a full refresh pending so the panel is
    /// cleared on first draw.
    fn default() -> Self {
        Self {
            last_status: FetchStatus::Never,
            partial_refresh_count: 0,
            full_refresh_pending: true,
            next_wake_secs: None,
            allow_deep_sleep: false,
            updated_at: None,
        }
    }
}

impl ScheduleState {
    /// Refresh mode the next draw should use.
    ///
    /// Full when one is pending or more than `threshold` partial refreshes
    /// have accumulated, partial otherwise.
    pub fn planned_refresh(&self, threshold: u32) -> RefreshKind {
        if self.full_refresh_pending || self.partial_refresh_count > threshold {
            RefreshKind::Full
        } else {
            RefreshKind::Partial
        }
    }

    /// Account for the refresh the display actually applied.
    ///
    /// A full refresh clears the pending flag and the partial counter, even
    /// when the display chose it on its own.
    pub fn record_refresh(&mut self, applied: RefreshKind) {
        match applied {
            RefreshKind::Full => {
                self.full_refresh_pending = false;
                self.partial_refresh_count = 0;
            }
            RefreshKind::Partial => self.partial_refresh_count += 1,
        }
    }

    /// Plan the next refresh and account for it as applied.
    pub fn next_refresh(&mut self, threshold: u32) -> RefreshKind {
        let kind = self.planned_refresh(threshold);
        self.record_refresh(kind);
        kind
    }

    /// Load persisted state, or start fresh if the file is missing or
    /// unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no schedule state yet, starting fresh");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read schedule state, starting fresh");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt schedule state, starting fresh");
                Self::default()
            }
        }
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(Utc::now());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write schedule state: {}", path.display()))?;
        Ok(())
    }
}
