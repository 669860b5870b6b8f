//! The duty-cycle scheduler.
//!
//! One call to [`CycleRunner::run_cycle`] is one wake of the device:
//!
//! ```text
//! Idle → Connecting → Fetching → Sampling → Extracting → Rendering → Sleeping
//!            │            │          │
//!            └────────────┴──────────┴──▶ Aborting → Idle
//! ```
//!
//! The success path schedules its own next wake. The abort path shows an
//! error and leaves the next wake to the [`FailurePolicy`]: with
//! [`FailurePolicy::Defer`] nothing is scheduled and the host decides, with
//! [`FailurePolicy::RetryAfter`] a wake is requested after a fixed delay.
//!
//! Hardware and host concerns stay behind [`Device`] and [`ConfigSource`];
//! data-source concerns stay behind [`RecordSource`]. The scheduler is generic
//! over its source; [`scheduler_from_config`] picks the source at runtime and
//! hands it back as a [`CycleRunner`].

use anyhow::Result;
use std::fmt;
use std::path::Path;

use crate::config::{
    Config, ConfigSource, SourceKind, KEY_COLLECTION_ID, KEY_CREDENTIAL, KEY_REFRESH_INTERVAL,
};
use crate::error::{CycleError, CycleResult, ErrorClass};
use crate::extract::ExtractedReport;
use crate::http::RemoteRecordClient;
use crate::sampler::RandomSource;
use crate::schedule::{
    clamp_interval, wake_delay_secs, FailurePolicy, FetchStatus, IntervalUnit, RefreshKind,
    ScheduleState,
};
use crate::source::RecordSource;
use crate::source_database::DatabaseSource;
use crate::source_table::TableSource;
use crate::store::Arena;

// ═══════════════════════════════════════════════════════════════════════
// Collaborators
// ═══════════════════════════════════════════════════════════════════════

/// Everything the scheduler hands to the renderer besides the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderMetadata {
    pub title: String,
    /// Creation date (ten characters) or a placeholder.
    pub created: String,
    pub refresh_interval: u32,
    pub interval_unit: IntervalUnit,
    /// Refresh mode requested by the schedule state.
    pub refresh: RefreshKind,
}

/// The display device and its surroundings.
pub trait Device {
    /// Bring up the network. Failure aborts the cycle.
    fn connect(&mut self) -> Result<()>;

    /// Release the network once all exchanges are done.
    fn disconnect(&mut self) {}

    /// Draw the report, ideally with `meta.refresh`. Returns the refresh mode
    /// actually applied; the schedule state is updated from it.
    fn render(&mut self, report: &ExtractedReport, meta: &RenderMetadata) -> RefreshKind;

    fn show_error(&mut self, message: &str);

    fn schedule_wake(&mut self, after_secs: u64, allow_deep_sleep: bool);
}

// ═══════════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════════

/// Per-cycle configuration, validated and clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    pub collection_id: String,
    pub refresh_interval: u32,
    pub unit: IntervalUnit,
    pub credential: Option<String>,
}

impl CycleSettings {
    /// Read and validate settings through `config`.
    ///
    /// A missing or unparseable interval falls back to the unit's default;
    /// any interval is clamped into the unit's range.
    pub fn resolve(
        config: &dyn ConfigSource,
        unit: IntervalUnit,
        requires_credential: bool,
    ) -> CycleResult<Self> {
        let collection_id = config
            .read_config(KEY_COLLECTION_ID)
            .map(|id| id.trim().to_string())
            .unwrap_or_default();
        if collection_id.is_empty() {
            return Err(CycleError::Configuration(
                "collection identifier is not configured".to_string(),
            ));
        }

        let refresh_interval = match config
            .read_config(KEY_REFRESH_INTERVAL)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        {
            Some(raw) => clamp_interval(raw, unit),
            None => {
                tracing::info!(
                    interval = unit.default_interval(),
                    unit = unit.label(),
                    "using default refresh interval"
                );
                unit.default_interval()
            }
        };

        let credential = config.read_config(KEY_CREDENTIAL).filter(|c| !c.is_empty());
        if requires_credential && credential.is_none() {
            return Err(CycleError::Configuration(
                "credential is not configured".to_string(),
            ));
        }

        Ok(Self {
            collection_id,
            refresh_interval,
            unit,
            credential,
        })
    }

    pub fn wake_delay_secs(&self) -> u64 {
        wake_delay_secs(self.refresh_interval, self.unit)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Connecting,
    Fetching,
    Sampling,
    Extracting,
    Rendering,
    Sleeping,
    Aborting,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Connecting => "connecting",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Sampling => "sampling",
            CyclePhase::Extracting => "extracting",
            CyclePhase::Rendering => "rendering",
            CyclePhase::Sleeping => "sleeping",
            CyclePhase::Aborting => "aborting",
        };
        f.write_str(s)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        report: ExtractedReport,
        refresh: RefreshKind,
        wake_after_secs: u64,
    },
    Aborted {
        /// Phase in which the failure happened.
        phase: CyclePhase,
        error: CycleError,
        /// Wake scheduled by the failure policy, if any.
        retry_after_secs: Option<u64>,
    },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}

/// A duty cycle over one concrete source, usable as a trait object.
pub trait CycleRunner {
    /// Run one full duty cycle.
    fn run_cycle(
        &self,
        config: &dyn ConfigSource,
        device: &mut dyn Device,
        rng: &mut dyn RandomSource,
        state: &mut ScheduleState,
    ) -> CycleOutcome;

    /// Fetch, sample and extract without a device: no connect, no render,
    /// no state change.
    fn preview(
        &self,
        config: &dyn ConfigSource,
        rng: &mut dyn RandomSource,
    ) -> CycleResult<ExtractedReport>;

    fn source_kind(&self) -> SourceKind;

    fn arena(&self) -> &Arena;
}

/// Scheduler for the source, policy, threshold and title in `config`.
pub fn scheduler_from_config(config: &Config) -> CycleResult<Box<dyn CycleRunner>> {
    let client = RemoteRecordClient::new(&config.http)?;
    let runner: Box<dyn CycleRunner> = match config.source.kind {
        SourceKind::Table => Box::new(
            DutyCycleScheduler::new(TableSource::from_config(client, config)).configured(config),
        ),
        SourceKind::Database => Box::new(
            DutyCycleScheduler::new(DatabaseSource::from_config(client, config)).configured(config),
        ),
    };
    Ok(runner)
}

pub struct DutyCycleScheduler<S: RecordSource> {
    source: S,
    arena: Arena,
    policy: FailurePolicy,
    full_refresh_after: u32,
    title: String,
}

impl<S: RecordSource> DutyCycleScheduler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            arena: Arena::new(),
            policy: FailurePolicy::Defer,
            full_refresh_after: 20,
            title: "Random Record".to_string(),
        }
    }

    /// Apply the failure policy, refresh threshold and title from `config`.
    pub fn configured(self, config: &Config) -> Self {
        self.with_policy(config.schedule.failure_policy())
            .with_full_refresh_after(config.schedule.full_refresh_after)
            .with_title(config.display.title.clone())
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_full_refresh_after(mut self, threshold: u32) -> Self {
        self.full_refresh_after = threshold;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_arena(mut self, arena: Arena) -> Self {
        self.arena = arena;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn settings(&self, config: &dyn ConfigSource) -> CycleResult<CycleSettings> {
        let settings = CycleSettings::resolve(
            config,
            self.source.interval_unit(),
            self.source.requires_credential(),
        )?;
        tracing::info!(
            collection = %settings.collection_id,
            interval = settings.refresh_interval,
            unit = settings.unit.label(),
            "configuration resolved"
        );
        Ok(settings)
    }

    fn fetch_and_sample(
        &self,
        settings: &CycleSettings,
        rng: &mut dyn RandomSource,
    ) -> Result<S::Entry, (CyclePhase, CycleError)> {
        enter(CyclePhase::Fetching);
        let fetched = self
            .source
            .fetch(settings, &self.arena)
            .map_err(|e| (CyclePhase::Fetching, e))?;

        enter(CyclePhase::Sampling);
        self.source
            .sample(fetched, settings, &self.arena, rng)
            .map_err(|e| (CyclePhase::Sampling, e))
    }

    fn abort(
        &self,
        phase: CyclePhase,
        error: CycleError,
        device: &mut dyn Device,
        state: &mut ScheduleState,
    ) -> CycleOutcome {
        enter(CyclePhase::Aborting);
        tracing::error!(phase = %phase, error = %error, "cycle aborted");

        let class = error.class();
        device.show_error(&format!("{}: {}", class, error));
        state.last_status = match class {
            ErrorClass::Configuration => FetchStatus::ConfigurationError,
            ErrorClass::Fetch => FetchStatus::FetchError,
            ErrorClass::Content => FetchStatus::ContentError,
        };

        let retry_after_secs = match self.policy {
            FailurePolicy::Defer => {
                state.next_wake_secs = None;
                state.allow_deep_sleep = false;
                tracing::info!("next wake deferred to host");
                None
            }
            FailurePolicy::RetryAfter { secs } => {
                state.next_wake_secs = Some(secs);
                state.allow_deep_sleep = true;
                device.schedule_wake(secs, true);
                tracing::info!(retry_after_secs = secs, "retry wake scheduled");
                Some(secs)
            }
        };
        enter(CyclePhase::Idle);

        CycleOutcome::Aborted {
            phase,
            error,
            retry_after_secs,
        }
    }
}

impl<S: RecordSource> CycleRunner for DutyCycleScheduler<S> {
    fn run_cycle(
        &self,
        config: &dyn ConfigSource,
        device: &mut dyn Device,
        rng: &mut dyn RandomSource,
        state: &mut ScheduleState,
    ) -> CycleOutcome {
        tracing::info!(source = ?self.source.kind(), "wake");

        enter(CyclePhase::Idle);
        let settings = match self.settings(config) {
            Ok(s) => s,
            Err(e) => return self.abort(CyclePhase::Idle, e, device, state),
        };

        enter(CyclePhase::Connecting);
        if let Err(e) = device.connect() {
            let error = CycleError::network(None, format!("connect failed: {:#}", e));
            return self.abort(CyclePhase::Connecting, error, device, state);
        }

        let sampled = self.fetch_and_sample(&settings, rng);
        device.disconnect();
        let entry = match sampled {
            Ok(entry) => entry,
            Err((phase, e)) => return self.abort(phase, e, device, state),
        };

        enter(CyclePhase::Extracting);
        let report = self.source.extract(entry);

        enter(CyclePhase::Rendering);
        let meta = RenderMetadata {
            title: self.title.clone(),
            created: report.created.clone(),
            refresh_interval: settings.refresh_interval,
            interval_unit: settings.unit,
            refresh: state.planned_refresh(self.full_refresh_after),
        };
        let refresh = device.render(&report, &meta);
        if refresh != meta.refresh {
            tracing::info!(planned = %meta.refresh, applied = %refresh, "display overrode refresh mode");
        }
        state.record_refresh(refresh);
        tracing::info!(
            refresh = %refresh,
            partial_count = state.partial_refresh_count,
            "report rendered"
        );

        enter(CyclePhase::Sleeping);
        let wake_after_secs = settings.wake_delay_secs();
        state.last_status = FetchStatus::Ok;
        state.next_wake_secs = Some(wake_after_secs);
        state.allow_deep_sleep = true;
        device.schedule_wake(wake_after_secs, true);
        tracing::info!(wake_after_secs, "next wake scheduled");

        CycleOutcome::Completed {
            report,
            refresh,
            wake_after_secs,
        }
    }

    fn preview(
        &self,
        config: &dyn ConfigSource,
        rng: &mut dyn RandomSource,
    ) -> CycleResult<ExtractedReport> {
        let settings = self.settings(config)?;
        let entry = self
            .fetch_and_sample(&settings, rng)
            .map_err(|(_, error)| error)?;
        Ok(self.source.extract(entry))
    }

    fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    fn arena(&self) -> &Arena {
        &self.arena
    }
}

fn enter(phase: CyclePhase) {
    tracing::debug!(phase = %phase, "phase");
}

// ═══════════════════════════════════════════════════════════════════════
// App lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle hooks a host framework calls on a display app.
pub trait DutyCycleApp {
    /// The device woke (or the app was opened): run one cycle.
    fn on_wake(&mut self, device: &mut dyn Device, state: &mut ScheduleState) -> CycleOutcome;

    /// The user left the app. The next draw must be a full refresh.
    fn on_exit(&mut self, state: &mut ScheduleState) {
        state.full_refresh_pending = true;
    }

    /// The device is about to power down until the scheduled wake.
    fn on_deep_sleep_enter(&mut self, state: &ScheduleState) {
        tracing::info!(next_wake_secs = ?state.next_wake_secs, "entering deep sleep");
    }
}

/// The random-record display app: a scheduler plus its configuration and
/// randomness.
pub struct RecordApp<C: ConfigSource> {
    scheduler: Box<dyn CycleRunner>,
    config: C,
    rng: Box<dyn RandomSource>,
}

impl<C: ConfigSource> RecordApp<C> {
    pub fn new(scheduler: Box<dyn CycleRunner>, config: C, rng: Box<dyn RandomSource>) -> Self {
        Self {
            scheduler,
            config,
            rng,
        }
    }

    pub fn scheduler(&self) -> &dyn CycleRunner {
        self.scheduler.as_ref()
    }
}

impl<C: ConfigSource> DutyCycleApp for RecordApp<C> {
    fn on_wake(&mut self, device: &mut dyn Device, state: &mut ScheduleState) -> CycleOutcome {
        self.scheduler
            .run_cycle(&self.config, device, self.rng.as_mut(), state)
    }
}

/// Load state, run one wake of `app`, enter deep sleep if allowed, save state.
pub fn wake_once(
    app: &mut dyn DutyCycleApp,
    device: &mut dyn Device,
    state_path: &Path,
) -> Result<CycleOutcome> {
    let mut state = ScheduleState::load(state_path);
    let outcome = app.on_wake(device, &mut state);
    if state.allow_deep_sleep && state.next_wake_secs.is_some() {
        app.on_deep_sleep_enter(&state);
    }
    state.save(state_path)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfig(HashMap<&'static str, String>);

    impl ConfigSource for MapConfig {
        fn read_config(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    fn config(pairs: &[(&'static str, &str)]) -> MapConfig {
        MapConfig(pairs.iter().map(|(k, v)| (*k, v.to_string())).collect())
    }

    #[test]
    fn test_resolve_requires_collection_id() {
        let err = CycleSettings::resolve(&config(&[]), IntervalUnit::Hours, false).unwrap_err();
        assert!(matches!(err, CycleError::Configuration(_)));

        let err = CycleSettings::resolve(&config(&[(KEY_COLLECTION_ID, "  ")]), IntervalUnit::Hours, false)
            .unwrap_err();
        assert!(matches!(err, CycleError::Configuration(_)));
    }

    #[test]
    fn test_resolve_clamps_interval() {
        let zero = config(&[(KEY_COLLECTION_ID, "abc"), (KEY_REFRESH_INTERVAL, "0")]);
        let s = CycleSettings::resolve(&zero, IntervalUnit::Hours, false).unwrap();
        assert_eq!(s.refresh_interval, 1);
        assert_eq!(s.wake_delay_secs(), 3600);

        let big = config(&[(KEY_COLLECTION_ID, "abc"), (KEY_REFRESH_INTERVAL, "99999")]);
        let s = CycleSettings::resolve(&big, IntervalUnit::Minutes, false).unwrap();
        assert_eq!(s.refresh_interval, 1440);
        assert_eq!(s.wake_delay_secs(), 1440 * 60);
    }

    #[test]
    fn test_resolve_defaults_interval() {
        let c = config(&[(KEY_COLLECTION_ID, "abc"), (KEY_REFRESH_INTERVAL, "soon")]);
        let s = CycleSettings::resolve(&c, IntervalUnit::Minutes, false).unwrap();
        assert_eq!(s.refresh_interval, 60);
        let s = CycleSettings::resolve(&config(&[(KEY_COLLECTION_ID, "abc")]), IntervalUnit::Hours, false)
            .unwrap();
        assert_eq!(s.refresh_interval, 1);
    }

    #[test]
    fn test_resolve_credential() {
        let c = config(&[(KEY_COLLECTION_ID, "abc")]);
        assert!(matches!(
            CycleSettings::resolve(&c, IntervalUnit::Minutes, true),
            Err(CycleError::Configuration(_))
        ));
        let c = config(&[(KEY_COLLECTION_ID, "abc"), (KEY_CREDENTIAL, "tok")]);
        let s = CycleSettings::resolve(&c, IntervalUnit::Minutes, true).unwrap();
        assert_eq!(s.credential.as_deref(), Some("tok"));
    }

    #[test]
    fn test_scheduler_follows_source_kind() {
        let table = crate::config::parse_config("[source]\nkind = \"table\"\n").unwrap();
        assert_eq!(scheduler_from_config(&table).unwrap().source_kind(), SourceKind::Table);

        let database = crate::config::parse_config("[source]\nkind = \"database\"\n").unwrap();
        let runner = scheduler_from_config(&database).unwrap();
        assert_eq!(runner.source_kind(), SourceKind::Database);
        assert_eq!(runner.arena().allocations(), 0);
    }
}
