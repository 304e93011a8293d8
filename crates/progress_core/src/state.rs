use std::time::{Duration, Instant};

use crate::{CompletionReport, Effect, JobKind};

/// Hard timeout as a multiple of the expected job duration.
pub const HARD_TIMEOUT_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerPhase {
    #[default]
    Idle,
    /// Polling the server log.
    Live,
    /// Estimating from elapsed time.
    Fallback,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub kind: JobKind,
    pub estimated_duration: Duration,
    /// Consecutive fetch failures tolerated before switching to estimation.
    pub max_retries: u32,
    pub use_fallback: bool,
}

impl TrackerSettings {
    pub fn for_kind(kind: JobKind) -> Self {
        Self {
            kind,
            estimated_duration: kind.default_estimated_duration(),
            max_retries: 3,
            use_fallback: true,
        }
    }

    /// Saturates at `Duration::MAX` for estimates too large to scale.
    pub fn hard_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.estimated_duration.as_secs_f64() * HARD_TIMEOUT_FACTOR)
            .unwrap_or(Duration::MAX)
    }
}

/// Snapshot returned by the tracker's status query.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub is_running: bool,
    pub phase: TrackerPhase,
    pub last_progress: f64,
    pub consecutive_errors: u32,
    pub using_fallback: bool,
    pub elapsed: Duration,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerState {
    settings: TrackerSettings,
    phase: TrackerPhase,
    last_progress: f64,
    consecutive_errors: u32,
    using_fallback: bool,
    started_at: Instant,
    job_token: Option<String>,
}

impl TrackerState {
    pub fn new(settings: TrackerSettings, now: Instant) -> Self {
        Self {
            settings,
            phase: TrackerPhase::Idle,
            last_progress: 0.0,
            consecutive_errors: 0,
            using_fallback: false,
            started_at: now,
            job_token: None,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, TrackerPhase::Live | TrackerPhase::Fallback)
    }

    pub fn last_progress(&self) -> f64 {
        self.last_progress
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn job_token(&self) -> Option<&str> {
        self.job_token.as_deref()
    }

    pub fn status(&self, now: Instant) -> TrackerStatus {
        TrackerStatus {
            is_running: self.is_running(),
            phase: self.phase,
            last_progress: self.last_progress,
            consecutive_errors: self.consecutive_errors,
            using_fallback: self.using_fallback,
            elapsed: now.saturating_duration_since(self.started_at),
            task_id: self.job_token.clone(),
        }
    }

    pub(crate) fn begin(&mut self, now: Instant) {
        self.phase = TrackerPhase::Live;
        self.clear_counters(now);
    }

    pub(crate) fn halt(&mut self) {
        if self.is_running() {
            self.phase = TrackerPhase::Idle;
        }
    }

    pub(crate) fn rewind(&mut self, now: Instant) {
        self.phase = TrackerPhase::Idle;
        self.clear_counters(now);
    }

    fn clear_counters(&mut self, now: Instant) {
        self.last_progress = 0.0;
        self.consecutive_errors = 0;
        self.using_fallback = false;
        self.started_at = now;
    }

    pub(crate) fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Counts one failure and reports whether estimation should take over.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.settings.use_fallback && self.consecutive_errors >= self.settings.max_retries
    }

    pub(crate) fn enter_fallback(&mut self) {
        self.phase = TrackerPhase::Fallback;
        self.using_fallback = true;
    }

    pub(crate) fn replace_token(&mut self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() || self.job_token.as_deref() == Some(token) {
            return false;
        }
        self.job_token = Some(token.to_string());
        self.consecutive_errors = 0;
        true
    }

    /// Monotonic filter: regressions and repeats are dropped.
    pub(crate) fn report(&mut self, progress: f64, status: impl Into<String>) -> Option<Effect> {
        if progress > self.last_progress {
            self.last_progress = progress;
            Some(Effect::Progress {
                progress,
                status: status.into(),
            })
        } else {
            None
        }
    }

    pub(crate) fn complete(&mut self, timed_out: bool) -> Vec<Effect> {
        self.phase = TrackerPhase::Complete;
        let mut effects: Vec<Effect> = self.report(100.0, "complete").into_iter().collect();
        effects.push(Effect::Completed(CompletionReport {
            success: true,
            using_fallback: self.using_fallback,
            last_progress: self.last_progress,
            timed_out,
        }));
        effects
    }
}
