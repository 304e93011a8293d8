//! Timer-driven tracker that turns log polls into progress callbacks.
//!
//! One tokio task per running job ticks at the poll interval, fetches the log
//! tail, runs it through the matcher and feeds the result into the pure state
//! machine from `progress_core`. Ticks are handled one after another inside
//! that task, so polls never overlap even when a fetch is slower than the
//! interval.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use progress_core::{
    update, CompletionReport, Effect, JobKind, LogMatcher, MarkerMatcher, Msg, TrackerPhase,
    TrackerSettings, TrackerState, TrackerStatus,
};
use progress_logging::{progress_debug, progress_error, progress_info, progress_warn};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{LogSource, TrackerEvent};

/// Floor for the poll interval. tokio rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOptions {
    pub kind: JobKind,
    pub poll_interval: Duration,
    /// Drives the fallback estimate; the hard timeout is 1.5 times this.
    pub estimated_duration: Duration,
    pub max_retries: u32,
    pub use_fallback: bool,
}

impl TrackerOptions {
    pub fn for_kind(kind: JobKind) -> Self {
        let settings = TrackerSettings::for_kind(kind);
        Self {
            kind,
            poll_interval: kind.default_poll_interval(),
            estimated_duration: settings.estimated_duration,
            max_retries: settings.max_retries,
            use_fallback: settings.use_fallback,
        }
    }

    pub fn asr() -> Self {
        Self::for_kind(JobKind::Asr)
    }

    pub fn tts() -> Self {
        Self::for_kind(JobKind::Tts)
    }

    fn settings(&self) -> TrackerSettings {
        TrackerSettings {
            kind: self.kind,
            estimated_duration: self.estimated_duration,
            max_retries: self.max_retries,
            use_fallback: self.use_fallback,
        }
    }
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self::asr()
    }
}

/// Receives the tracker's callbacks. Called from the tracker's task, never
/// while its state lock is held.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: f64, status: &str);
    fn on_complete(&self, report: CompletionReport);
}

pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<TrackerEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<TrackerEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn on_progress(&self, progress: f64, status: &str) {
        let _ = self.tx.send(TrackerEvent::Progress {
            progress,
            status: status.to_string(),
        });
    }

    fn on_complete(&self, report: CompletionReport) {
        let _ = self.tx.send(TrackerEvent::Completed(report));
    }
}

/// Progress tracker for one backend job at a time.
///
/// `start` needs a tokio runtime and stays idle without one. None of the
/// public methods fail: fetch errors degrade the signal to estimation instead.
pub struct Tracker {
    inner: Arc<Inner>,
    cancel: Mutex<Option<CancellationToken>>,
}

struct Inner {
    options: TrackerOptions,
    source: Arc<dyn LogSource>,
    matcher: Arc<dyn LogMatcher>,
    sink: Arc<dyn ProgressSink>,
    state: Mutex<TrackerState>,
}

impl Tracker {
    pub fn new(
        options: TrackerOptions,
        source: Arc<dyn LogSource>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self::with_matcher(options, source, Arc::new(MarkerMatcher), sink)
    }

    pub fn with_matcher(
        options: TrackerOptions,
        source: Arc<dyn LogSource>,
        matcher: Arc<dyn LogMatcher>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let state = TrackerState::new(options.settings(), now());
        Self {
            inner: Arc::new(Inner {
                options,
                source,
                matcher,
                sink,
                state: Mutex::new(state),
            }),
            cancel: Mutex::new(None),
        }
    }

    /// Starts polling: one poll right away, then one per interval, with the
    /// hard timeout armed. Does nothing if already running, or when called
    /// outside a tokio runtime.
    pub fn start(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                progress_error!("{} tracker cannot start: {}", self.inner.options.kind, err);
                return;
            }
        };
        {
            let mut state = self.inner.lock_state();
            if state.is_running() {
                progress_warn!("{} tracker already running", self.inner.options.kind);
                return;
            }
            let (next, _) = update(state.clone(), Msg::Start { now: now() });
            *state = next;
        }

        let cancel = CancellationToken::new();
        if let Some(previous) = self.lock_cancel().replace(cancel.clone()) {
            previous.cancel();
        }
        progress_info!(
            "{} tracker started (poll every {:?}, hard timeout {:?})",
            self.inner.options.kind,
            self.inner.options.poll_interval,
            self.inner.options.settings().hard_timeout()
        );

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            inner.run(cancel).await;
        });
    }

    /// Cancels polling without firing the completion callback. Idempotent.
    pub fn stop(&self) {
        self.cancel_loop();
        self.inner.transition(Msg::Stop);
    }

    /// Stops and clears progress, error count and the elapsed clock.
    pub fn reset(&self) {
        self.cancel_loop();
        self.inner.transition(Msg::Reset { now: now() });
    }

    pub fn get_status(&self) -> TrackerStatus {
        self.inner.lock_state().status(now())
    }

    /// Sets the correlation token once the backend has assigned one. Later
    /// polls filter on it, and the error counter starts over.
    pub fn set_task_id(&self, token: impl Into<String>) {
        let token = token.into();
        if self.inner.lock_state().job_token() != Some(token.trim()) {
            progress_info!("{} tracker task id set to {}", self.inner.options.kind, token);
        }
        self.inner.transition(Msg::SetTaskId(token));
    }

    fn cancel_loop(&self) {
        if let Some(cancel) = self.lock_cancel().take() {
            cancel.cancel();
        }
    }

    fn lock_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.cancel_loop();
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.options.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.options.settings().hard_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut deadline => {
                    if let Some(effects) = self.transition_unless_cancelled(&cancel, Msg::TimedOut) {
                        if !effects.is_empty() {
                            progress_warn!(
                                "{} tracker hit its hard timeout, forcing completion",
                                self.options.kind
                            );
                        }
                        self.dispatch(effects);
                    }
                    break;
                }
                keep_going = self.poll_once(&mut ticker, &cancel) => {
                    if !keep_going {
                        break;
                    }
                }
            }
        }
        progress_debug!("{} tracker loop finished", self.options.kind);
    }

    /// Waits for the next tick and handles it. Returns whether the loop should continue.
    async fn poll_once(&self, ticker: &mut Interval, cancel: &CancellationToken) -> bool {
        ticker.tick().await;

        let (phase, token) = {
            let state = self.lock_state();
            (state.phase(), state.job_token().map(str::to_owned))
        };

        let msg = match phase {
            TrackerPhase::Live => match self.source.fetch_tail(token.as_deref()).await {
                Ok(lines) => {
                    let parsed = self
                        .matcher
                        .parse(&lines, self.options.kind, token.as_deref());
                    progress_debug!(
                        "{} poll: {} lines -> {:.2}% {:?} ({})",
                        self.options.kind,
                        lines.len(),
                        parsed.progress,
                        parsed.event,
                        parsed.status
                    );
                    Msg::LogsParsed(parsed)
                }
                Err(err) => {
                    progress_error!(
                        "{} poll failed ({} of {} allowed): {}",
                        self.options.kind,
                        self.lock_state().consecutive_errors() + 1,
                        self.options.max_retries,
                        err
                    );
                    Msg::FetchFailed
                }
            },
            TrackerPhase::Fallback => Msg::FallbackTick { now: now() },
            TrackerPhase::Idle | TrackerPhase::Complete => return false,
        };

        match self.transition_unless_cancelled(cancel, msg) {
            Some(effects) => {
                self.dispatch(effects);
                self.lock_state().is_running()
            }
            None => false,
        }
    }

    fn transition(&self, msg: Msg) -> Vec<Effect> {
        let mut state = self.lock_state();
        let (next, effects) = update(state.clone(), msg);
        *state = next;
        effects
    }

    /// Applies `msg` unless the loop that produced it has been cancelled in the
    /// meantime, so a late poll can never touch a stopped or restarted job.
    fn transition_unless_cancelled(
        &self,
        cancel: &CancellationToken,
        msg: Msg,
    ) -> Option<Vec<Effect>> {
        let mut state = self.lock_state();
        if cancel.is_cancelled() {
            return None;
        }
        let (next, effects) = update(state.clone(), msg);
        *state = next;
        Some(effects)
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Progress { progress, status } => self.sink.on_progress(progress, &status),
                Effect::SwitchedToFallback { consecutive_errors } => {
                    progress_warn!(
                        "{} tracker switching to time-based estimation after {} failed polls",
                        self.options.kind,
                        consecutive_errors
                    );
                }
                Effect::Completed(report) => {
                    progress_info!(
                        "{} tracker complete (fallback={}, timed_out={})",
                        self.options.kind,
                        report.using_fallback,
                        report.timed_out
                    );
                    self.sink.on_complete(report);
                }
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
