use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use progress_core::{
    update, CompletionReport, Effect, JobKind, Msg, ParseResult, PhaseTag, TrackerPhase,
    TrackerSettings, TrackerState,
};

fn started(settings: TrackerSettings) -> (TrackerState, Instant) {
    let now = Instant::now();
    let (state, effects) = update(TrackerState::new(settings, now), Msg::Start { now });
    assert!(effects.is_empty());
    (state, now)
}

fn parsed(progress: f64) -> Msg {
    Msg::LogsParsed(ParseResult::new(progress, "processing", PhaseTag::Processing))
}

fn progress_values(effects: &[Effect]) -> Vec<f64> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

#[test]
fn regressions_are_dropped() {
    let (mut state, _) = started(TrackerSettings::for_kind(JobKind::Asr));
    let mut observed = Vec::new();
    let mut emitted = Vec::new();

    for raw in [30.0, 20.0, 50.0] {
        let (next, effects) = update(state, parsed(raw));
        state = next;
        observed.push(state.last_progress());
        emitted.extend(progress_values(&effects));
    }

    assert_eq!(observed, vec![30.0, 30.0, 50.0]);
    assert_eq!(emitted, vec![30.0, 50.0]);
}

#[test]
fn complete_event_forces_hundred_and_reports() {
    let (state, _) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, _) = update(state, parsed(42.0));
    let (state, effects) = update(state, Msg::LogsParsed(ParseResult::complete()));

    assert_eq!(state.phase(), TrackerPhase::Complete);
    assert!(!state.is_running());
    assert_eq!(
        effects,
        vec![
            Effect::Progress {
                progress: 100.0,
                status: "complete".to_string(),
            },
            Effect::Completed(CompletionReport {
                success: true,
                using_fallback: false,
                last_progress: 100.0,
                timed_out: false,
            }),
        ]
    );

    // Nothing happens after completion.
    let (_, effects) = update(state, parsed(100.0));
    assert!(effects.is_empty());
}

#[test]
fn failures_switch_to_fallback_once_threshold_is_reached() {
    let (state, _) = started(TrackerSettings::for_kind(JobKind::Tts));
    let (state, effects) = update(state, Msg::FetchFailed);
    assert!(effects.is_empty());
    let (state, effects) = update(state, Msg::FetchFailed);
    assert!(effects.is_empty());
    assert_eq!(state.consecutive_errors(), 2);

    let (state, effects) = update(state, Msg::FetchFailed);
    assert_eq!(
        effects,
        vec![Effect::SwitchedToFallback {
            consecutive_errors: 3
        }]
    );
    assert_eq!(state.phase(), TrackerPhase::Fallback);
    assert!(state.using_fallback());

    // One-way: a later successful parse is ignored.
    let (state, effects) = update(state, parsed(80.0));
    assert!(effects.is_empty());
    assert_eq!(state.phase(), TrackerPhase::Fallback);
}

#[test]
fn success_resets_error_counter() {
    let (state, _) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, _) = update(state, Msg::FetchFailed);
    let (state, _) = update(state, Msg::FetchFailed);
    let (state, _) = update(state, parsed(10.0));
    assert_eq!(state.consecutive_errors(), 0);
    let (state, effects) = update(state, Msg::FetchFailed);
    assert!(effects.is_empty());
    assert_eq!(state.phase(), TrackerPhase::Live);
}

#[test]
fn disabled_fallback_keeps_polling() {
    let settings = TrackerSettings {
        use_fallback: false,
        ..TrackerSettings::for_kind(JobKind::Asr)
    };
    let (mut state, _) = started(settings);
    for _ in 0..10 {
        let (next, effects) = update(state, Msg::FetchFailed);
        assert!(effects.is_empty());
        state = next;
    }
    assert_eq!(state.phase(), TrackerPhase::Live);
    assert_eq!(state.consecutive_errors(), 10);
}

#[test]
fn fallback_ticks_estimate_from_start() {
    let settings = TrackerSettings {
        estimated_duration: Duration::from_secs(10),
        max_retries: 1,
        ..TrackerSettings::for_kind(JobKind::Asr)
    };
    let (state, start) = started(settings);
    let (state, _) = update(state, parsed(40.0));
    let (state, _) = update(state, Msg::FetchFailed);
    assert_eq!(state.phase(), TrackerPhase::Fallback);

    // Estimate below what the log already showed is not reported.
    let (state, effects) = update(
        state,
        Msg::FallbackTick {
            now: start + Duration::from_secs(2),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(state.last_progress(), 40.0);

    let (state, effects) = update(
        state,
        Msg::FallbackTick {
            now: start + Duration::from_secs(5),
        },
    );
    assert_eq!(
        effects,
        vec![Effect::Progress {
            progress: 50.0,
            status: "transcribing (estimated)".to_string(),
        }]
    );

    let (state, effects) = update(
        state,
        Msg::FallbackTick {
            now: start + Duration::from_secs(10),
        },
    );
    assert_eq!(state.phase(), TrackerPhase::Complete);
    assert_eq!(
        effects.last(),
        Some(&Effect::Completed(CompletionReport {
            success: true,
            using_fallback: true,
            last_progress: 100.0,
            timed_out: false,
        }))
    );
}

#[test]
fn timeout_forces_completion_only_while_running() {
    let (state, _) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, _) = update(state, parsed(12.5));
    let (state, effects) = update(state, Msg::TimedOut);
    assert_eq!(
        effects.last(),
        Some(&Effect::Completed(CompletionReport {
            success: true,
            using_fallback: false,
            last_progress: 100.0,
            timed_out: true,
        }))
    );

    let (_, effects) = update(state, Msg::TimedOut);
    assert!(effects.is_empty());
}

#[test]
fn stop_never_completes_and_drops_late_results() {
    let (state, _) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, effects) = update(state, Msg::Stop);
    assert!(effects.is_empty());
    assert_eq!(state.phase(), TrackerPhase::Idle);

    let (state, effects) = update(state, Msg::LogsParsed(ParseResult::complete()));
    assert!(effects.is_empty());
    let (state, effects) = update(state, Msg::TimedOut);
    assert!(effects.is_empty());
    let (_, effects) = update(state, Msg::Stop);
    assert!(effects.is_empty());
}

#[test]
fn start_while_running_keeps_existing_progress() {
    let (state, start) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, _) = update(state, parsed(33.0));
    let (state, _) = update(
        state,
        Msg::Start {
            now: start + Duration::from_secs(3),
        },
    );
    assert_eq!(state.last_progress(), 33.0);
    assert_eq!(state.started_at(), start);
}

#[test]
fn task_id_replaces_filter_and_resets_errors() {
    let (state, _) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, _) = update(state, Msg::FetchFailed);
    let (state, _) = update(state, Msg::FetchFailed);
    let (state, _) = update(state, Msg::SetTaskId("task-7".to_string()));
    assert_eq!(state.job_token(), Some("task-7"));
    assert_eq!(state.consecutive_errors(), 0);

    let (state, _) = update(state, Msg::FetchFailed);
    let (state, _) = update(state, Msg::SetTaskId("task-7".to_string()));
    assert_eq!(state.consecutive_errors(), 1);

    let (state, _) = update(state, Msg::SetTaskId("  ".to_string()));
    assert_eq!(state.job_token(), Some("task-7"));
}

#[test]
fn reset_clears_counters_and_restarts_clock() {
    let (state, start) = started(TrackerSettings::for_kind(JobKind::Asr));
    let (state, _) = update(state, parsed(60.0));
    let later = start + Duration::from_secs(9);
    let (state, _) = update(state, Msg::Reset { now: later });

    let status = state.status(later);
    assert!(!status.is_running);
    assert_eq!(status.last_progress, 0.0);
    assert_eq!(status.elapsed, Duration::ZERO);
    assert_eq!(status.phase, TrackerPhase::Idle);
}

#[test]
fn hard_timeout_is_one_and_a_half_expected_durations() {
    let settings = TrackerSettings::for_kind(JobKind::Tts);
    assert_eq!(settings.hard_timeout(), Duration::from_secs(45));
    assert_eq!(
        TrackerSettings::for_kind(JobKind::Asr).hard_timeout(),
        Duration::from_secs(90)
    );
}

#[test]
fn hard_timeout_saturates_for_huge_estimates() {
    let settings = TrackerSettings {
        estimated_duration: Duration::from_secs(u64::MAX),
        ..TrackerSettings::for_kind(JobKind::Asr)
    };
    assert_eq!(settings.hard_timeout(), Duration::MAX);
}
