use crate::{fallback, Effect, Msg, TrackerPhase, TrackerState};

/// Pure update function: applies a message to the tracker state and returns any effects.
pub fn update(mut state: TrackerState, msg: Msg) -> (TrackerState, Vec<Effect>) {
    let effects = match msg {
        Msg::Start { now } => {
            // A second start while running is ignored; the job keeps its clock.
            if !state.is_running() {
                state.begin(now);
            }
            Vec::new()
        }
        Msg::LogsParsed(result) => {
            // Late results after a stop, or after the switch to estimation, are dropped.
            if state.phase() != TrackerPhase::Live {
                return (state, Vec::new());
            }
            state.reset_errors();
            if result.is_complete() {
                state.complete(false)
            } else {
                state.report(result.progress, result.status).into_iter().collect()
            }
        }
        Msg::FetchFailed => {
            if state.phase() != TrackerPhase::Live {
                return (state, Vec::new());
            }
            if state.record_failure() {
                state.enter_fallback();
                vec![Effect::SwitchedToFallback {
                    consecutive_errors: state.consecutive_errors(),
                }]
            } else {
                Vec::new()
            }
        }
        Msg::FallbackTick { now } => {
            if state.phase() != TrackerPhase::Fallback {
                return (state, Vec::new());
            }
            let settings = state.settings();
            let estimate = fallback::estimate(
                settings.kind,
                state.started_at(),
                now,
                settings.estimated_duration,
            );
            if estimate.is_complete() {
                state.complete(false)
            } else {
                state.report(estimate.progress, estimate.status).into_iter().collect()
            }
        }
        Msg::TimedOut => {
            if state.is_running() {
                state.complete(true)
            } else {
                Vec::new()
            }
        }
        Msg::SetTaskId(token) => {
            state.replace_token(&token);
            Vec::new()
        }
        Msg::Stop => {
            state.halt();
            Vec::new()
        }
        Msg::Reset { now } => {
            state.rewind(now);
            Vec::new()
        }
    };

    (state, effects)
}
