//! Progress core: log matching, time-based estimation and the pure tracker state machine.
mod effect;
mod fallback;
mod job;
mod matcher;
mod msg;
mod parse;
mod state;
mod update;

pub use effect::{CompletionReport, Effect};
pub use fallback::estimate;
pub use job::JobKind;
pub use matcher::{LogMatcher, MarkerMatcher};
pub use msg::Msg;
pub use parse::{ParseResult, PhaseTag};
pub use state::{
    TrackerPhase, TrackerSettings, TrackerState, TrackerStatus, HARD_TIMEOUT_FACTOR,
};
pub use update::update;
