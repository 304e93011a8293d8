use std::time::Instant;

use crate::ParseResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Caller started tracking a freshly submitted job.
    Start { now: Instant },
    /// A log poll succeeded and its batch was run through the matcher.
    LogsParsed(ParseResult),
    /// A log poll failed (transport, status or body).
    FetchFailed,
    /// Interval tick while estimating from elapsed time.
    FallbackTick { now: Instant },
    /// The hard timeout elapsed.
    TimedOut,
    /// The backend assigned the job's correlation token.
    SetTaskId(String),
    /// Caller cancelled tracking.
    Stop,
    /// Caller cancelled tracking and cleared all counters.
    Reset { now: Instant },
}
