use std::time::{Duration, Instant};

use crate::{JobKind, ParseResult, PhaseTag};

/// Time-based progress used once the log signal is lost.
///
/// Grows linearly from 0 at `start` to 100 at `start + expected` and stays at
/// 100 afterwards. A `now` earlier than `start` counts as no time elapsed.
pub fn estimate(kind: JobKind, start: Instant, now: Instant, expected: Duration) -> ParseResult {
    let elapsed = now.saturating_duration_since(start);
    let progress = if expected.is_zero() {
        100.0
    } else {
        (100.0 * elapsed.as_secs_f64() / expected.as_secs_f64()).min(100.0)
    };
    ParseResult::new(progress, kind.estimated_status(), PhaseTag::Estimated)
}
