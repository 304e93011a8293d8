#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Progress strictly greater than anything reported before.
    Progress { progress: f64, status: String },
    /// Live polling gave up; estimation takes over for the rest of the job.
    SwitchedToFallback { consecutive_errors: u32 },
    Completed(CompletionReport),
}

/// Passed to the completion callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionReport {
    pub success: bool,
    pub using_fallback: bool,
    pub last_progress: f64,
    /// Completion was forced by the hard timeout rather than observed.
    pub timed_out: bool,
}
