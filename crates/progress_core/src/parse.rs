use serde::{Deserialize, Serialize};

/// Phase marker recognised in the backend log, or the estimator's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseTag {
    /// Nothing recognisable yet.
    None,
    /// ASR: long audio is being split into chunks.
    Splitting,
    /// ASR: a chunk is being transcribed.
    Processing,
    /// ASR: a model invocation was attempted.
    ModelTrying,
    /// ASR: the streaming response started.
    StreamStarting,
    /// ASR: the streaming response finished.
    StreamFinished,
    /// TTS: the generation call was issued.
    Generating,
    /// TTS: the generated file was downloaded and saved.
    Saving,
    /// TTS: activity observed but no marker yet.
    Preparing,
    Complete,
    /// Progress was extrapolated from elapsed time.
    Estimated,
}

/// Progress inferred from one log batch or one estimator tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Completion percentage in `0.0..=100.0`.
    pub progress: f64,
    pub status: String,
    pub event: PhaseTag,
}

impl ParseResult {
    pub fn new(progress: f64, status: impl Into<String>, event: PhaseTag) -> Self {
        Self {
            progress: progress.clamp(0.0, 100.0),
            status: status.into(),
            event,
        }
    }

    /// The state reported before any marker has been seen.
    pub fn waiting() -> Self {
        Self::new(0.0, "waiting", PhaseTag::None)
    }

    pub fn complete() -> Self {
        Self::new(100.0, "complete", PhaseTag::Complete)
    }

    pub fn is_complete(&self) -> bool {
        self.event == PhaseTag::Complete || self.progress >= 100.0
    }
}
