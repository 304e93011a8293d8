use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The kind of backend job whose progress is being inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Speech-to-text.
    Asr,
    /// Text-to-speech.
    Tts,
}

impl JobKind {
    pub fn default_poll_interval(self) -> Duration {
        Duration::from_secs(1)
    }

    /// Expected wall-clock duration used by the fallback estimator and the hard timeout.
    pub fn default_estimated_duration(self) -> Duration {
        match self {
            JobKind::Asr => Duration::from_secs(60),
            JobKind::Tts => Duration::from_secs(30),
        }
    }

    pub(crate) fn estimated_status(self) -> &'static str {
        match self {
            JobKind::Asr => "transcribing (estimated)",
            JobKind::Tts => "synthesizing (estimated)",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Asr => write!(f, "ASR"),
            JobKind::Tts => write!(f, "TTS"),
        }
    }
}
