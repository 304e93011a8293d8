//! Maps a tail of raw server log lines to a coarse progress estimate.
//!
//! The backend has no job-status API, so the only signal is free text written to
//! a log shared by every job. Everything that knows about that text lives here,
//! behind [`LogMatcher`], so the rules can be replaced without touching the
//! tracker.

use std::sync::LazyLock;

use regex::Regex;

use crate::{JobKind, ParseResult, PhaseTag};

static SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Audio too long \((\d+(?:\.\d+)?)s\), splitting").expect("split pattern")
});
static CHUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Processing chunk (\d+)/(\d+)").expect("chunk pattern"));
static ASR_HTTP_OK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"POST /api/asr\b[^"]*"?\s+200\b"#).expect("asr response pattern")
});
static TTS_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"TTS Call \(Model:.*Attempt \d+/\d+\): voice=").expect("tts call pattern")
});
static TTS_HTTP_OK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:POST /api/tts\b|GET /tts_output/tts-)[^"]*"?\s+200\b"#)
        .expect("tts response pattern")
});

const LOG_POLL_REQUEST: &str = "GET /api/logs";
const ACCESS_LOG_PROTOCOL: &str = "HTTP/1.1";
const MODEL_TRYING: &str = "Trying model:";
const STREAM_STARTING: &str = "DEBUG: Starting stream for";
const STREAM_FINISHED: &str = "DEBUG: Stream finished. Content len:";
const ASR_COMPLETED: &str = "ASR completed successfully";
const TTS_DOWNLOADED: [&str; 2] = ["Direct download complete:", "yt-dlp download complete:"];

/// Turns a batch of log lines into a [`ParseResult`].
///
/// Implementations must be pure: the same lines, kind and token always give the
/// same result. They are not required to be monotonic across calls.
pub trait LogMatcher: Send + Sync {
    /// `lines` are ordered oldest first. When `token` is set, only lines
    /// containing it are considered.
    ///
    /// Without a token, markers written by a concurrent job on the same server
    /// are indistinguishable from the tracked job's own.
    fn parse(&self, lines: &[String], kind: JobKind, token: Option<&str>) -> ParseResult;
}

/// Matches the phase markers the AI backend writes for ASR and TTS jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerMatcher;

impl LogMatcher for MarkerMatcher {
    fn parse(&self, lines: &[String], kind: JobKind, token: Option<&str>) -> ParseResult {
        if lines.is_empty() {
            return ParseResult::waiting();
        }
        let relevant = relevant_lines(lines, kind, token);
        match kind {
            JobKind::Asr => parse_asr(&relevant),
            JobKind::Tts => parse_tts(&relevant),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Split,
    Chunk { current: u32, total: u32 },
    ModelTrying,
    StreamStarting,
    StreamFinished,
    AsrCompleted,
    AsrHttpOk,
    TtsCall,
    TtsDownloaded,
    TtsHttpOk,
    Other,
}

fn relevant_lines<'a>(lines: &'a [String], kind: JobKind, token: Option<&str>) -> Vec<&'a str> {
    let token = token.filter(|t| !t.is_empty());
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .filter(|line| token.is_none_or(|t| line.contains(t)))
        .filter(|line| !is_access_noise(line, kind))
        .collect()
}

/// Access-log lines are noise unless they are the job's own completion response.
fn is_access_noise(line: &str, kind: JobKind) -> bool {
    if line.contains(LOG_POLL_REQUEST) {
        return true;
    }
    if !line.contains(ACCESS_LOG_PROTOCOL) {
        return false;
    }
    let completion = match kind {
        JobKind::Asr => &ASR_HTTP_OK,
        JobKind::Tts => &TTS_HTTP_OK,
    };
    !completion.is_match(line)
}

fn classify_asr(line: &str) -> Marker {
    if let Some(caps) = CHUNK.captures(line) {
        let current = caps[1].parse::<u32>().ok();
        let total = caps[2].parse::<u32>().ok();
        if let (Some(current), Some(total)) = (current, total) {
            if total > 0 && current <= total {
                return Marker::Chunk { current, total };
            }
        }
        return Marker::Other;
    }
    if SPLIT.is_match(line) {
        Marker::Split
    } else if line.contains(STREAM_FINISHED) {
        Marker::StreamFinished
    } else if line.contains(STREAM_STARTING) {
        Marker::StreamStarting
    } else if line.contains(MODEL_TRYING) {
        Marker::ModelTrying
    } else if line.contains(ASR_COMPLETED) {
        Marker::AsrCompleted
    } else if ASR_HTTP_OK.is_match(line) {
        Marker::AsrHttpOk
    } else {
        Marker::Other
    }
}

fn classify_tts(line: &str) -> Marker {
    if TTS_HTTP_OK.is_match(line) {
        Marker::TtsHttpOk
    } else if TTS_DOWNLOADED.iter().any(|marker| line.contains(marker)) {
        Marker::TtsDownloaded
    } else if TTS_CALL.is_match(line) {
        Marker::TtsCall
    } else {
        Marker::Other
    }
}

fn parse_asr(lines: &[&str]) -> ParseResult {
    let markers: Vec<Marker> = lines.iter().map(|line| classify_asr(line)).collect();

    // The newest chunk marker in view is authoritative; older ones are history.
    if let Some(start) = markers
        .iter()
        .rposition(|marker| matches!(marker, Marker::Chunk { .. }))
    {
        return markers[start..]
            .iter()
            .fold(ChunkScan::SearchingChunk, |scan, marker| scan.step(marker))
            .into_result();
    }

    if markers.contains(&Marker::Split) {
        return ParseResult::new(10.0, "splitting audio", PhaseTag::Splitting);
    }

    markers
        .iter()
        .rev()
        .find_map(|marker| match marker {
            Marker::AsrCompleted => Some(ParseResult::complete()),
            Marker::StreamFinished => Some(ParseResult::new(
                90.0,
                "processing result",
                PhaseTag::StreamFinished,
            )),
            Marker::StreamStarting => Some(ParseResult::new(
                40.0,
                "receiving stream",
                PhaseTag::StreamStarting,
            )),
            Marker::ModelTrying => Some(ParseResult::new(
                20.0,
                "invoking model",
                PhaseTag::ModelTrying,
            )),
            _ => None,
        })
        .unwrap_or_else(ParseResult::waiting)
}

fn parse_tts(lines: &[&str]) -> ParseResult {
    if lines.is_empty() {
        return ParseResult::waiting();
    }
    lines
        .iter()
        .rev()
        .find_map(|line| match classify_tts(line) {
            Marker::TtsHttpOk => Some(ParseResult::complete()),
            Marker::TtsDownloaded => Some(ParseResult::new(80.0, "saving file", PhaseTag::Saving)),
            Marker::TtsCall => Some(ParseResult::new(
                30.0,
                "generating audio",
                PhaseTag::Generating,
            )),
            _ => None,
        })
        .unwrap_or_else(|| ParseResult::new(10.0, "preparing", PhaseTag::Preparing))
}

/// Completion check for chunked ASR jobs, fed from the newest chunk marker
/// forward. A job is only done once the last chunk has started, its stream has
/// finished, and the backend has answered the request with 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkScan {
    SearchingChunk,
    ChunkFound { current: u32, total: u32 },
    AwaitingFinish { total: u32 },
    AwaitingHttpOk { total: u32 },
    Done,
}

impl ChunkScan {
    fn step(self, marker: &Marker) -> Self {
        match (self, *marker) {
            (ChunkScan::SearchingChunk, Marker::Chunk { current, total }) if current == total => {
                ChunkScan::AwaitingFinish { total }
            }
            (ChunkScan::SearchingChunk, Marker::Chunk { current, total }) => {
                ChunkScan::ChunkFound { current, total }
            }
            (ChunkScan::AwaitingFinish { total }, Marker::StreamFinished) => {
                ChunkScan::AwaitingHttpOk { total }
            }
            (ChunkScan::AwaitingHttpOk { .. }, Marker::AsrHttpOk) => ChunkScan::Done,
            (scan, _) => scan,
        }
    }

    fn into_result(self) -> ParseResult {
        let (current, total) = match self {
            ChunkScan::SearchingChunk => return ParseResult::waiting(),
            ChunkScan::Done => return ParseResult::complete(),
            ChunkScan::ChunkFound { current, total } => (current, total),
            ChunkScan::AwaitingFinish { total } | ChunkScan::AwaitingHttpOk { total } => {
                (total, total)
            }
        };
        let raw = 10.0 + 80.0 * f64::from(current) / f64::from(total);
        let progress = (raw * 100.0).round() / 100.0;
        ParseResult::new(
            progress,
            format!("processing chunk {current}/{total}"),
            PhaseTag::Processing,
        )
    }
}
