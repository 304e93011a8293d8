//! Optional RON defaults for `watch`, overridden by command-line flags.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use progress_core::JobKind;
use progress_engine::{LogFetchSettings, TrackerOptions};
use serde::Deserialize;

use crate::args::WatchArgs;

/// Longest job estimate accepted: one week.
const MAX_ESTIMATED_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: Option<String>,
    pub poll_ms: Option<u64>,
    pub estimated_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub use_fallback: Option<bool>,
    pub lines: Option<usize>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        ron::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub fetch: LogFetchSettings,
    pub tracker: TrackerOptions,
}

/// Flags win over the file, the file wins over built-in defaults.
pub fn resolve(args: &WatchArgs, file: &FileConfig) -> anyhow::Result<WatchSettings> {
    let kind = JobKind::from(args.kind);
    let mut fetch = LogFetchSettings::default();
    let mut tracker = TrackerOptions::for_kind(kind);

    if let Some(server) = args.server.clone().or_else(|| file.server.clone()) {
        fetch.base_url = server;
    }
    if let Some(lines) = args.lines.or(file.lines) {
        anyhow::ensure!(lines > 0, "lines must be at least 1");
        fetch.lines = lines;
    }
    if let Some(secs) = file.request_timeout_secs {
        fetch.request_timeout = Duration::from_secs(secs);
    }

    if let Some(ms) = args.poll_ms.or(file.poll_ms) {
        anyhow::ensure!(ms > 0, "poll interval must be positive");
        tracker.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = args.estimated_secs.or(file.estimated_secs) {
        anyhow::ensure!(
            (1..=MAX_ESTIMATED_SECS).contains(&secs),
            "estimated duration must be between 1 and {MAX_ESTIMATED_SECS} seconds"
        );
        tracker.estimated_duration = Duration::from_secs(secs);
    }
    if let Some(retries) = args.max_retries.or(file.max_retries) {
        tracker.max_retries = retries;
    }
    tracker.use_fallback = !args.no_fallback && file.use_fallback.unwrap_or(true);

    Ok(WatchSettings { fetch, tracker })
}
