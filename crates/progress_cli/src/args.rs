use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use progress_core::JobKind;

/// Follow ASR/TTS job progress by reading the backend's log tail.
#[derive(Parser, Debug)]
#[command(name = "progress-watch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log verbosity for the terminal and the optional log file
    #[arg(long = "log-level", global = true, value_enum, default_value = "info")]
    pub log_level: LevelArg,

    /// Also write logs to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Track a job on a running server until it completes
    Watch(WatchArgs),
    /// Run the marker matcher over a saved log and print the result
    Parse(ParseArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Backend base URL (default: http://127.0.0.1:5173)
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    #[arg(short = 'k', long = "kind", value_enum, default_value = "asr")]
    pub kind: KindArg,

    /// Correlation token the backend writes into this job's log lines
    #[arg(short = 't', long = "task-id")]
    pub task_id: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long = "poll-ms")]
    pub poll_ms: Option<u64>,

    /// Expected job duration, used for estimation and the hard timeout
    #[arg(long = "estimated-secs")]
    pub estimated_secs: Option<u64>,

    /// Consecutive failed polls before switching to estimation
    #[arg(long = "max-retries")]
    pub max_retries: Option<u32>,

    /// Keep polling after failures instead of estimating
    #[arg(long = "no-fallback")]
    pub no_fallback: bool,

    /// Log lines requested per poll
    #[arg(long = "lines")]
    pub lines: Option<usize>,

    /// Print one JSON object per event
    #[arg(long = "json")]
    pub json: bool,

    /// RON file with defaults for the options above
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    #[arg(short = 'k', long = "kind", value_enum, default_value = "asr")]
    pub kind: KindArg,

    /// Only consider lines containing this token
    #[arg(short = 't', long = "task-id")]
    pub task_id: Option<String>,

    /// Log file to read (stdin when omitted)
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Only parse the newest N lines, like a live poll would
    #[arg(long = "lines")]
    pub lines: Option<usize>,

    #[arg(long = "json")]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KindArg {
    #[default]
    Asr,
    Tts,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Asr => JobKind::Asr,
            KindArg::Tts => JobKind::Tts,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LevelArg> for log::LevelFilter {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Error => log::LevelFilter::Error,
            LevelArg::Warn => log::LevelFilter::Warn,
            LevelArg::Info => log::LevelFilter::Info,
            LevelArg::Debug => log::LevelFilter::Debug,
            LevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}
