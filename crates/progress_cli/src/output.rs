use chrono::{DateTime, Local, SecondsFormat};
use progress_core::{CompletionReport, ParseResult};
use serde_json::json;

/// Formats tracker events for stdout, either as plain lines or one JSON object per line.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn progress(&self, at: DateTime<Local>, progress: f64, status: &str) -> String {
        if self.json {
            json!({
                "time": at.to_rfc3339_opts(SecondsFormat::Millis, false),
                "event": "progress",
                "progress": progress,
                "status": status,
            })
            .to_string()
        } else {
            format!("[{}] {:>6.2}% {}", at.format("%H:%M:%S"), progress, status)
        }
    }

    pub fn completed(&self, at: DateTime<Local>, report: &CompletionReport) -> String {
        if self.json {
            json!({
                "time": at.to_rfc3339_opts(SecondsFormat::Millis, false),
                "event": "complete",
                "success": report.success,
                "using_fallback": report.using_fallback,
                "timed_out": report.timed_out,
                "last_progress": report.last_progress,
            })
            .to_string()
        } else {
            let how = match (report.timed_out, report.using_fallback) {
                (true, _) => "forced by timeout",
                (false, true) => "estimated",
                (false, false) => "observed in log",
            };
            format!("[{}] done ({})", at.format("%H:%M:%S"), how)
        }
    }

    pub fn parsed(&self, result: &ParseResult) -> anyhow::Result<String> {
        if self.json {
            Ok(serde_json::to_string(result)?)
        } else {
            Ok(format!(
                "{:.2}% {} [{:?}]",
                result.progress, result.status, result.event
            ))
        }
    }
}
