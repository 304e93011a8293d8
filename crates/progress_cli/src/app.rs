use std::fs;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use progress_core::{JobKind, LogMatcher, MarkerMatcher};
use progress_engine::{ChannelProgressSink, HttpLogSource, Tracker, TrackerEvent};
use progress_logging::{progress_info, progress_warn};

use crate::args::{ParseArgs, WatchArgs};
use crate::config::{resolve, FileConfig};
use crate::output::Printer;

/// Runs a tracker against a live server and prints events until it completes
/// or the user interrupts. Returns whether the job completed.
pub async fn run_watch(args: WatchArgs) -> anyhow::Result<bool> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = resolve(&args, &file)?;
    progress_info!(
        "watching {} job on {} (poll {:?}, estimate {:?})",
        settings.tracker.kind,
        settings.fetch.base_url,
        settings.tracker.poll_interval,
        settings.tracker.estimated_duration
    );

    let source = HttpLogSource::new(settings.fetch).context("building log source")?;
    let (sink, mut events) = ChannelProgressSink::channel();
    let tracker = Tracker::new(settings.tracker, Arc::new(source), Arc::new(sink));
    if let Some(task_id) = &args.task_id {
        tracker.set_task_id(task_id.as_str());
    }

    let printer = Printer::new(args.json);
    tracker.start();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TrackerEvent::Progress { progress, status }) => {
                    println!("{}", printer.progress(Local::now(), progress, &status));
                }
                Some(TrackerEvent::Completed(report)) => {
                    println!("{}", printer.completed(Local::now(), &report));
                    return Ok(report.success);
                }
                None => return Ok(false),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for ctrl-c")?;
                progress_warn!("interrupted, stopping tracker");
                tracker.stop();
                return Ok(false);
            }
        }
    }
}

/// Parses a saved log the same way a live poll would.
pub fn run_parse(args: ParseArgs) -> anyhow::Result<()> {
    let text = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading log file {}", path.display()))?,
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("reading log from stdin")?;
            text
        }
    };

    let lines = tail(&text, args.lines);
    let kind = JobKind::from(args.kind);
    let result = MarkerMatcher.parse(&lines, kind, args.task_id.as_deref());
    println!("{}", Printer::new(args.json).parsed(&result)?);
    Ok(())
}

fn tail(text: &str, limit: Option<usize>) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = limit.map_or(0, |n| lines.len().saturating_sub(n));
    lines[start..].iter().map(|line| line.to_string()).collect()
}
