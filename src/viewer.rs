//! `cp2k-view`: follow a run through its snapshot file, or replay a finished log.

use crate::config::{Timings, INPUT_PREVIEW_LINES, REFRESH_ENV};
use crate::dashboard::input::render_input;
use crate::dashboard::{interactive_terminal, FileSource, NoCancel, PidRelay, SnapshotSource, StaticSource};
use crate::model::Snapshot;
use crate::replay::snapshot_from_log;
use crate::state::{load_snapshot, write_snapshot};
use crate::text_summary::build_text_summary;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cp2k-view",
    version,
    about = "Follow a cp2k-dash run from its snapshot file, or replay a finished CP2K log"
)]
pub struct ViewCli {
    /// Snapshot file written by cp2k-dash
    #[arg(required_unless_present = "replay", conflicts_with = "replay")]
    pub state_file: Option<PathBuf>,

    /// Rebuild the dashboard from a finished CP2K log instead
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Input file to show (replay), or to override the one named in the snapshot
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Project name for replay (defaults to the log file stem)
    #[arg(long, requires = "replay")]
    pub project: Option<String>,

    /// Print the replayed snapshot as JSON instead of showing it
    #[arg(long, requires = "replay")]
    pub json: bool,

    /// Write the replayed snapshot to this file
    #[arg(long, requires = "replay")]
    pub write_state: Option<PathBuf>,

    /// How often to re-read the snapshot file
    #[arg(long, env = REFRESH_ENV, default_value = "1s")]
    pub refresh: humantime::Duration,

    /// Redraw period
    #[arg(long, default_value = "200ms")]
    pub redraw_interval: humantime::Duration,

    /// Default diagnostic level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl ViewCli {
    fn timings(&self) -> Timings {
        Timings {
            refresh: Duration::from(self.refresh),
            redraw: Duration::from(self.redraw_interval),
            ..Timings::default()
        }
    }

    fn input_lines(&self) -> Option<Vec<String>> {
        self.input
            .as_deref()
            .map(|p| render_input(p, INPUT_PREVIEW_LINES))
    }
}

pub fn run(args: ViewCli) -> Result<()> {
    match args.replay.clone() {
        Some(log) => run_replay(&args, log),
        None => {
            let path = args
                .state_file
                .clone()
                .context("a snapshot file or --replay is required")?;
            run_follow(&args, path)
        }
    }
}

fn run_replay(args: &ViewCli, log: PathBuf) -> Result<()> {
    let snap = snapshot_from_log(&log, args.project.clone(), args.input.clone())?;
    tracing::info!(steps = snap.blocks.len(), log = %log.display(), "replayed log");

    if let Some(path) = args.write_state.as_deref() {
        write_snapshot(path, &snap)?;
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
        return Ok(());
    }
    if args.write_state.is_some() {
        return Ok(());
    }
    show(args, StaticSource(snap.clone()), NoCancel, Some(snap), None)
}

fn run_follow(args: &ViewCli, path: PathBuf) -> Result<()> {
    let waiting = format!("Waiting for snapshot file {} ...", path.display());
    let source = FileSource::new(path.clone(), args.timings().refresh);
    show(args, source, PidRelay, load_snapshot(&path), Some(waiting))
}

/// Interactive view when a terminal is available, a plain summary otherwise.
#[cfg_attr(not(feature = "tui"), allow(unused_variables))]
fn show<S>(
    args: &ViewCli,
    source: S,
    relay: impl crate::dashboard::CancelRelay,
    current: Option<Snapshot>,
    waiting: Option<String>,
) -> Result<()>
where
    S: SnapshotSource,
{
    if interactive_terminal() {
        #[cfg(feature = "tui")]
        {
            let timings = args.timings();
            let opts = crate::tui::TuiOptions {
                title: "cp2k-view".to_string(),
                input_lines: args.input_lines(),
                redraw: timings.redraw,
                grace: timings.grace,
                show_blocks: true,
                waiting,
            };
            return crate::tui::run_threaded(source, relay, opts);
        }
    }
    match current {
        Some(snap) => {
            for line in build_text_summary(&snap).lines {
                println!("{line}");
            }
        }
        None => println!("{}", waiting.unwrap_or_else(|| "No snapshot available".to_string())),
    }
    Ok(())
}
