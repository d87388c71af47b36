//! Child process lifecycle: spawn, drain, poll, interrupt, finalize.

use super::launch::LaunchPlan;
use super::signal::{exit_code, send_interrupt};
use crate::config::PROJECT_ENV;
use crate::extractor::Extractor;
use crate::state::RunState;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, LineWriter, Read, Write};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SuperviseOptions {
    /// Copy every output line to our stdout as well.
    pub echo: bool,
    pub poll_interval: Duration,
}

impl Default for SuperviseOptions {
    fn default() -> Self {
        Self {
            echo: false,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub return_code: i32,
    /// SIGINT was delivered to the child.
    pub interrupted: bool,
}

/// Launch `plan`, stream its merged output into the log file and `state`, and wait for it.
///
/// `state` is always finalized before this returns, also on error, so renderers waiting on
/// it terminate.
pub async fn run_supervised(
    plan: LaunchPlan,
    state: Arc<RunState>,
    opts: SuperviseOptions,
) -> Result<RunOutcome> {
    match supervise(&plan, &state, opts).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            state.append_output_line(&format!("<supervisor error: {e:#}>"));
            state.finalize(1);
            Err(e)
        }
    }
}

async fn supervise(plan: &LaunchPlan, state: &Arc<RunState>, opts: SuperviseOptions) -> Result<RunOutcome> {
    let log = File::create(&plan.logfile)
        .with_context(|| format!("create log file {}", plan.logfile.display()))?;

    // One pipe carries both stdout and stderr so lines keep their relative order.
    let (pipe_rx, pipe_tx) = io::pipe().context("create output pipe")?;
    let pipe_tx_err = pipe_tx.try_clone().context("clone output pipe")?;

    let mut cmd = Command::new(&plan.binary);
    cmd.arg("-i")
        .arg(&plan.input)
        .env(PROJECT_ENV, &plan.project)
        .stdin(Stdio::null())
        .stdout(pipe_tx)
        .stderr(pipe_tx_err)
        .kill_on_drop(false);
    // Keep terminal-generated signals away from CP2K; interrupts reach it only via
    // `send_interrupt`, exactly once.
    #[cfg(unix)]
    cmd.process_group(0);
    let spawned = cmd.spawn();
    // The command still owns our copies of the write end; the reader sees EOF only after
    // they are gone.
    drop(cmd);
    let mut child = spawned.with_context(|| format!("launch {}", plan.binary.display()))?;

    let pid = child.id();
    info!(pid, binary = %plan.binary.display(), input = %plan.input.display(), "cp2k started");
    state.set_pid(pid);
    state.mark_status(crate::model::RunStatus::Running);

    let reader = {
        let state = Arc::clone(state);
        let echo = opts.echo;
        tokio::task::spawn_blocking(move || pump_output(pipe_rx, LineWriter::new(log), &state, echo))
    };

    let mut interrupted = false;
    let waited = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(e) => break Err(e),
        }
        if !interrupted && state.is_cancel_requested() {
            interrupted = true;
            match pid {
                Some(pid) => match send_interrupt(pid) {
                    Ok(()) => info!(pid, "sent SIGINT to cp2k"),
                    Err(e) => warn!(pid, "failed to interrupt cp2k: {e}"),
                },
                None => debug!("cancel requested but child pid is unknown"),
            }
        }
        tokio::time::sleep(opts.poll_interval).await;
    };

    let mut return_code = match waited {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("waiting for cp2k failed: {e}");
            state.append_output_line(&format!("<wait error: {e}>"));
            1
        }
    };

    let reader_fault = match reader.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e}")),
        Err(e) => Some(format!("{e}")),
    };
    if let Some(fault) = reader_fault {
        warn!("output reader failed: {fault}");
        state.append_output_line(&format!("<reader error: {fault}>"));
        if return_code == 0 {
            return_code = 1;
        }
    }

    info!(return_code, interrupted, "cp2k finished");
    state.finalize(return_code);
    Ok(RunOutcome {
        return_code,
        interrupted,
    })
}

/// Drain the child's merged output until EOF.
///
/// A failing log write does not stop draining, otherwise the child could block on a full
/// pipe; the first such error is reported once the stream ends.
fn pump_output<R: Read, W: Write>(
    pipe: R,
    mut log: W,
    state: &RunState,
    echo: bool,
) -> io::Result<()> {
    let mut reader = BufReader::new(pipe);
    let mut extractor = Extractor::new();
    let mut sink = state;
    let mut log_error: Option<io::Error> = None;
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);

        if log_error.is_none() {
            if let Err(e) = writeln!(log, "{line}") {
                warn!("log file write failed: {e}");
                log_error = Some(e);
            }
        }
        state.append_output_line(line);
        extractor.feed(line, &mut sink);
        if echo {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
        }
    }

    if let Err(e) = log.flush() {
        log_error.get_or_insert(e);
    }
    match log_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
