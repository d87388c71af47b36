use crate::config::{Timings, STATE_FILE_ENV};
use crate::dashboard::{self, Backend, Capabilities, DashboardChoice};
use crate::error::PreconditionError;
use crate::logging::LogConfig;
use crate::model::RunReport;
use crate::state::{RunMeta, RunState};
use crate::supervisor::{self, LaunchPlan, LaunchRequest, SuperviseOptions};
use crate::text_summary::build_text_summary;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Sp,
    Md,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Sp => "sp",
            Mode::Md => "md",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Compat,
    Fast,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Compat => "compat",
            Profile::Fast => "fast",
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cp2k-dash",
    version,
    about = "Run CP2K with an optional live dashboard"
)]
pub struct Cli {
    /// Explicit input file path
    pub input: Option<PathBuf>,

    /// Smoke-test mode; selects inputs/<mode>_smoke_<profile>.inp when no input is given
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Input profile
    #[arg(long, value_enum, default_value_t = Profile::Compat)]
    pub profile: Profile,

    /// Override the CP2K PROJECT name (defaults to the input file stem)
    #[arg(long)]
    pub project: Option<String>,

    /// Path to the cp2k executable (cp2k.psmp or cp2k)
    #[arg(long)]
    pub cp2k: Option<PathBuf>,

    /// Disable the dashboard entirely
    #[arg(long)]
    pub no_dashboard: bool,

    /// Dashboard rendering backend.
    ///
    /// `external` does not start the viewer itself: it writes the state file, echoes CP2K
    /// output here and prints the `cp2k-view` command to run in another terminal.
    #[arg(long, value_enum, default_value_t = DashboardChoice::Auto)]
    pub dashboard: DashboardChoice,

    /// Write run snapshots to this file (enables the external viewer)
    #[arg(long, env = STATE_FILE_ENV)]
    pub state_file: Option<PathBuf>,

    /// Also write diagnostics to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Default diagnostic level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// How often to check the child for exit and cancellation
    #[arg(long, default_value = "100ms")]
    pub poll_interval: humantime::Duration,

    /// Terminal dashboard redraw period
    #[arg(long, default_value = "200ms")]
    pub redraw_interval: humantime::Duration,

    /// Minimum spacing between snapshot file writes
    #[arg(long, default_value = "500ms")]
    pub persist_interval: humantime::Duration,

    /// How long the terminal dashboard shows the final state before exiting
    #[arg(long, default_value = "500ms")]
    pub grace: humantime::Duration,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: Some(self.log_level.clone()),
            file: self.log_file.clone(),
        }
    }

    pub fn timings(&self) -> Timings {
        Timings {
            poll: Duration::from(self.poll_interval),
            redraw: Duration::from(self.redraw_interval),
            persist: Duration::from(self.persist_interval),
            grace: Duration::from(self.grace),
            ..Timings::default()
        }
    }

    pub fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            input: self.input.clone(),
            mode: self.mode.map(|m| m.as_str().to_string()),
            profile: Some(self.profile.as_str().to_string()),
            project: self.project.clone(),
            binary: self.cp2k.clone(),
        }
    }

    fn dashboard_choice(&self) -> DashboardChoice {
        if self.no_dashboard {
            DashboardChoice::None
        } else {
            self.dashboard
        }
    }
}

/// Validate the request without creating anything on disk.
pub fn plan(args: &Cli) -> Result<LaunchPlan, PreconditionError> {
    let path = std::env::var_os("PATH");
    LaunchPlan::resolve(&args.launch_request(), path.as_deref())
}

/// Supervise one CP2K run end to end and report how it ended.
pub async fn run(args: Cli, plan: LaunchPlan) -> Result<RunReport> {
    let timings = args.timings();
    let caps = Capabilities::probe(args.state_file.is_some());
    let backend = dashboard::negotiate(args.dashboard_choice(), &caps);
    info!(?backend, project = %plan.project, "starting run");

    let state_file = match backend {
        Backend::External => Some(
            args.state_file
                .clone()
                .unwrap_or_else(|| dashboard::default_state_file(&plan.project)),
        ),
        _ => args.state_file.clone(),
    };

    let state = Arc::new(
        RunState::new(RunMeta {
            project: plan.project.clone(),
            logfile: plan.logfile.clone(),
            input_path: Some(plan.input.clone()),
            profile: plan.profile.clone(),
            mode: plan.mode.clone(),
        })
        .with_state_file(state_file.clone())
        .with_persist_interval(timings.persist),
    );
    state.persist(true);

    if backend == Backend::External {
        if let Some(path) = state_file.as_deref() {
            eprintln!("{}", dashboard::attach_hint(caps.viewer.as_deref(), path));
        }
    }

    // CP2K runs in its own process group, so a terminal Ctrl-C only reaches us; turn it
    // into the run's single cancellation request.
    let interrupt_state = Arc::clone(&state);
    let interrupt_watch = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling run");
            interrupt_state.request_cancel();
        }
    });

    let opts = SuperviseOptions {
        echo: backend == Backend::External,
        poll_interval: timings.poll,
    };
    let supervisor = tokio::spawn(supervisor::run_supervised(
        plan.clone(),
        Arc::clone(&state),
        opts,
    ));

    if backend == Backend::Terminal {
        run_terminal(&state, &plan, timings).await;
    }

    let return_code = match supervisor.await {
        Ok(Ok(outcome)) => outcome.return_code,
        Ok(Err(e)) => {
            eprintln!("Error: {e:#}");
            1
        }
        Err(e) => {
            eprintln!("Error: supervisor task failed: {e}");
            state.finalize(1);
            1
        }
    };
    interrupt_watch.abort();
    state.persist(true);

    if backend == Backend::Headless {
        for line in build_text_summary(&state.snapshot()).lines {
            eprintln!("{line}");
        }
    }

    Ok(RunReport {
        project: plan.project.clone(),
        logfile: plan.logfile.display().to_string(),
        return_code,
    })
}

#[cfg(feature = "tui")]
async fn run_terminal(state: &Arc<RunState>, plan: &LaunchPlan, timings: Timings) {
    let opts = crate::tui::TuiOptions {
        title: "cp2k-dash".to_string(),
        input_lines: Some(crate::dashboard::input::render_input(
            &plan.input,
            crate::config::INPUT_PREVIEW_LINES,
        )),
        redraw: timings.redraw,
        grace: timings.grace,
        show_blocks: false,
        waiting: None,
    };
    // Leaving the dashboard early only detaches it; the run keeps going.
    if let Err(e) = crate::tui::run(Arc::clone(state), Arc::clone(state), opts).await {
        tracing::warn!("terminal dashboard failed: {e:#}; continuing without dashboard");
    }
    if !state.is_done() {
        eprintln!("Dashboard closed; waiting for CP2K to finish (log: {})", plan.logfile.display());
    }
}

// Never negotiated without the `tui` feature.
#[cfg(not(feature = "tui"))]
async fn run_terminal(_state: &Arc<RunState>, _plan: &LaunchPlan, _timings: Timings) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadences() {
        let cli = Cli::parse_from(["cp2k-dash", "in.inp"]);
        assert_eq!(cli.timings(), Timings::default());
        assert_eq!(cli.dashboard_choice(), DashboardChoice::Auto);
        assert_eq!(cli.profile, Profile::Compat);
    }

    #[test]
    fn help_explains_external_viewer_is_not_launched() {
        use clap::CommandFactory;
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("does not start the viewer itself"), "{help}");
        assert!(help.contains("cp2k-view"));
    }

    #[test]
    fn no_dashboard_overrides_choice() {
        let cli = Cli::parse_from(["cp2k-dash", "--mode", "md", "--dashboard", "curses", "--no-dashboard"]);
        assert_eq!(cli.dashboard_choice(), DashboardChoice::None);
        let req = cli.launch_request();
        assert_eq!(req.mode.as_deref(), Some("md"));
        assert_eq!(req.profile.as_deref(), Some("compat"));
        assert!(req.input.is_none());
    }
}
