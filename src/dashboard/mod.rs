//! Renderer-facing contracts and backend negotiation.
//!
//! Both renderers read [`Snapshot`](crate::model::Snapshot)s through a [`SnapshotSource`]
//! and forward cancel requests through a [`CancelRelay`]; neither touches the supervisor
//! directly.

pub mod input;
pub mod source;
pub mod table;

use crate::supervisor::find_in_path;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

pub use source::{CancelRelay, FileSource, NoCancel, PidRelay, SnapshotSource, StaticSource};

pub const VIEWER_BIN: &str = "cp2k-view";

/// Backend requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DashboardChoice {
    Auto,
    #[value(alias = "curses")]
    Terminal,
    #[value(alias = "streamlit")]
    External,
    None,
}

/// Backend actually used for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Terminal,
    External,
    Headless,
}

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// stdin and stdout are terminals and `TERM` is usable.
    pub interactive: bool,
    /// Path of the external viewer binary, when one can be found.
    pub viewer: Option<PathBuf>,
    /// A snapshot file was asked for explicitly (flag or environment).
    pub state_file_configured: bool,
}

impl Capabilities {
    pub fn probe(state_file_configured: bool) -> Self {
        Self {
            interactive: cfg!(feature = "tui") && interactive_terminal(),
            viewer: locate_viewer(),
            state_file_configured,
        }
    }
}

pub fn interactive_terminal() -> bool {
    let term_ok = std::env::var("TERM")
        .map(|t| !t.is_empty() && t != "dumb")
        .unwrap_or(false);
    term_ok && std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

/// `cp2k-view` next to the running executable, else on `PATH`.
pub fn locate_viewer() -> Option<PathBuf> {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(VIEWER_BIN)))
        .filter(|p| p.is_file());
    sibling.or_else(|| {
        let path = std::env::var_os("PATH");
        find_in_path(std::ffi::OsStr::new(VIEWER_BIN), path.as_deref())
    })
}

/// Pick the backend, falling back rather than failing when the request cannot be met.
pub fn negotiate(choice: DashboardChoice, caps: &Capabilities) -> Backend {
    let terminal_or_headless = if caps.interactive {
        Backend::Terminal
    } else {
        Backend::Headless
    };
    match choice {
        DashboardChoice::None => Backend::Headless,
        DashboardChoice::Terminal => {
            if !caps.interactive {
                tracing::warn!("terminal dashboard unavailable; running without dashboard");
            }
            terminal_or_headless
        }
        DashboardChoice::External => {
            if caps.viewer.is_some() {
                Backend::External
            } else {
                tracing::warn!("{VIEWER_BIN} not found; falling back");
                terminal_or_headless
            }
        }
        DashboardChoice::Auto => {
            if caps.state_file_configured && caps.viewer.is_some() {
                Backend::External
            } else {
                terminal_or_headless
            }
        }
    }
}

/// Default snapshot location for a project when the external backend needs one.
pub fn default_state_file(project: &str) -> PathBuf {
    PathBuf::from(format!("{project}.state.json"))
}

/// Command line a user can paste to attach the external viewer.
pub fn attach_hint(viewer: Option<&Path>, state_file: &Path) -> String {
    let viewer = viewer
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| VIEWER_BIN.to_string());
    format!("Dashboard: {viewer} {}", state_file.display())
}
