use std::time::Duration;

/// Fixed cadences of the supervisor and the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How often the supervisor checks the child for exit and pending cancellation.
    pub poll: Duration,
    /// Embedded dashboard redraw period (also the key-event poll timeout).
    pub redraw: Duration,
    /// Minimum spacing of unforced snapshot writes.
    pub persist: Duration,
    /// How long the embedded dashboard lingers on the final state before exiting.
    pub grace: Duration,
    /// External viewer re-read period of the snapshot file.
    pub refresh: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            redraw: Duration::from_millis(200),
            persist: Duration::from_millis(500),
            grace: Duration::from_millis(500),
            refresh: Duration::from_secs(1),
        }
    }
}

pub const STATE_FILE_ENV: &str = "CP2K_DASHBOARD_STATE";
pub const REFRESH_ENV: &str = "CP2K_DASHBOARD_REFRESH";
pub const PROJECT_ENV: &str = "PROJECT";

/// Lines of the input file shown in the dashboards.
pub const INPUT_PREVIEW_LINES: usize = 120;
