use crate::config::INPUT_PREVIEW_LINES;
use crate::dashboard::input::render_input;
use crate::model::Snapshot;
use std::path::Path;
use std::time::Instant;

/// Renderer-local state; owned by the UI thread only.
pub struct UiState {
    pub title: String,
    pub info: String,
    pub show_help: bool,
    /// Show the per-step table (external viewer).
    pub show_blocks: bool,
    /// Shown instead of the body until a first snapshot exists.
    pub waiting: String,
    pub input_lines: Option<Vec<String>>,
    /// When the run was first seen in a terminal state.
    pub finished_at: Option<Instant>,
}

impl UiState {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            info: String::new(),
            show_help: false,
            show_blocks: false,
            waiting: "Waiting for CP2K output...".to_string(),
            input_lines: None,
            finished_at: None,
        }
    }

    /// Track run completion and lazily render the input file named by the snapshot.
    pub fn observe(&mut self, snap: Option<&Snapshot>) {
        let Some(snap) = snap else {
            return;
        };
        if snap.is_terminal() {
            if self.finished_at.is_none() {
                self.finished_at = Some(Instant::now());
                if let Some(code) = snap.return_code {
                    self.info = format!("Run finished with return code {code}");
                }
            }
        } else {
            self.finished_at = None;
        }
        if self.input_lines.is_none() {
            if let Some(path) = snap.input_path.as_deref() {
                self.input_lines = Some(render_input(Path::new(path), INPUT_PREVIEW_LINES));
            }
        }
    }
}
