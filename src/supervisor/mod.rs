//! CP2K process supervision.
//!
//! Resolves what to run, launches it with merged stdout/stderr, tees every line into the
//! log file and the shared [`RunState`](crate::state::RunState), and turns a cancellation
//! request into exactly one SIGINT.

mod launch;
mod process;
mod signal;

pub use launch::{default_input, find_in_path, resolve_binary, LaunchPlan, LaunchRequest};
pub use process::{run_supervised, RunOutcome, SuperviseOptions};
pub use signal::send_interrupt;
