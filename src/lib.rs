//! Supervise a CP2K run and follow its molecular-dynamics telemetry.
//!
//! `cp2k-dash` launches CP2K, tees its output into `<project>.out`, extracts per-step
//! observables into a shared [`state::RunState`], and shows them in a terminal dashboard
//! or publishes them as a snapshot file for `cp2k-view`.

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod replay;
pub mod state;
pub mod supervisor;
pub mod text_summary;
#[cfg(feature = "tui")]
pub mod tui;
pub mod viewer;
