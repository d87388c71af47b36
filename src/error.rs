use std::path::PathBuf;
use thiserror::Error;

/// Problems detected before anything is launched. No log file is created for these.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("Provide an input file or specify --mode")]
    NoInput,
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("CP2K executable not found (tried {tried}); pass --cp2k or put cp2k.psmp on PATH")]
    BinaryNotFound { tried: String },
    #[error("CP2K executable is not runnable: {}", .0.display())]
    BinaryNotExecutable(PathBuf),
}
