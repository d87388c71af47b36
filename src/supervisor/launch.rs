//! Resolution of what to launch: input file, executable, project name.

use crate::error::PreconditionError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Executable names tried on `PATH`, in order, when none is given.
pub const DEFAULT_BINARIES: &[&str] = &["cp2k.psmp", "cp2k"];

/// What the user asked for, before any filesystem checks.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub input: Option<PathBuf>,
    pub mode: Option<String>,
    pub profile: Option<String>,
    pub project: Option<String>,
    pub binary: Option<PathBuf>,
}

/// A fully validated launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub binary: PathBuf,
    pub input: PathBuf,
    pub project: String,
    pub logfile: PathBuf,
    pub mode: Option<String>,
    pub profile: Option<String>,
}

impl LaunchPlan {
    /// Validate `req` against the filesystem and the given `PATH` value. Nothing is created.
    pub fn resolve(req: &LaunchRequest, path_var: Option<&OsStr>) -> Result<Self, PreconditionError> {
        let input = match &req.input {
            Some(p) => p.clone(),
            None => req
                .mode
                .as_deref()
                .map(|m| default_input(m, req.profile.as_deref()))
                .ok_or(PreconditionError::NoInput)?,
        };
        if !input.is_file() {
            return Err(PreconditionError::InputNotFound(input));
        }

        let binary = resolve_binary(req.binary.as_deref(), path_var)?;

        let project = req
            .project
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| {
                input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "cp2k".to_string())
            });
        let logfile = PathBuf::from(format!("{project}.out"));

        Ok(Self {
            binary,
            input,
            project,
            logfile,
            mode: req.mode.clone(),
            profile: req.profile.clone(),
        })
    }
}

/// `inputs/<mode>_smoke_<profile>.inp`, profile defaulting to `compat`.
pub fn default_input(mode: &str, profile: Option<&str>) -> PathBuf {
    let profile = profile.unwrap_or("compat");
    PathBuf::from(format!("inputs/{mode}_smoke_{profile}.inp"))
}

pub fn resolve_binary(
    explicit: Option<&Path>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf, PreconditionError> {
    match explicit {
        // A bare name is looked up like the defaults; anything with a separator is a path.
        Some(p) if p.components().count() == 1 && !p.is_file() => {
            find_in_path(p.as_os_str(), path_var).ok_or_else(|| PreconditionError::BinaryNotFound {
                tried: p.display().to_string(),
            })
        }
        Some(p) => {
            if !p.is_file() {
                Err(PreconditionError::BinaryNotFound {
                    tried: p.display().to_string(),
                })
            } else if !is_executable(p) {
                Err(PreconditionError::BinaryNotExecutable(p.to_path_buf()))
            } else {
                Ok(p.to_path_buf())
            }
        }
        None => DEFAULT_BINARIES
            .iter()
            .find_map(|name| find_in_path(OsStr::new(name), path_var))
            .ok_or_else(|| PreconditionError::BinaryNotFound {
                tried: DEFAULT_BINARIES.join(", "),
            }),
    }
}

/// First executable regular file named `candidate` in the directories of `path_var`.
pub fn find_in_path(candidate: &OsStr, path_var: Option<&OsStr>) -> Option<PathBuf> {
    std::env::split_paths(path_var?)
        .map(|dir| dir.join(candidate))
        .find(|p| p.is_file() && is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
