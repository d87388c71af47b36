//! Rebuild a run snapshot from a finished CP2K log.

use crate::extractor::Extractor;
use crate::model::Snapshot;
use crate::state::{RunMeta, RunState};
use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Feed every line of `log` through the same extractor and store the live supervisor
/// uses, flushing the last block at end of file.
pub fn snapshot_from_log(
    log: &Path,
    project: Option<String>,
    input: Option<PathBuf>,
) -> Result<Snapshot> {
    let file = std::fs::File::open(log).with_context(|| format!("open {}", log.display()))?;
    let project = project.unwrap_or_else(|| {
        log.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cp2k".to_string())
    });
    let state = RunState::new(RunMeta {
        project,
        logfile: log.to_path_buf(),
        input_path: input,
        profile: None,
        mode: None,
    });

    let mut reader = BufReader::new(file);
    let mut extractor = Extractor::new();
    let mut sink = &state;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("read {}", log.display()))?
            == 0
        {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        state.append_output_line(line);
        extractor.feed(line, &mut sink);
    }
    extractor.finish(&mut sink);
    state.finalize(0);

    let snap = state.snapshot();
    if snap.blocks.is_empty() {
        bail!("no MD steps found in {}", log.display());
    }
    Ok(snap)
}
