//! Replacer module for landing converted output in place of the source.
//!
//! The output is written to `<stem>.tmp.<ext>` beside the source, the source is
//! deleted, and the temp file is renamed to `<stem>.<ext>`. A source that
//! cannot be deleted does not stop the rename; both files are then kept.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur during file replacement.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Failed to write the temp output. The source is untouched.
    #[error("Failed to write temp output {path}: {source}")]
    WriteTemp { path: PathBuf, source: io::Error },

    /// Failed to rename the temp output to its final name.
    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Where the output landed.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Output at its final path, source deleted.
    Replaced { output: PathBuf },
    /// Output at its final path, source could not be deleted and is kept.
    KeptBoth { output: PathBuf },
}

impl ReplaceOutcome {
    pub fn output(&self) -> &Path {
        match self {
            ReplaceOutcome::Replaced { output } | ReplaceOutcome::KeptBoth { output } => output,
        }
    }
}

/// Paths involved in one replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacePaths {
    pub source: PathBuf,
    pub temp: PathBuf,
    pub output: PathBuf,
}

/// Write `bytes` as the converted output of `paths.source`.
pub fn replace_with_output(paths: &ReplacePaths, bytes: &[u8]) -> Result<ReplaceOutcome, ReplaceError> {
    replace_with_output_using(paths, bytes, |path| fs::remove_file(path))
}

/// Like [`replace_with_output`], with a custom source remover.
pub fn replace_with_output_using<R>(
    paths: &ReplacePaths,
    bytes: &[u8],
    remove_source: R,
) -> Result<ReplaceOutcome, ReplaceError>
where
    R: FnOnce(&Path) -> io::Result<()>,
{
    // Step 1: Write the temp output
    if let Err(e) = fs::write(&paths.temp, bytes) {
        let _ = fs::remove_file(&paths.temp);
        return Err(ReplaceError::WriteTemp {
            path: paths.temp.clone(),
            source: e,
        });
    }

    // Step 2: Delete the source. Failure keeps both files.
    let source_removed = match remove_source(&paths.source) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                path = %paths.source.display(),
                error = %e,
                "failed to delete source, keeping both files"
            );
            false
        }
    };

    // Step 3: Land the temp output at its final name
    fs::rename(&paths.temp, &paths.output).map_err(|e| ReplaceError::Rename {
        from: paths.temp.clone(),
        to: paths.output.clone(),
        source: e,
    })?;

    let output = paths.output.clone();
    Ok(if source_removed {
        ReplaceOutcome::Replaced { output }
    } else {
        ReplaceOutcome::KeptBoth { output }
    })
}

/// Delete temp outputs left behind by an interrupted conversion. Returns how many were removed.
pub fn remove_orphans(orphans: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in orphans {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete orphaned temp file"),
        }
    }
    removed
}
