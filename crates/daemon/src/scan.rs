//! Scanner module for discovering unconverted source images under a watch root.
//!
//! This module provides the extension filter shared by the watcher and force
//! scans, the converted-counterpart lookup used for deduplication, and the
//! recursive sweeps for unconverted sources and orphaned temp outputs.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source/output extension pair that defines what gets converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRule {
    /// Extension of source files, lowercase, without the leading dot.
    pub source: String,
    /// Extension of converted outputs, lowercase, without the leading dot.
    pub output: String,
}

impl ExtensionRule {
    pub fn new(source: &str, output: &str) -> Self {
        Self {
            source: source.trim_start_matches('.').to_lowercase(),
            output: output.trim_start_matches('.').to_lowercase(),
        }
    }

    /// Checks if a file has the source extension (case-insensitive).
    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.source))
            .unwrap_or(false)
    }

    /// The converted output path for a source: same directory, same stem, output extension.
    ///
    /// For example: `/captures/shot.jxr` -> `/captures/shot.jpg`
    pub fn converted_counterpart(&self, source: &Path) -> PathBuf {
        source.with_extension(&self.output)
    }

    /// The temp path the converter writes before the final rename.
    ///
    /// For example: `/captures/shot.jxr` -> `/captures/shot.tmp.jpg`
    pub fn temp_output(&self, source: &Path) -> PathBuf {
        source.with_extension(format!("tmp.{}", self.output))
    }

    /// Checks if a converted counterpart already exists for the given source.
    pub fn has_counterpart(&self, source: &Path) -> bool {
        self.converted_counterpart(source).exists()
    }

    /// A source that qualifies for conversion: right extension, no counterpart yet.
    pub fn needs_conversion(&self, path: &Path) -> bool {
        self.is_source_file(path) && !self.has_counterpart(path)
    }

    /// Checks if a file is a leftover temp output (`<stem>.tmp.<output>`).
    pub fn is_orphan_temp(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let suffix = format!(".tmp.{}", self.output);
        name.len() > suffix.len() && name.to_lowercase().ends_with(&suffix)
    }
}

fn walk_files(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
}

/// Recursively collects source files under `root` that have no converted counterpart.
///
/// Unreadable directories are skipped. A missing root yields nothing.
pub fn scan_for_unconverted(root: &Path, rule: &ExtensionRule) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    walk_files(root)
        .map(|entry| entry.into_path())
        .filter(|path| rule.needs_conversion(path))
        .collect()
}

/// Recursively collects temp outputs left behind by an interrupted conversion.
pub fn find_orphan_temps(root: &Path, rule: &ExtensionRule) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    walk_files(root)
        .map(|entry| entry.into_path())
        .filter(|path| rule.is_orphan_temp(path))
        .collect()
}
