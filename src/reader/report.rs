//! Per-query record of files that could not be read.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{AtlasError, ErrorCategory};

/// Why a file was dropped from a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub category: ErrorCategory,
    pub message: String,
}

/// Files skipped during one query, one record per path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryReport {
    /// Corrupt, unsupported or unreadable files, with the first error seen
    pub skipped: BTreeMap<PathBuf, FileFailure>,
    /// Files the caller may not read
    pub permission_denied: BTreeSet<PathBuf>,
}

impl QueryReport {
    /// Record `error` against `path`; later errors for the same path are dropped
    pub fn record(&mut self, path: &Path, error: &AtlasError) {
        let category = error.category();
        if category == ErrorCategory::PermissionDenied {
            self.permission_denied.insert(path.to_path_buf());
            return;
        }
        self.skipped
            .entry(path.to_path_buf())
            .or_insert_with(|| FileFailure {
                category,
                message: error.to_string(),
            });
    }

    /// No file was skipped or denied
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.permission_denied.is_empty()
    }

    /// Skipped paths with the given category
    pub fn skipped_with(&self, category: ErrorCategory) -> impl Iterator<Item = &Path> {
        self.skipped
            .iter()
            .filter(move |(_, failure)| failure.category == category)
            .map(|(path, _)| path.as_path())
    }

    /// One consolidated line per category, for the presentation layer
    pub fn summary(&self) -> Vec<String> {
        let mut by_category: BTreeMap<ErrorCategory, Vec<&Path>> = BTreeMap::new();
        for (path, failure) in &self.skipped {
            by_category.entry(failure.category).or_default().push(path);
        }
        let mut lines: Vec<String> = by_category
            .into_iter()
            .map(|(category, paths)| {
                format!(
                    "{} file(s) skipped ({:?}): {}",
                    paths.len(),
                    category,
                    join(paths.into_iter())
                )
            })
            .collect();
        if !self.permission_denied.is_empty() {
            lines.push(format!(
                "{} file(s) not accessible: {}",
                self.permission_denied.len(),
                join(self.permission_denied.iter().map(|p| p.as_path()))
            ));
        }
        lines
    }
}

fn join<'a>(paths: impl Iterator<Item = &'a Path>) -> String {
    paths
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serializable view of a failure for structured output
#[derive(Debug, Serialize)]
pub struct FailureRecord<'a> {
    pub path: &'a Path,
    pub category: String,
    pub message: &'a str,
}

impl QueryReport {
    pub fn records(&self) -> Vec<FailureRecord<'_>> {
        self.skipped
            .iter()
            .map(|(path, failure)| FailureRecord {
                path,
                category: format!("{:?}", failure.category),
                message: &failure.message,
            })
            .collect()
    }
}
