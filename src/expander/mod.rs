//! File pattern expansion
//!
//! Turns a Karma-style `files` list into the ordered list of scripts to load:
//! - `*`, `**`, `?` and `[...]` patterns are matched with the `glob` crate
//! - test/spec files and anything under `node_modules` are excluded
//! - duplicates are dropped
//! - the result is sorted (the default) or kept in declaration order
//!
//! Patterns without glob metacharacters are literal paths. They are returned
//! even when the file does not exist so the loader reports the missing file
//! instead of silently skipping it.

use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Paths excluded from every expansion unless the caller overrides them
pub const DEFAULT_EXCLUDES: &[&str] = &["**/*.spec.js", "**/*.test.js", "**/node_modules/**"];

/// Errors that can occur during pattern expansion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Order of the expanded file list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandOrder {
    /// Ascending lexicographic order across all patterns
    #[default]
    Sorted,
    /// Pattern order; sorted within a pattern; first match wins
    Declared,
}

/// Files produced by an expansion, plus the patterns that could not be parsed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub files: Vec<PathBuf>,
    pub invalid: Vec<ExpandError>,
}

/// Expands glob patterns relative to a base directory
#[derive(Debug, Clone)]
pub struct FilePatternExpander {
    base_dir: PathBuf,
    excludes: Vec<Pattern>,
    order: ExpandOrder,
    options: MatchOptions,
}

fn has_glob_magic(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Forward-slash form of a path, used for matching and ordering
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn compile(patterns: &[&str]) -> Result<Vec<Pattern>, ExpandError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ExpandError::InvalidPattern {
                pattern: p.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

impl FilePatternExpander {
    /// Create an expander with the default excludes and sorted output.
    /// An empty `base_dir` means the working directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let base_dir = if base_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            base_dir
        };
        Self {
            base_dir,
            excludes: compile(DEFAULT_EXCLUDES).unwrap_or_default(),
            order: ExpandOrder::default(),
            options: MatchOptions::new(),
        }
    }

    /// Replace the exclude list
    pub fn with_excludes<S: AsRef<str>>(mut self, excludes: &[S]) -> Result<Self, ExpandError> {
        let patterns: Vec<&str> = excludes.iter().map(AsRef::as_ref).collect();
        self.excludes = compile(&patterns)?;
        Ok(self)
    }

    pub fn with_order(mut self, order: ExpandOrder) -> Self {
        self.order = order;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Whether a (base-relative) path is filtered out by the exclude list
    pub fn is_excluded(&self, path: &Path) -> bool {
        let key = path_key(path);
        self.excludes
            .iter()
            .any(|exclude| exclude.matches_with(&key, self.options))
    }

    /// Expand patterns into files, dropping invalid patterns
    pub fn expand<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<PathBuf> {
        self.expand_with_report(patterns).files
    }

    /// Expand patterns into files and report the patterns that failed to parse
    pub fn expand_with_report<S: AsRef<str>>(&self, patterns: &[S]) -> Expansion {
        let mut expansion = Expansion::default();
        let mut seen: HashSet<String> = HashSet::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            match self.expand_pattern(pattern) {
                Ok(files) => {
                    tracing::debug!(pattern, matched = files.len(), "expanded pattern");
                    for file in files {
                        if seen.insert(path_key(&file)) {
                            expansion.files.push(file);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("{}", err);
                    expansion.invalid.push(err);
                }
            }
        }

        if self.order == ExpandOrder::Sorted {
            expansion.files.sort_by_key(|path| path_key(path));
        }

        expansion
    }

    /// Matches of a single pattern, sorted, excludes applied
    fn expand_pattern(&self, pattern: &str) -> Result<Vec<PathBuf>, ExpandError> {
        if !has_glob_magic(pattern) {
            let literal = PathBuf::from(pattern);
            if self.is_excluded(&literal) || self.base_dir.join(&literal).is_dir() {
                return Ok(Vec::new());
            }
            return Ok(vec![literal]);
        }

        // Validate the pattern on its own so errors name what the caller wrote
        Pattern::new(pattern).map_err(|e| ExpandError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let absolute = Path::new(pattern).is_absolute();
        let full_pattern = if absolute {
            pattern.to_string()
        } else {
            format!(
                "{}/{}",
                Pattern::escape(&path_key(&self.base_dir)).trim_end_matches('/'),
                pattern
            )
        };

        let entries =
            glob::glob_with(&full_pattern, self.options).map_err(|e| ExpandError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::debug!(pattern, "skipping unreadable path: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let relative = match path.strip_prefix(&self.base_dir) {
                Ok(rel) if !absolute => rel.to_path_buf(),
                _ => path.clone(),
            };
            if self.is_excluded(&relative) {
                tracing::debug!(file = %relative.display(), "excluded");
                continue;
            }
            files.push(relative);
        }

        files.sort_by_key(|path| path_key(path));
        Ok(files)
    }
}
