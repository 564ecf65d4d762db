//! Failure taxonomy for loading trees and answering queries.
//!
//! - `LoadWarning`: non-fatal issue while building a snapshot; travels with results.
//! - `LoadError`: the tree could not be turned into a snapshot. Never cached.
//! - `ResolveError`: input validation local to resolve-by-position.
//! - `QueryError`: what a single query can fail with, as seen by the dispatcher.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub message: String,
    pub path: Option<PathBuf>,
}

impl LoadWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "{}: {}", p.display(), self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("tree path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported tree descriptor {} (expected .sln, .slnx, .csproj or a directory)", .0.display())]
    Unsupported(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("no loadable C# projects in {} ({} warning(s))", path.display(), warnings.len())]
    NoProjects {
        path: PathBuf,
        warnings: Vec<LoadWarning>,
    },

    #[error("inconsistent source model: {0}")]
    Inconsistent(String),

    #[error("loading {} timed out after {}s", path.display(), timeout.as_secs_f64())]
    TimedOut { path: PathBuf, timeout: Duration },

    #[error("loading {} was cancelled", .0.display())]
    Cancelled(PathBuf),

    #[error("source model worker failed: {0}")]
    Worker(String),
}

impl LoadError {
    /// Warnings gathered before the load gave up.
    pub fn warnings(&self) -> &[LoadWarning] {
        match self {
            LoadError::NoProjects { warnings, .. } => warnings,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("document not found in tree: {}", .0.display())]
    DocumentNotFound(PathBuf),

    #[error("line {line} out of range (document has {line_count} lines)")]
    LineOutOfRange { line: u32, line_count: usize },

    #[error("column {column} out of range (line {line} has {line_length} characters)")]
    ColumnOutOfRange {
        line: u32,
        column: u32,
        line_length: usize,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl QueryError {
    pub fn configuration(message: impl Into<String>) -> Self {
        QueryError::Configuration(message.into())
    }
}
