use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_LEX: &str = "DL-ERR-LEX-001";
pub const ERR_NESTED_CLOSURE: &str = "DL-ERR-CLOSURE-001";
pub const ERR_UNRESOLVED: &str = "DL-ERR-RESOLVE-001";
pub const ERR_STRUCTURE: &str = "DL-ERR-STRUCTURE-001";
pub const ERR_IO: &str = "DL-ERR-IO-001";
pub const ERR_CONFIG: &str = "DL-ERR-CONFIG-001";

/// Number of source characters kept around an error location.
const EXCERPT_RADIUS: usize = 24;

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERT ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Every failure the rewrite engine or the bundler can report.
///
/// All variants are fatal for the unit (rewrite) or the whole bundle; the
/// caller gets the path and a short excerpt of the offending source.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{path}: {message} at offset {offset}")]
    Lex {
        path: PathBuf,
        message: String,
        offset: usize,
    },

    #[error("{path}: unsupported construct: {construct} near `{context}`")]
    UnsupportedConstruct {
        path: PathBuf,
        construct: String,
        context: String,
    },

    #[error("{path}: cannot resolve `{subject}`: {reason}")]
    Resolution {
        path: PathBuf,
        subject: String,
        reason: String,
    },

    #[error("{path}: unexpected structure: {reason}")]
    Structural { path: PathBuf, reason: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConvertError {
    /// Stable code for reporting.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::Lex { .. } => ERR_LEX,
            ConvertError::UnsupportedConstruct { .. } => ERR_NESTED_CLOSURE,
            ConvertError::Resolution { .. } => ERR_UNRESOLVED,
            ConvertError::Structural { .. } => ERR_STRUCTURE,
            ConvertError::Io { .. } => ERR_IO,
            ConvertError::Config(_) => ERR_CONFIG,
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        ConvertError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn resolution(path: &Path, subject: &str, reason: &str) -> Self {
        ConvertError::Resolution {
            path: path.to_path_buf(),
            subject: subject.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attach a path to an error raised before the unit's path was known.
    pub fn with_path(self, unit: &Path) -> Self {
        match self {
            ConvertError::Lex {
                path,
                message,
                offset,
            } if path.as_os_str().is_empty() => ConvertError::Lex {
                path: unit.to_path_buf(),
                message,
                offset,
            },
            ConvertError::Resolution {
                path,
                subject,
                reason,
            } if path.as_os_str().is_empty() => ConvertError::Resolution {
                path: unit.to_path_buf(),
                subject,
                reason,
            },
            other => other,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ConvertError::Lex { path, .. }
            | ConvertError::UnsupportedConstruct { path, .. }
            | ConvertError::Resolution { path, .. }
            | ConvertError::Structural { path, .. }
            | ConvertError::Io { path, .. } => Some(path),
            ConvertError::Config(_) => None,
        }
    }
}

/// Single-line excerpt of `source` around `offset`, used as error context.
pub fn excerpt(source: &str, offset: usize) -> String {
    let mut start = offset.saturating_sub(EXCERPT_RADIUS).min(source.len());
    while !source.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + EXCERPT_RADIUS).min(source.len());
    while !source.is_char_boundary(end) {
        end += 1;
    }
    source[start..end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub type Result<T> = std::result::Result<T, ConvertError>;
