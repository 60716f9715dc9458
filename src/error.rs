// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for vault-triage

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vault-triage operations
pub type Result<T> = std::result::Result<T, TriageError>;

/// vault-triage error types
#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File could not be read or is not valid UTF-8 text. The file stays in the inbox.
    #[error("Cannot read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Invalid category: {0:?} (expected Needs_Action or Done)")]
    InvalidCategory(String),

    /// Source vanished before the move, usually a duplicate notification.
    #[error("Source file no longer exists: {0:?}")]
    SourceMissing(PathBuf),

    /// Move failed. The file stays in the inbox and can be retried.
    #[error("Failed to move {path:?}: {source}")]
    Move {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Partial failure: the file was already moved but its log entry was not written.
    #[error("File {filename} was moved but its log entry could not be written: {source}")]
    LogWrite {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Classifier not available: {0}")]
    OracleUnavailable(String),

    #[error("Classifier failed: {0}")]
    OracleFailed(String),

    #[error("Classifier returned an undecodable response: {0}")]
    OracleResponse(String),

    #[error("Vault is locked by another instance (remove {0:?} if no other instance is running)")]
    VaultLocked(PathBuf),
}

/// Coarse error class, used as a stable label in log fields and the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    Read,
    InvalidCategory,
    SourceMissing,
    Move,
    LogWrite,
    Oracle,
    Locked,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Read => "read_error",
            ErrorKind::InvalidCategory => "invalid_category",
            ErrorKind::SourceMissing => "source_missing",
            ErrorKind::Move => "move_error",
            ErrorKind::LogWrite => "log_write_error",
            ErrorKind::Oracle => "oracle",
            ErrorKind::Locked => "vault_locked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TriageError {
    /// Classify this error for structured reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            TriageError::Config(_) | TriageError::Json(_) => ErrorKind::Config,
            TriageError::FileSystem(_) | TriageError::Watch(_) => ErrorKind::Io,
            TriageError::Read { .. } => ErrorKind::Read,
            TriageError::InvalidCategory(_) => ErrorKind::InvalidCategory,
            TriageError::SourceMissing(_) => ErrorKind::SourceMissing,
            TriageError::Move { .. } => ErrorKind::Move,
            TriageError::LogWrite { .. } => ErrorKind::LogWrite,
            TriageError::Api(_)
            | TriageError::OracleUnavailable(_)
            | TriageError::OracleFailed(_)
            | TriageError::OracleResponse(_) => ErrorKind::Oracle,
            TriageError::VaultLocked(_) => ErrorKind::Locked,
        }
    }
}
