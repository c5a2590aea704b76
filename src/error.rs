//! Flat error taxonomy for the engine. Every public function returns
//! `Result<T, WalgitError>`; callers that only care about the broad
//! category should match on `.kind()` rather than the variant itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalgitError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt object {hash}: {reason}")]
    Integrity { hash: String, reason: String },

    #[error("ignore rule error: {0}")]
    IgnoreRule(String),

    #[error("remote blob service error: {0}")]
    Remote(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Integrity,
    IgnoreRule,
    Remote,
    Conflict,
    NotFound,
    Cancelled,
    Config,
}

impl WalgitError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::IgnoreRule(_) => ErrorKind::IgnoreRule,
            Self::Remote(_) => ErrorKind::Remote,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn integrity(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity { hash: hash.into(), reason: reason.into() }
    }

    pub fn not_found(path: impl std::fmt::Display) -> Self {
        Self::NotFound(path.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalgitError>;
