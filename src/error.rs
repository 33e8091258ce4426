//! Error types shared across the filter.

use std::path::PathBuf;

use thiserror::Error;

/// A number list could not be loaded. The reload that produced it is
/// abandoned and the previously active lists stay in place.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not access path {}: {source}", path.display())]
    Access {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error walking directory {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("error reading file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// An action against the external call session failed. The call is
/// presumed already gone.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already terminated")]
    Terminated,

    #[error("signaling failure: {0}")]
    Signaling(String),
}

/// Audit file failures. These are logged and never change a call's
/// disposition.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("could not open audit file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not write audit file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
