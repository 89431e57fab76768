//! Error types for the copy orchestrator.

use std::path::PathBuf;
use thiserror::Error;

use crate::volumes::VolumeRole;

/// Main error type for appliance operations.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid exclusion pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("no {role} volume mounted")]
    AbsentVolume { role: VolumeRole },

    #[error("found {count} {role} volumes, expected exactly one")]
    AmbiguousVolume { role: VolumeRole, count: usize },

    #[error("cannot read source volume {path}: {reason}")]
    SourceRead { path: PathBuf, reason: String },

    #[error("cannot stat destination volume {path}: {reason}")]
    DestinationStat { path: PathBuf, reason: String },

    #[error("not enough space on destination: need {required} bytes, have {available}")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("failed to run {tool}: {reason}")]
    Tool { tool: String, reason: String },

    #[error("could not parse transfer summary: {0}")]
    VerificationParse(String),

    #[error("copy process did not terminate within the grace period")]
    CancelTimeout,
}

/// Result type alias for appliance operations.
pub type CopyResult<T> = Result<T, CopyError>;
