//! Top-level error and exit codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::package::{ManifestError, PackagingError};
use crate::validate::{Issue, ValidateError};

/// Stable process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Build and validation passed
    Success = 0,
    /// Generic I/O or output failure
    Io = 1,
    /// Configuration could not be resolved
    Config = 10,
    /// Manifest could not be built
    Manifest = 20,
    /// Archive could not be written
    Packaging = 30,
    /// Structural audit found hard errors
    Validation = 40,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Io),
            10 => Some(ExitCode::Config),
            20 => Some(ExitCode::Manifest),
            30 => Some(ExitCode::Packaging),
            40 => Some(ExitCode::Validation),
            _ => None,
        }
    }
}

/// Any failure that stops a build
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("packaging error: {0}")]
    Packaging(#[from] PackagingError),

    #[error("validation error: {0}")]
    Validate(#[from] ValidateError),

    #[error("validation failed for {archive}: {} hard error(s)", .issues.len())]
    ValidationFailure { archive: PathBuf, issues: Vec<Issue> },

    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PackError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            PackError::Config(_) => ExitCode::Config,
            PackError::Manifest(_) => ExitCode::Manifest,
            PackError::Packaging(_) => ExitCode::Packaging,
            PackError::ValidationFailure { .. } => ExitCode::Validation,
            PackError::Validate(_) | PackError::Io { .. } | PackError::Serialization(_) => {
                ExitCode::Io
            }
        }
    }
}

pub type PackResult<T> = Result<T, PackError>;
