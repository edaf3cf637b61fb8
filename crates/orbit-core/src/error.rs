//! Error types for Orbit
//!
//! Every library crate in the workspace reports failures through [`OrbitError`].
//! Variants are grouped the way callers need to react to them: precondition
//! failures are fatal and never retried, engine unavailability is fatal except
//! where an operation explicitly tolerates it, and external-call failures carry
//! enough context (command line, exit code, stderr) to be surfaced verbatim.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for Orbit operations
pub type Result<T> = std::result::Result<T, OrbitError>;

/// Main error type for Orbit operations
#[derive(Error, Debug)]
pub enum OrbitError {
    /// The project has no `.orbit/config.json`
    #[error("Project not initialized at {}: no .orbit/config.json found", .0.display())]
    ProjectNotInitialized(PathBuf),

    /// The project configuration exists but cannot be used
    #[error("Invalid project configuration at {}: {reason}", path.display())]
    InvalidProjectConfig { path: PathBuf, reason: String },

    /// The isolation policy document is incomplete or contradictory
    #[error("Invalid isolation policy: {0}")]
    InvalidPolicy(String),

    #[error("Unknown sidecar: {name}. Available: {available}")]
    UnknownSidecar { name: String, available: String },

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Environment '{0}' cannot be entered with a switch")]
    UnsupportedTarget(String),

    /// The container engine binary could not be spawned
    #[error("Container engine '{0}' is not installed. Install Docker Desktop or docker.io")]
    EngineNotInstalled(String),

    #[error("Container engine daemon is not running. Start Docker Desktop or run: sudo systemctl start docker")]
    EngineNotRunning,

    /// An engine invocation exited unsuccessfully
    #[error("Command `{command}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {}s", timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),
}

impl OrbitError {
    /// Whether this is a precondition failure that must be surfaced verbatim
    /// and never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotInitialized(_)
                | Self::InvalidProjectConfig { .. }
                | Self::InvalidPolicy(_)
                | Self::UnknownSidecar { .. }
                | Self::MissingArgument(_)
                | Self::UnsupportedTarget(_)
        )
    }

    /// Whether the engine itself is missing or stopped.
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, Self::EngineNotInstalled(_) | Self::EngineNotRunning)
    }

    /// Whether an engine failure reports that the target resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("no such") || stderr.contains("not found")
            }
            _ => false,
        }
    }
}
