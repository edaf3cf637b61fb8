//! Per-project configuration (`<project>/.orbit/config.json`)
//!
//! Only the fields orchestration consumes are modelled; everything else in
//! the document is preserved untouched in `raw` for status reporting.

use orbit_core::{OrbitError, Result};
use orbit_sandbox::IsolationPolicy;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Directory holding per-project orbit files
pub const PROJECT_DIR: &str = ".orbit";

/// Project configuration file name inside [`PROJECT_DIR`]
pub const PROJECT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(rename = "type")]
    runtime: Option<String>,
    #[serde(default)]
    sidecars: Vec<String>,
    sandbox: Option<Value>,
}

/// Parsed project configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// Runtime type (`node`, `python`, ...)
    pub runtime: Option<String>,
    /// Sidecars the project needs outside `dev`
    pub sidecars: Vec<String>,
    pub policy: IsolationPolicy,
    /// The whole document as read
    pub raw: Value,
}

impl ProjectConfig {
    pub fn path_for(project: &Path) -> PathBuf {
        project.join(PROJECT_DIR).join(PROJECT_CONFIG_FILE)
    }

    /// Whether the project has been initialized
    pub fn exists(project: &Path) -> bool {
        Self::path_for(project).is_file()
    }

    /// Load the configuration; a missing document is a precondition failure.
    pub fn load(project: &Path) -> Result<Self> {
        Self::load_optional(project)?
            .ok_or_else(|| OrbitError::ProjectNotInitialized(project.to_path_buf()))
    }

    /// Load the configuration if the project is initialized.
    pub fn load_optional(project: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(project);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&path, &content).map(Some)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let invalid = |reason: String| OrbitError::InvalidProjectConfig {
            path: path.to_path_buf(),
            reason,
        };

        let raw: Value = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
        let doc: ConfigDocument =
            serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;
        let policy = IsolationPolicy::from_document(doc.sandbox.as_ref())?;

        Ok(Self {
            runtime: doc.runtime,
            sidecars: doc.sidecars,
            policy,
            raw,
        })
    }
}
