//! Global Orbit settings
//!
//! Settings are read from `<orbit root>/orbit.toml`. Every field has a
//! default, so a missing file or a partial file is fine.
//!
//! ```toml
//! engine = "docker"
//! container_timeout_secs = 60
//! sandbox_timeout_secs = 120
//!
//! [limits]
//! memory = "2g"
//! cpus = "2.0"
//! pids = 512
//!
//! [images]
//! node = "node:20-bookworm-slim"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OrbitError, Result};

/// Environment variable overriding the orbit root directory
pub const ORBIT_ROOT_ENV: &str = "ORBIT_ROOT";

/// Settings file name inside the orbit root
pub const SETTINGS_FILE: &str = "orbit.toml";

/// Main settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitSettings {
    /// Orbit root directory (state database, compose files, registry)
    #[serde(skip)]
    pub root: PathBuf,

    /// Container engine executable
    pub engine: String,

    /// Timeout for container create/exec/remove and sidecar operations
    pub container_timeout_secs: u64,

    /// Timeout for hardware sandbox operations; microVM boot is slower
    pub sandbox_timeout_secs: u64,

    /// Timeout for each step of the sandbox health check
    pub health_check_timeout_secs: u64,

    /// Image used for container contexts when the runtime type has no entry in `images`
    pub default_image: String,

    /// Runtime type -> container image
    pub images: HashMap<String, String>,

    /// Resource limits applied through the compose security overlay
    pub limits: ResourceLimits,
}

impl Default for OrbitSettings {
    fn default() -> Self {
        let images = [
            ("node", "node:20-bookworm-slim"),
            ("python", "python:3.12-slim"),
            ("rust", "rust:1-slim"),
            ("go", "golang:1.22-bookworm"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            root: default_root(),
            engine: "docker".to_string(),
            container_timeout_secs: 60,
            sandbox_timeout_secs: 120,
            health_check_timeout_secs: 30,
            default_image: "debian:bookworm-slim".to_string(),
            images,
            limits: ResourceLimits::default(),
        }
    }
}

impl OrbitSettings {
    /// Create settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from the default orbit root
    pub fn load() -> Result<Self> {
        Self::load_from(default_root())
    }

    /// Load settings from `root/orbit.toml`, falling back to defaults when absent
    pub fn load_from(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let path = root.join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };
        settings.root = root;
        Ok(settings)
    }

    /// Set the orbit root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the engine executable
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn with_container_timeout(mut self, timeout: Duration) -> Self {
        self.container_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout_secs = timeout.as_secs();
        self
    }

    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("state.db")
    }

    pub fn compose_file(&self) -> PathBuf {
        self.root.join("docker").join("docker-compose.yml")
    }

    pub fn overlay_dir(&self) -> PathBuf {
        self.root.join("docker").join("overlays")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Container image for a project runtime type
    pub fn image_for(&self, runtime: Option<&str>) -> &str {
        runtime
            .and_then(|r| self.images.get(r))
            .map(String::as_str)
            .unwrap_or(&self.default_image)
    }

    /// Persist settings to `root/orbit.toml`
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let content = toml::to_string_pretty(self).map_err(|e| {
            OrbitError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(self.root.join(SETTINGS_FILE), content)?;
        Ok(())
    }
}

/// Resource limits for hardened sidecar services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory: String,
    pub cpus: String,
    pub pids: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: "2g".to_string(),
            cpus: "2.0".to_string(),
            pids: 512,
        }
    }
}

/// `$ORBIT_ROOT`, else `$HOME/.orbit`
pub fn default_root() -> PathBuf {
    if let Ok(root) = std::env::var(ORBIT_ROOT_ENV) {
        if !root.trim().is_empty() {
            return PathBuf::from(root);
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".orbit")
}
