//! Isolation lifecycle management
//!
//! State machine for a single named context:
//!
//! ```text
//! absent --create--> active --stop--> stopped
//!   ^                  |                 |
//!   +------remove------+-----------------+
//! reset = remove, then create
//! ```
//!
//! Contexts are named per project and environment: `orbit-<project>-<env>`.
//! Creation is idempotent; an existing context of the same name is reused.
//! This component does not verify that a created context is reachable, see
//! [`crate::detector::CapabilityDetector::health_check`] for that.

mod syntax;

pub use syntax::{supports, MANAGED_LABEL, WORKSPACE_MOUNT};

use orbit_core::engine::{split_rows, Engine};
use orbit_core::{Backend, Environment, OrbitSettings, Result, OWNERSHIP_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::policy::Directive;

/// Observed state of an existing context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStatus {
    Running,
    Stopped,
    Unknown,
}

impl ContextStatus {
    fn parse(raw: &str) -> Self {
        let raw = raw.to_ascii_lowercase();
        if raw.contains("running") || raw.starts_with("up") {
            Self::Running
        } else if raw.contains("stopped") || raw.contains("exited") || raw.contains("created") {
            Self::Stopped
        } else {
            Self::Unknown
        }
    }
}

/// A named, addressable isolated execution environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolatedContext {
    pub name: String,
    pub backend: Backend,
    pub status: ContextStatus,
    /// Creation time as reported by the engine
    pub created_at: Option<String>,
}

/// Options for [`IsolationManager::exec`]
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Defaults to the manager's operation timeout
    pub timeout: Option<Duration>,
    /// Defaults to the mounted workspace
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Sanitize a project name: lowercase, anything outside `[a-z0-9]` becomes a
/// dash, runs of dashes collapse.
pub fn sanitize(project_name: &str) -> String {
    let mut out = String::with_capacity(project_name.len());
    for c in project_name.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Deterministic context name for a project and environment
pub fn context_name(project_name: &str, env: Environment) -> String {
    format!("{OWNERSHIP_PREFIX}{}-{env}", sanitize(project_name))
}

/// Last path component of a project path, or `unknown`
pub fn project_name(project_path: &Path) -> String {
    project_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Drives contexts of one backend through the engine
pub struct IsolationManager {
    engine: Arc<dyn Engine>,
    backend: Backend,
    program: String,
    timeout: Duration,
    image: String,
}

impl std::fmt::Debug for IsolationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationManager")
            .field("backend", &self.backend)
            .field("program", &self.program)
            .field("timeout", &self.timeout)
            .field("image", &self.image)
            .finish()
    }
}

impl IsolationManager {
    /// Manager for `backend`, with the operation timeout matching that backend
    pub fn new(engine: Arc<dyn Engine>, backend: Backend, settings: &OrbitSettings) -> Self {
        let timeout = match backend {
            Backend::Sandbox => settings.sandbox_timeout(),
            Backend::Container => settings.container_timeout(),
        };
        Self {
            engine,
            backend,
            program: settings.engine.clone(),
            timeout,
            image: settings.default_image.clone(),
        }
    }

    /// Image for container contexts (ignored by the sandbox backend)
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Orbit-owned contexts. Probe failures and unparseable output yield an
    /// empty list.
    pub async fn list(&self) -> Vec<IsolatedContext> {
        let output = match self.engine.run(syntax::list(&self.program, self.backend)).await {
            Ok(output) => output,
            Err(e) => {
                debug!(backend = %self.backend, error = %e, "context listing failed");
                return Vec::new();
            }
        };

        split_rows(&output.stdout)
            .into_iter()
            .filter_map(|fields| {
                let name = *fields.first()?;
                if !name.starts_with(OWNERSHIP_PREFIX) {
                    return None;
                }
                Some(IsolatedContext {
                    name: name.to_string(),
                    backend: self.backend,
                    status: fields
                        .get(1)
                        .map_or(ContextStatus::Unknown, |s| ContextStatus::parse(s)),
                    created_at: fields
                        .get(2)
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string()),
                })
            })
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<IsolatedContext> {
        self.list().await.into_iter().find(|c| c.name == name)
    }

    /// Create the context, binding `workspace` read-write and applying every
    /// directive the backend can express (see [`supports`]). Returns the
    /// existing name unchanged if the context exists.
    pub async fn create(
        &self,
        name: &str,
        workspace: &Path,
        directives: &[Directive],
    ) -> Result<String> {
        if self.get(name).await.is_some() {
            debug!(context = name, "context already exists, reusing");
            return Ok(name.to_string());
        }

        for skipped in directives.iter().filter(|d| !supports(self.backend, d)) {
            warn!(
                context = name,
                backend = %self.backend,
                directive = %skipped,
                "directive not expressible on this backend, skipped"
            );
        }

        let invocation = syntax::create(
            &self.program,
            self.backend,
            name,
            workspace,
            directives,
            &self.image,
        )
        .timeout(self.timeout);
        self.engine.run(invocation).await?;

        info!(
            context = name,
            backend = %self.backend,
            directives = directives.len(),
            "isolated context created"
        );
        Ok(name.to_string())
    }

    /// Run `command` through a shell inside an active context
    pub async fn exec(&self, name: &str, command: &str, opts: ExecOptions) -> Result<ExecOutput> {
        let working_dir = opts.working_dir.as_deref().unwrap_or(WORKSPACE_MOUNT);
        let invocation = syntax::exec(&self.program, self.backend, name, command, working_dir)
            .timeout(opts.timeout.unwrap_or(self.timeout));
        let output = self.engine.run(invocation).await?;
        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Stop a context, preserving its state. Already stopped or missing
    /// contexts are not an error.
    pub async fn stop(&self, name: &str) {
        let invocation = syntax::stop(&self.program, self.backend, name).timeout(self.timeout);
        match self.engine.run(invocation).await {
            Ok(_) => info!(context = name, "isolated context stopped"),
            Err(e) => debug!(context = name, error = %e, "stop ignored"),
        }
    }

    /// Remove a context. Returns `false` when it did not exist; other
    /// failures propagate.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let invocation = syntax::remove(&self.program, self.backend, name).timeout(self.timeout);
        match self.engine.run(invocation).await {
            Ok(_) => {
                info!(context = name, "isolated context removed");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(context = name, "context already absent");
                Ok(false)
            }
            Err(e) => {
                warn!(context = name, error = %e, "context removal failed");
                Err(e)
            }
        }
    }

    /// Destroy and recreate a context from scratch
    pub async fn reset(
        &self,
        name: &str,
        workspace: &Path,
        directives: &[Directive],
    ) -> Result<String> {
        self.remove(name).await?;
        self.create(name, workspace, directives).await
    }
}
