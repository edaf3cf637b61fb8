//! Hardware sandbox capability detection
//!
//! Probes the host on every call (capabilities change with software updates)
//! and recommends an isolation backend. Probing never fails: every probe error
//! degrades to a negative result.

use orbit_core::engine::{Engine, Invocation};
use orbit_core::{Backend, OrbitSettings, OWNERSHIP_PREFIX};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::lifecycle::{ExecOptions, IsolationManager};

/// Literal the health check expects back from the throwaway context
const HEALTH_PROBE_OUTPUT: &str = "ok";

/// What the host can do right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationCapabilities {
    /// The hardware sandbox runtime answered its capability query
    pub has_sandbox: bool,
    /// Virtualization desktop runtime identifier, if one is installed
    pub desktop_version: Option<String>,
    /// Host platform (`linux`, `macos`, `windows`, ...)
    pub platform: String,
    pub recommended: Backend,
    pub reason: String,
}

/// Outcome of an end-to-end sandbox health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered recommendation policy
pub fn recommend(
    has_sandbox: bool,
    platform: &str,
    desktop_version: Option<&str>,
) -> (Backend, String) {
    if has_sandbox {
        (
            Backend::Sandbox,
            "Sandbox runtime detected: microVM isolation available".to_string(),
        )
    } else if platform == "linux" {
        (
            Backend::Container,
            "Sandboxes unsupported on this platform: using hardened containers".to_string(),
        )
    } else if desktop_version.is_none() {
        (
            Backend::Container,
            "Hypervisor runtime absent: sandboxes require a virtualization desktop runtime"
                .to_string(),
        )
    } else {
        (
            Backend::Container,
            "Sandbox feature not enabled: update the desktop runtime or enable experimental features"
                .to_string(),
        )
    }
}

pub struct CapabilityDetector {
    engine: Arc<dyn Engine>,
    settings: OrbitSettings,
    platform: String,
}

impl std::fmt::Debug for CapabilityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDetector")
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl CapabilityDetector {
    pub fn new(engine: Arc<dyn Engine>, settings: &OrbitSettings) -> Self {
        Self {
            engine,
            settings: settings.clone(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Override the detected host platform
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    async fn has_sandbox_runtime(&self) -> bool {
        let probe = Invocation::new(&self.settings.engine).args(["sandbox", "--help"]);
        self.engine.run(probe).await.is_ok()
    }

    /// Desktop runtime name, e.g. "Docker Desktop 4.40.0"
    async fn desktop_version(&self) -> Option<String> {
        let probe = Invocation::new(&self.settings.engine).args([
            "version",
            "--format",
            "{{.Server.Platform.Name}}",
        ]);
        let output = self.engine.run(probe).await.ok()?;
        let name = output.stdout.trim();
        name.to_lowercase()
            .contains("desktop")
            .then(|| name.to_string())
    }

    /// Probe the host and recommend a backend
    pub async fn detect(&self) -> IsolationCapabilities {
        let (has_sandbox, desktop_version) =
            tokio::join!(self.has_sandbox_runtime(), self.desktop_version());
        let (recommended, reason) =
            recommend(has_sandbox, &self.platform, desktop_version.as_deref());

        debug!(
            has_sandbox,
            platform = %self.platform,
            recommended = %recommended,
            "isolation capabilities detected"
        );

        IsolationCapabilities {
            has_sandbox,
            desktop_version,
            platform: self.platform.clone(),
            recommended,
            reason,
        }
    }

    /// Create a uniquely named throwaway sandbox, run a trivial command in it
    /// and compare the output. The sandbox is always removed afterwards,
    /// whatever happened in between.
    pub async fn health_check(&self) -> HealthReport {
        let timeout = self.settings.health_check_timeout();
        let manager = IsolationManager::new(self.engine.clone(), Backend::Sandbox, &self.settings)
            .with_timeout(timeout);
        let name = format!(
            "{OWNERSHIP_PREFIX}healthcheck-{}",
            uuid::Uuid::new_v4().simple()
        );
        let start = Instant::now();

        let outcome = self.probe(&manager, &name, timeout).await;

        if let Err(e) = manager.remove(&name).await {
            warn!(context = %name, error = %e, "health check cleanup failed");
        }

        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(()) => {
                info!(latency_ms, "sandbox health check passed");
                HealthReport {
                    healthy: true,
                    latency_ms,
                    error: None,
                }
            }
            Err(error) => {
                warn!(latency_ms, %error, "sandbox health check failed");
                HealthReport {
                    healthy: false,
                    latency_ms,
                    error: Some(error),
                }
            }
        }
    }

    async fn probe(
        &self,
        manager: &IsolationManager,
        name: &str,
        timeout: Duration,
    ) -> Result<(), String> {
        let workspace = tempfile::Builder::new()
            .prefix("orbit-healthcheck-")
            .tempdir()
            .map_err(|e| e.to_string())?;

        manager
            .create(name, workspace.path(), &[])
            .await
            .map_err(|e| e.to_string())?;

        let output = manager
            .exec(
                name,
                &format!("echo {HEALTH_PROBE_OUTPUT}"),
                ExecOptions {
                    timeout: Some(timeout),
                    working_dir: None,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let got = output.stdout.trim();
        if got != HEALTH_PROBE_OUTPUT {
            return Err(format!("Unexpected output: {got}"));
        }
        Ok(())
    }
}
