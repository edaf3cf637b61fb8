//! Sidecar reconciliation
//!
//! Sidecars are compose profiles named `sidecar-<name>` in the shared orbit
//! compose file. Starting several at once fans out concurrently and fails as
//! a whole if any single start fails. Every start runs to completion before
//! the failure is reported and nothing is rolled back, so after a failure the
//! caller should re-query [`SidecarReconciler::list_running`].

pub mod catalog;
pub mod overlay;

pub use catalog::{SidecarSpec, SIDECAR_CATALOG};
pub use overlay::SecurityOverlay;

use futures::future::join_all;
use lazy_static::lazy_static;
use orbit_core::engine::{split_rows, Engine, Invocation};
use orbit_core::{OrbitSettings, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

lazy_static! {
    static ref SIDECAR_NAME: Regex = Regex::new(r"sidecar-(\w+)").unwrap();
}

const PS_FORMAT: &str = "{{.ID}}|{{.Names}}|{{.Image}}|{{.Status}}|{{.Ports}}";

/// Compose profile (and service) name of a sidecar
pub fn service_name(sidecar: &str) -> String {
    format!("sidecar-{sidecar}")
}

/// Sidecar identifier embedded in a container name
pub fn sidecar_from_container(container: &str) -> Option<String> {
    SIDECAR_NAME
        .captures(container)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Running orbit container as reported by `ps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub ports: String,
}

pub struct SidecarReconciler {
    engine: Arc<dyn Engine>,
    program: String,
    compose_file: PathBuf,
    timeout: Duration,
}

impl std::fmt::Debug for SidecarReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarReconciler")
            .field("program", &self.program)
            .field("compose_file", &self.compose_file)
            .finish_non_exhaustive()
    }
}

impl SidecarReconciler {
    pub fn new(engine: Arc<dyn Engine>, settings: &OrbitSettings) -> Self {
        Self {
            engine,
            program: settings.engine.clone(),
            compose_file: settings.compose_file(),
            timeout: settings.container_timeout(),
        }
    }

    fn compose(&self, overlay: Option<&Path>) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .args(["compose", "-f"])
            .arg(self.compose_file.display().to_string());
        if let Some(overlay) = overlay {
            inv = inv.arg("-f").arg(overlay.display().to_string());
        }
        inv.timeout(self.timeout)
    }

    async fn start_one(&self, name: &str, overlay: Option<&Path>) -> Result<()> {
        let invocation = self
            .compose(overlay)
            .arg("--profile")
            .arg(service_name(name))
            .args(["up", "-d"]);
        self.engine.run(invocation).await?;
        info!(sidecar = name, "sidecar started");
        Ok(())
    }

    /// Start every named sidecar concurrently, optionally hardened by a
    /// compose override file. Returns the names started.
    pub async fn start(&self, names: &[String], overlay: Option<&Path>) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        // In-flight starts are never dropped; a sibling failure only decides the result.
        let results = join_all(names.iter().map(|name| self.start_one(name, overlay))).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(names.to_vec())
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let invocation = self
            .compose(None)
            .arg("--profile")
            .arg(service_name(name))
            .arg("down");
        self.engine.run(invocation).await?;
        info!(sidecar = name, "sidecar stopped");
        Ok(())
    }

    /// Bring down every service of the orbit compose file, whatever profile
    pub async fn stop_all(&self) -> Result<()> {
        let invocation = self.compose(None).args(["--profile", "*", "down"]);
        self.engine.run(invocation).await?;
        info!("all sidecars stopped");
        Ok(())
    }

    /// Orbit-owned running containers. Probe failures yield an empty list.
    pub async fn running_containers(&self) -> Vec<RunningContainer> {
        let invocation = Invocation::new(&self.program).args(["ps", "--format", PS_FORMAT]);
        let output = match self.engine.run(invocation).await {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "container listing failed");
                return Vec::new();
            }
        };

        split_rows(&output.stdout)
            .into_iter()
            .filter(|fields| fields.len() >= 4)
            .filter(|fields| fields[1].contains("orbit"))
            .map(|fields| RunningContainer {
                id: fields[0].to_string(),
                name: fields[1].to_string(),
                image: fields[2].to_string(),
                status: fields[3].to_string(),
                ports: fields.get(4).copied().unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Identifiers of running sidecars; containers not following the naming
    /// convention are dropped.
    pub async fn list_running(&self) -> Vec<String> {
        let mut running: Vec<String> = self
            .running_containers()
            .await
            .iter()
            .filter_map(|c| sidecar_from_container(&c.name))
            .collect();
        running.sort();
        running.dedup();
        running
    }
}
