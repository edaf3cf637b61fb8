//! Compose security overlay
//!
//! Compose-style service start takes no per-invocation security flags, so
//! container-backend directives are written to an override file and passed
//! as a second `-f` to `compose up`. JSON is valid compose YAML.

use orbit_core::settings::ResourceLimits;
use orbit_core::Result;
use orbit_sandbox::Directive;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hardening applied to a single compose service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceHardening {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tmpfs: Vec<String>,
    pub mem_limit: String,
    pub cpus: String,
    pub pids_limit: u32,
}

impl ServiceHardening {
    pub fn from_directives(directives: &[Directive], limits: &ResourceLimits) -> Self {
        let mut hardening = Self {
            mem_limit: limits.memory.clone(),
            cpus: limits.cpus.clone(),
            pids_limit: limits.pids,
            ..Self::default()
        };
        for directive in directives {
            match directive {
                Directive::ReadOnlyRoot => {
                    hardening.read_only = true;
                    hardening.tmpfs.push("/tmp".to_string());
                }
                Directive::DropAllCapabilities => hardening.cap_drop.push("ALL".to_string()),
                Directive::NoNewPrivileges => hardening
                    .security_opt
                    .push("no-new-privileges:true".to_string()),
                // Sidecars must stay reachable from the isolated context.
                Directive::DisableNetwork | Directive::AllowHost(_) | Directive::DenyHost(_) => {}
            }
        }
        hardening
    }
}

/// Override document covering every started sidecar service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityOverlay {
    pub services: BTreeMap<String, ServiceHardening>,
}

impl SecurityOverlay {
    pub fn new(sidecars: &[String], directives: &[Directive], limits: &ResourceLimits) -> Self {
        let hardening = ServiceHardening::from_directives(directives, limits);
        let services = sidecars
            .iter()
            .map(|name| (super::service_name(name), hardening.clone()))
            .collect();
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Write the overlay to `<dir>/<file_stem>.json`, replacing any previous one
    pub fn write(&self, dir: &Path, file_stem: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{file_stem}.json"));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        debug!(path = %path.display(), services = self.services.len(), "security overlay written");
        Ok(path)
    }
}
