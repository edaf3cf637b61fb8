//! Operation surface
//!
//! One method per front-end operation: `status`, `switch`, `sidecars`,
//! `sandbox`, `stop_all`, `get_state`. Front-ends (CLI, tool server) only
//! parse arguments and serialize the returned reports.

use orbit_core::engine::{engine_status, require_engine, Engine, EngineStatus};
use orbit_core::storage::{AuditLogEntry, NewAuditEntry, ProjectState};
use orbit_core::{Backend, Environment, OrbitSettings, Result, StateStore};
use orbit_sandbox::policy::{describe, to_directives};
use orbit_sandbox::{
    context_name, project_name, CapabilityDetector, HealthReport, IsolatedContext,
    IsolationCapabilities, IsolationManager,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::orchestrator::{EnvironmentOrchestrator, SwitchResult};
use crate::project::ProjectConfig;
use crate::sidecars::{catalog, RunningContainer, SidecarReconciler, SidecarSpec, SIDECAR_CATALOG};

/// Audit entries shown by `status`
pub const STATUS_AUDIT_LIMIT: usize = 5;

/// Default number of audit entries returned by `get_state`
pub const DEFAULT_AUDIT_LIMIT: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarAction {
    List,
    Start(String),
    Stop(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxAction {
    Status,
    Create,
    Reset,
    Remove,
    Health,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateQuery {
    Projects,
    Audit { project: String, limit: usize },
    Registry,
    Config,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub path: String,
    pub name: String,
    pub initialized: bool,
    #[serde(rename = "type")]
    pub runtime: Option<String>,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    pub current: Option<Environment>,
    pub sidecars_running: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    #[serde(flatten)]
    pub status: EngineStatus,
    pub containers: Vec<RunningContainer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project: ProjectInfo,
    pub environment: EnvironmentInfo,
    pub engine: EngineInfo,
    pub capabilities: IsolationCapabilities,
    pub contexts: Vec<IsolatedContext>,
    /// Policy summary for the recommended backend
    pub policy: Option<String>,
    pub recent_activity: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SidecarsReport {
    pub action: &'static str,
    pub available: &'static [SidecarSpec],
    pub running: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SandboxReport {
    Status {
        capabilities: IsolationCapabilities,
        contexts: Vec<IsolatedContext>,
    },
    Provisioned {
        name: String,
        backend: Backend,
        policy: String,
        message: String,
    },
    Removed {
        name: String,
        removed: bool,
        message: String,
    },
    Health {
        capabilities: IsolationCapabilities,
        health: HealthReport,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopAllReport {
    pub success: bool,
    pub containers_stopped: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    pub query_type: &'static str,
    pub data: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

pub struct OrbitService {
    engine: Arc<dyn Engine>,
    store: Arc<StateStore>,
    settings: OrbitSettings,
    orchestrator: EnvironmentOrchestrator,
    detector: CapabilityDetector,
    sidecars: SidecarReconciler,
}

impl std::fmt::Debug for OrbitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrbitService")
            .field("root", &self.settings.root)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl OrbitService {
    pub fn new(engine: Arc<dyn Engine>, store: Arc<StateStore>, settings: OrbitSettings) -> Self {
        Self {
            orchestrator: EnvironmentOrchestrator::new(
                engine.clone(),
                store.clone(),
                settings.clone(),
            ),
            detector: CapabilityDetector::new(engine.clone(), &settings),
            sidecars: SidecarReconciler::new(engine.clone(), &settings),
            engine,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &OrbitSettings {
        &self.settings
    }

    fn managers(&self) -> [IsolationManager; 2] {
        [Backend::Sandbox, Backend::Container]
            .map(|backend| IsolationManager::new(self.engine.clone(), backend, &self.settings))
    }

    async fn all_contexts(&self) -> Vec<IsolatedContext> {
        let [sandbox, container] = self.managers();
        let (mut contexts, containers) = tokio::join!(sandbox.list(), container.list());
        contexts.extend(containers);
        contexts
    }

    /// Record a project-scoped operation outcome
    fn audit<T>(
        &self,
        project: &str,
        command: String,
        started: Instant,
        outcome: &Result<T>,
    ) -> Result<()> {
        let entry = match outcome {
            Ok(_) => NewAuditEntry::succeeded(project, command),
            Err(e) => NewAuditEntry::failed(project, command, e.to_string()),
        };
        self.store.append_audit(&entry.duration(started.elapsed()))?;
        Ok(())
    }

    pub async fn status(&self, project: &Path) -> Result<StatusReport> {
        let key = project.display().to_string();
        let config = ProjectConfig::load_optional(project)?;
        let state = self.store.get_state(&key)?;
        let recent_activity = self.store.recent_audit(&key, STATUS_AUDIT_LIMIT)?;

        let (engine, capabilities) = tokio::join!(
            engine_status(self.engine.as_ref(), &self.settings.engine),
            self.detector.detect()
        );
        let (containers, contexts) = if engine.running {
            tokio::join!(self.sidecars.running_containers(), self.all_contexts())
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(StatusReport {
            project: ProjectInfo {
                path: key,
                name: project_name(project),
                initialized: config.is_some(),
                runtime: config.as_ref().and_then(|c| c.runtime.clone()),
                config: config.as_ref().map(|c| c.raw.clone()),
            },
            environment: EnvironmentInfo {
                current: state.as_ref().map(|s| s.current_env),
                sidecars_running: state
                    .map(|s| s.sidecars_running.into_iter().collect())
                    .unwrap_or_default(),
            },
            engine: EngineInfo {
                status: engine,
                containers,
            },
            policy: config
                .as_ref()
                .map(|c| describe(&c.policy, capabilities.recommended)),
            capabilities,
            contexts,
            recent_activity,
        })
    }

    pub async fn switch(&self, project: &Path, env: Environment) -> Result<SwitchResult> {
        self.orchestrator.switch_to(project, env).await
    }

    pub async fn sidecars(&self, project: &Path, action: SidecarAction) -> Result<SidecarsReport> {
        let running = self.sidecars.list_running().await;
        match action {
            SidecarAction::List => Ok(SidecarsReport {
                action: "list",
                available: SIDECAR_CATALOG,
                message: format!("{} sidecar(s) running", running.len()),
                running,
            }),
            SidecarAction::Start(name) => {
                catalog::require(&name)?;
                let key = project.display().to_string();
                let started = Instant::now();
                let outcome = self.start_sidecar(&key, &name).await;
                self.audit(&key, format!("sidecar_start:{name}"), started, &outcome)?;
                outcome?;

                let mut running = running;
                if !running.contains(&name) {
                    running.push(name.clone());
                }
                Ok(SidecarsReport {
                    action: "start",
                    available: SIDECAR_CATALOG,
                    running,
                    message: format!("Started {name}"),
                })
            }
            SidecarAction::Stop(name) => {
                let key = project.display().to_string();
                let started = Instant::now();
                let outcome = self.stop_sidecar(&key, &name).await;
                self.audit(&key, format!("sidecar_stop:{name}"), started, &outcome)?;
                outcome?;

                Ok(SidecarsReport {
                    action: "stop",
                    available: SIDECAR_CATALOG,
                    running: running.into_iter().filter(|s| *s != name).collect(),
                    message: format!("Stopped {name}"),
                })
            }
        }
    }

    async fn start_sidecar(&self, key: &str, name: &str) -> Result<()> {
        require_engine(self.engine.as_ref(), &self.settings.engine).await?;
        self.sidecars.start(&[name.to_string()], None).await?;
        self.update_sidecars(key, |set| {
            set.insert(name.to_string());
        })
    }

    async fn stop_sidecar(&self, key: &str, name: &str) -> Result<()> {
        require_engine(self.engine.as_ref(), &self.settings.engine).await?;
        self.sidecars.stop(name).await?;
        self.update_sidecars(key, |set| {
            set.remove(name);
        })
    }

    /// Edit the project's running sidecar set, keeping its environment
    fn update_sidecars(&self, key: &str, edit: impl FnOnce(&mut BTreeSet<String>)) -> Result<()> {
        let (env, mut set) = match self.store.get_state(key)? {
            Some(ProjectState {
                current_env,
                sidecars_running,
                ..
            }) => (current_env, sidecars_running),
            None => (Environment::default(), BTreeSet::new()),
        };
        edit(&mut set);
        self.store.upsert_state(key, env, set)
    }

    pub async fn sandbox(&self, project: &Path, action: SandboxAction) -> Result<SandboxReport> {
        let name = context_name(&project_name(project), Environment::Test);
        match action {
            SandboxAction::Status => {
                let (capabilities, contexts) =
                    tokio::join!(self.detector.detect(), self.all_contexts());
                Ok(SandboxReport::Status {
                    capabilities,
                    contexts,
                })
            }
            SandboxAction::Create | SandboxAction::Reset => {
                let key = project.display().to_string();
                let label = if action == SandboxAction::Create {
                    "create"
                } else {
                    "reset"
                };
                let started = Instant::now();
                let outcome = self.provision(project, &name, action).await;
                self.audit(&key, format!("sandbox:{label}"), started, &outcome)?;
                let (backend, policy) = outcome?;

                let message = match action {
                    SandboxAction::Reset => {
                        format!("Sandbox {name} reset (destroyed + recreated)")
                    }
                    _ => format!("Sandbox {name} created"),
                };
                Ok(SandboxReport::Provisioned {
                    name,
                    backend,
                    policy,
                    message,
                })
            }
            SandboxAction::Remove => {
                let key = project.display().to_string();
                let started = Instant::now();
                let outcome = self.remove_everywhere(&name).await;
                self.audit(&key, "sandbox:remove".to_string(), started, &outcome)?;
                let removed = outcome?;

                let message = if removed {
                    format!("Sandbox {name} removed")
                } else {
                    format!("Sandbox {name} was not present")
                };
                Ok(SandboxReport::Removed {
                    name,
                    removed,
                    message,
                })
            }
            SandboxAction::Health => {
                let (capabilities, health) =
                    tokio::join!(self.detector.detect(), self.detector.health_check());
                Ok(SandboxReport::Health {
                    capabilities,
                    health,
                })
            }
        }
    }

    /// Create or reset the project's test context on the recommended backend.
    /// Works on uninitialized projects with the default policy.
    async fn provision(
        &self,
        project: &Path,
        name: &str,
        action: SandboxAction,
    ) -> Result<(Backend, String)> {
        let config = ProjectConfig::load_optional(project)?;
        let (policy, runtime) = match &config {
            Some(c) => (c.policy.clone(), c.runtime.as_deref()),
            None => (Default::default(), None),
        };

        let backend = self.detector.detect().await.recommended;
        let directives = to_directives(&policy, backend);
        let manager = IsolationManager::new(self.engine.clone(), backend, &self.settings)
            .with_image(self.settings.image_for(runtime));

        if action == SandboxAction::Reset {
            manager.reset(name, project, &directives).await?;
        } else {
            manager.create(name, project, &directives).await?;
        }
        Ok((backend, describe(&policy, backend)))
    }

    async fn remove_everywhere(&self, name: &str) -> Result<bool> {
        let mut removed = false;
        for manager in self.managers() {
            removed |= manager.remove(name).await?;
        }
        Ok(removed)
    }

    /// Stop every orbit compose service and clear all recorded sidecars
    pub async fn stop_all(&self, confirm: bool) -> Result<StopAllReport> {
        if !confirm {
            return Ok(StopAllReport {
                success: false,
                containers_stopped: 0,
                message: "Operation cancelled - confirm=false".to_string(),
            });
        }

        let engine = engine_status(self.engine.as_ref(), &self.settings.engine).await;
        if !engine.running {
            return Ok(StopAllReport {
                success: true,
                containers_stopped: 0,
                message: "Container engine not running - nothing to stop".to_string(),
            });
        }

        let before = self.sidecars.running_containers().await.len();
        if let Err(e) = self.sidecars.stop_all().await {
            warn!(error = %e, "compose down reported a failure");
        }
        let projects = self.store.clear_all_sidecars()?;
        info!(containers = before, projects, "all orbit services stopped");

        Ok(StopAllReport {
            success: true,
            containers_stopped: before,
            message: format!("Stopped {before} container(s)"),
        })
    }

    pub fn get_state(&self, query: StateQuery) -> Result<StateReport> {
        let report = match query {
            StateQuery::Projects => StateReport {
                query_type: "projects",
                data: serde_json::to_value(self.store.all_states()?)?,
            },
            StateQuery::Audit { project, limit } => StateReport {
                query_type: "audit",
                data: serde_json::to_value(self.store.recent_audit(&project, limit)?)?,
            },
            StateQuery::Registry => StateReport {
                query_type: "registry",
                data: read_document(&self.settings.registry_path())
                    .unwrap_or_else(|| json!({ "projects": {} })),
            },
            StateQuery::Config => StateReport {
                query_type: "config",
                data: read_document(&self.settings.global_config_path()).unwrap_or(Value::Null),
            },
        };
        Ok(report)
    }
}

/// A JSON document from the orbit root; missing or unreadable yields `None`
fn read_document(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}
