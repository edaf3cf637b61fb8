//! Environment Switch Orchestrator
//!
//! Moves a project into a target environment:
//!
//! ```text
//! dev      teardown test/staging contexts + all sidecars (best effort)
//! test     engine required -> detect backend -> translate policy
//!          -> create/reuse context -> start sidecars
//! staging  same as test, backend forced to container
//! ```
//!
//! Every attempt that gets past the project configuration check is audited.
//! A successful transition commits state and audit in one transaction; a
//! failed one appends a failed audit entry and leaves state untouched.

use orbit_core::engine::{require_engine, Engine, Invocation};
use orbit_core::storage::NewAuditEntry;
use orbit_core::{Backend, Environment, OrbitError, OrbitSettings, Result, StateStore};
use orbit_sandbox::policy::{describe, to_directives};
use orbit_sandbox::{
    context_name, project_name, supports, CapabilityDetector, Directive, IsolationManager,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::project::ProjectConfig;
use crate::sidecars::{catalog, SecurityOverlay, SidecarReconciler};

/// Outcome of a successful environment switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub project: String,
    pub previous_env: Option<Environment>,
    pub current_env: Environment,
    /// Isolation backend in effect, `None` for dev
    pub backend: Option<Backend>,
    /// Isolated context bound to the workspace, `None` for dev
    pub context: Option<String>,
    /// Enforcement flags applied to the context
    pub directives: Vec<String>,
    /// Policy directives the backend cannot express
    pub skipped_directives: Vec<String>,
    pub policy: Option<String>,
    pub sidecars_started: Vec<String>,
    pub duration_ms: u64,
    pub message: String,
}

/// What a branch of the switch actually did
#[derive(Debug, Default)]
struct Transition {
    backend: Option<Backend>,
    context: Option<String>,
    directives: Vec<Directive>,
    sidecars: Vec<String>,
}

pub struct EnvironmentOrchestrator {
    engine: Arc<dyn Engine>,
    store: Arc<StateStore>,
    settings: OrbitSettings,
    detector: CapabilityDetector,
    sidecars: SidecarReconciler,
}

impl std::fmt::Debug for EnvironmentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentOrchestrator")
            .field("engine", &self.settings.engine)
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

impl EnvironmentOrchestrator {
    pub fn new(engine: Arc<dyn Engine>, store: Arc<StateStore>, settings: OrbitSettings) -> Self {
        Self {
            detector: CapabilityDetector::new(engine.clone(), &settings),
            sidecars: SidecarReconciler::new(engine.clone(), &settings),
            engine,
            store,
            settings,
        }
    }

    /// Move `project` into `target`.
    ///
    /// Fails without auditing if the target cannot be switched to or the
    /// project has no configuration.
    pub async fn switch_to(&self, project: &Path, target: Environment) -> Result<SwitchResult> {
        if target == Environment::Prod {
            return Err(OrbitError::UnsupportedTarget(target.to_string()));
        }
        let config = ProjectConfig::load(project)?;

        let start = Instant::now();
        let key = project.display().to_string();
        let name = project_name(project);
        let previous_env = self.store.get_state(&key)?.map(|s| s.current_env);
        let label = format!("switch_env:{target}");

        info!(project = %key, from = ?previous_env, to = %target, "switching environment");

        let outcome = match target {
            Environment::Dev => Ok(self.enter_dev(&name).await),
            Environment::Staging => {
                self.enter_isolated(project, &name, &config, target, Some(Backend::Container))
                    .await
            }
            _ => self.enter_isolated(project, &name, &config, target, None).await,
        };
        let elapsed = start.elapsed();
        let revision = self.source_revision(project).await;

        let transition = match outcome {
            Ok(transition) => transition,
            Err(e) => {
                warn!(project = %key, to = %target, error = %e, "environment switch failed");
                let mut audit = NewAuditEntry::failed(&key, &label, e.to_string())
                    .environment(target)
                    .duration(elapsed);
                if let Some(rev) = revision {
                    audit = audit.git_commit(rev);
                }
                self.store.append_audit(&audit)?;
                return Err(e);
            }
        };

        let mut audit = NewAuditEntry::succeeded(&key, &label)
            .environment(target)
            .duration(elapsed);
        if let Some(rev) = revision {
            audit = audit.git_commit(rev);
        }
        let running: BTreeSet<String> = transition.sidecars.iter().cloned().collect();
        let (applied, skipped): (Vec<&Directive>, Vec<&Directive>) = match transition.backend {
            Some(backend) => transition
                .directives
                .iter()
                .partition(|d| supports(backend, d)),
            None => (Vec::new(), Vec::new()),
        };
        self.store.commit_transition(&key, target, &running, &audit)?;

        info!(
            project = %key,
            env = %target,
            sidecars = running.len(),
            elapsed_ms = duration_ms(elapsed),
            "environment switched"
        );

        Ok(SwitchResult {
            project: key,
            previous_env,
            current_env: target,
            backend: transition.backend,
            context: transition.context,
            directives: applied.into_iter().map(Directive::flag).collect(),
            skipped_directives: skipped.into_iter().map(Directive::flag).collect(),
            policy: transition.backend.map(|b| describe(&config.policy, b)),
            sidecars_started: transition.sidecars,
            duration_ms: duration_ms(elapsed),
            message: format!("Switched to {target} environment"),
        })
    }

    /// Best-effort teardown; dev must be reachable even without an engine.
    async fn enter_dev(&self, name: &str) -> Transition {
        for env in [Environment::Test, Environment::Staging] {
            let context = context_name(name, env);
            for backend in [Backend::Sandbox, Backend::Container] {
                let manager = IsolationManager::new(self.engine.clone(), backend, &self.settings);
                if let Err(e) = manager.remove(&context).await {
                    debug!(context = %context, backend = %backend, error = %e, "teardown skipped");
                }
            }
        }
        if let Err(e) = self.sidecars.stop_all().await {
            warn!(error = %e, "sidecar teardown skipped");
        }
        Transition::default()
    }

    async fn enter_isolated(
        &self,
        project: &Path,
        name: &str,
        config: &ProjectConfig,
        target: Environment,
        forced: Option<Backend>,
    ) -> Result<Transition> {
        for sidecar in &config.sidecars {
            catalog::require(sidecar)?;
        }
        require_engine(self.engine.as_ref(), &self.settings.engine).await?;

        let backend = match forced {
            Some(backend) => backend,
            None => {
                let caps = self.detector.detect().await;
                debug!(reason = %caps.reason, "backend recommended");
                caps.recommended
            }
        };
        let directives = to_directives(&config.policy, backend);

        let manager = IsolationManager::new(self.engine.clone(), backend, &self.settings)
            .with_image(self.settings.image_for(config.runtime.as_deref()));
        let context = manager
            .create(&context_name(name, target), project, &directives)
            .await?;

        let overlay = match backend {
            Backend::Container if !config.sidecars.is_empty() => Some(
                SecurityOverlay::new(&config.sidecars, &directives, &self.settings.limits)
                    .write(&self.settings.overlay_dir(), &context)?,
            ),
            _ => None,
        };
        let sidecars = self.sidecars.start(&config.sidecars, overlay.as_deref()).await?;

        Ok(Transition {
            backend: Some(backend),
            context: Some(context),
            directives,
            sidecars,
        })
    }

    /// Short revision of the project checkout, if it is a git repository
    async fn source_revision(&self, project: &Path) -> Option<String> {
        let invocation = Invocation::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .current_dir(project);
        let output = self.engine.run(invocation).await.ok()?;
        let rev = output.stdout.trim();
        (!rev.is_empty()).then(|| rev.to_string())
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
