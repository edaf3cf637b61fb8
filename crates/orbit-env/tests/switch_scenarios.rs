//! Environment switch scenarios against a scripted engine

use orbit_core::engine::mock::{fail, ok, ScriptedEngine};
use orbit_core::{Backend, Environment, OrbitError, OrbitSettings, StateStore};
use orbit_env::EnvironmentOrchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    project: PathBuf,
    settings: OrbitSettings,
    store: Arc<StateStore>,
}

impl Fixture {
    fn new(config: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("shop");
        std::fs::create_dir_all(&project).unwrap();
        if let Some(config) = config {
            std::fs::create_dir_all(project.join(".orbit")).unwrap();
            std::fs::write(project.join(".orbit/config.json"), config).unwrap();
        }
        let settings = OrbitSettings::new().with_root(dir.path().join("orbit-root"));
        Self {
            project,
            settings,
            store: Arc::new(StateStore::open_in_memory().unwrap()),
            _dir: dir,
        }
    }

    fn orchestrator(&self, engine: &Arc<ScriptedEngine>) -> EnvironmentOrchestrator {
        EnvironmentOrchestrator::new(engine.clone(), self.store.clone(), self.settings.clone())
    }

    fn key(&self) -> String {
        self.project.display().to_string()
    }
}

/// Host with a working engine and a hardware sandbox runtime
fn sandbox_host() -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(|inv| {
        if inv.program == "git" {
            ok("3f9c2ab\n")
        } else if inv.starts_with(&["version"]) {
            ok("Docker Desktop 4.40.0")
        } else {
            ok("")
        }
    }))
}

/// Host with a working engine but no sandbox support
fn container_host() -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(|inv| {
        if inv.starts_with(&["sandbox"]) || inv.program == "git" {
            fail("unknown command")
        } else {
            ok("")
        }
    }))
}

fn compose_files(engine: &ScriptedEngine) -> Vec<Vec<String>> {
    engine
        .calls()
        .into_iter()
        .filter(|inv| inv.starts_with(&["compose"]) && inv.has_arg("up"))
        .map(|inv| {
            inv.args
                .windows(2)
                .filter(|pair| pair[0] == "-f")
                .map(|pair| pair[1].clone())
                .collect()
        })
        .collect()
}

const WITH_SIDECARS: &str = r#"{"type": "node", "sidecars": ["postgres", "redis"]}"#;

#[tokio::test]
async fn test_staging_forces_container_backend() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = sandbox_host();

    let result = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Staging)
        .await
        .unwrap();

    assert_eq!(result.backend, Some(Backend::Container));
    assert_eq!(result.context.as_deref(), Some("orbit-shop-staging"));
    assert_eq!(engine.count(&["sandbox", "--help"]), 0);
    assert_eq!(engine.count(&["sandbox", "create"]), 0);
    assert_eq!(engine.count(&["run", "-d"]), 1);

    let run = engine.find(&["run", "-d"]).unwrap();
    assert!(run.has_arg("node:20-bookworm-slim"));
    assert!(run.has_arg("--read-only"));
    assert!(result.directives.contains(&"--cap-drop=ALL".to_string()));
}

#[tokio::test]
async fn test_switch_test_on_sandbox_host_uses_sandbox_without_hardening() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = sandbox_host();

    let result = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap();

    assert_eq!(result.backend, Some(Backend::Sandbox));
    assert_eq!(result.context.as_deref(), Some("orbit-shop-test"));
    assert_eq!(result.directives, vec!["--network=none"]);
    assert_eq!(result.sidecars_started, vec!["postgres", "redis"]);
    assert_eq!(
        result.policy.as_deref(),
        Some("Network: deny-all (no outbound) | Isolation: microVM (hypervisor)")
    );

    let create = engine.find(&["sandbox", "create"]).unwrap();
    assert!(!create.has_arg("--read-only"));
    // No overlay for the sandbox backend: a single compose file per start.
    assert!(compose_files(&engine).iter().all(|files| files.len() == 1));

    let state = fx.store.get_state(&fx.key()).unwrap().unwrap();
    assert_eq!(state.current_env, Environment::Test);
    assert_eq!(state.sidecars_running.len(), 2);

    let audit = fx.store.recent_audit(&fx.key(), 10).unwrap();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].success);
    assert_eq!(audit[0].command, "switch_env:test");
    assert_eq!(audit[0].git_commit.as_deref(), Some("3f9c2ab"));
}

#[tokio::test]
async fn test_switch_test_on_container_host_applies_security_overlay() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = container_host();

    let result = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap();
    assert_eq!(result.backend, Some(Backend::Container));

    let overlay = fx.settings.overlay_dir().join("orbit-shop-test.json");
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&overlay).unwrap()).unwrap();
    assert_eq!(doc["services"]["sidecar-redis"]["read_only"], true);

    let files = compose_files(&engine);
    assert_eq!(files.len(), 2);
    for files in files {
        assert_eq!(files.len(), 2);
        assert_eq!(Path::new(&files[1]), overlay);
    }

    let audit = fx.store.recent_audit(&fx.key(), 10).unwrap();
    assert_eq!(audit[0].git_commit, None);
}

#[tokio::test]
async fn test_switch_test_on_container_host_skips_host_rules() {
    let fx = Fixture::new(Some(
        r#"{"type": "node", "sandbox": {"network": {"mode": "allow", "allow": ["a.com", "b.com"]}}}"#,
    ));
    let engine = container_host();

    let result = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap();

    assert_eq!(result.backend, Some(Backend::Container));
    assert_eq!(
        result.skipped_directives,
        vec!["--network-allow=a.com", "--network-allow=b.com"]
    );
    assert_eq!(
        result.directives,
        vec![
            "--read-only",
            "--cap-drop=ALL",
            "--security-opt=no-new-privileges:true"
        ]
    );

    let run = engine.find(&["run", "-d"]).unwrap();
    assert!(run.args.iter().all(|arg| !arg.starts_with("--network-")));
}

#[tokio::test]
async fn test_dev_succeeds_when_engine_unreachable() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = Arc::new(ScriptedEngine::new(|inv| {
        Err(OrbitError::EngineNotInstalled(inv.program.clone()))
    }));

    let result = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Dev)
        .await
        .unwrap();

    assert_eq!(result.current_env, Environment::Dev);
    assert!(result.sidecars_started.is_empty());
    assert_eq!(result.backend, None);
    assert_eq!(result.message, "Switched to dev environment");

    let state = fx.store.get_state(&fx.key()).unwrap().unwrap();
    assert_eq!(state.current_env, Environment::Dev);
    assert!(state.sidecars_running.is_empty());
}

#[tokio::test]
async fn test_dev_tears_down_previous_environment() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = sandbox_host();
    let orchestrator = fx.orchestrator(&engine);

    orchestrator
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap();
    let result = orchestrator
        .switch_to(&fx.project, Environment::Dev)
        .await
        .unwrap();

    assert_eq!(result.previous_env, Some(Environment::Test));
    assert!(engine
        .calls()
        .iter()
        .any(|inv| inv.starts_with(&["sandbox", "rm"]) && inv.has_arg("orbit-shop-test")));
    assert!(engine
        .calls()
        .iter()
        .any(|inv| inv.starts_with(&["compose"]) && inv.has_arg("down")));

    let state = fx.store.get_state(&fx.key()).unwrap().unwrap();
    assert!(state.sidecars_running.is_empty());
    assert_eq!(fx.store.recent_audit(&fx.key(), 10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_switch_test_requires_running_engine_and_audits_failure() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = Arc::new(ScriptedEngine::new(|inv| {
        if inv.starts_with(&["info"]) {
            fail("Cannot connect to the Docker daemon")
        } else {
            ok("")
        }
    }));

    let err = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::EngineNotRunning));
    assert_eq!(engine.count(&["sandbox", "create"]), 0);

    assert!(fx.store.get_state(&fx.key()).unwrap().is_none());
    let audit = fx.store.recent_audit(&fx.key(), 10).unwrap();
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].success);
    assert_eq!(audit[0].environment, Some(Environment::Test));
    assert!(audit[0].error_message.as_deref().unwrap().contains("not running"));
}

#[tokio::test]
async fn test_sidecar_start_failure_leaves_state_untouched() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let engine = Arc::new(ScriptedEngine::new(|inv| {
        if inv.has_arg("sidecar-redis") {
            fail("port 6379 already allocated")
        } else {
            ok("")
        }
    }));
    let orchestrator = fx.orchestrator(&engine);
    orchestrator
        .switch_to(&fx.project, Environment::Dev)
        .await
        .unwrap();

    let err = orchestrator
        .switch_to(&fx.project, Environment::Staging)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already allocated"));

    let state = fx.store.get_state(&fx.key()).unwrap().unwrap();
    assert_eq!(state.current_env, Environment::Dev);
    let audit = fx.store.recent_audit(&fx.key(), 10).unwrap();
    assert_eq!(audit.len(), 2);
    assert!(!audit[0].success);
    assert_eq!(audit[0].command, "switch_env:staging");
}

#[tokio::test]
async fn test_unknown_sidecar_fails_before_touching_engine() {
    let fx = Fixture::new(Some(r#"{"sidecars": ["oracle"]}"#));
    let engine = sandbox_host();

    let err = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::UnknownSidecar { .. }));
    assert_eq!(engine.count(&["info"]), 0);
}

#[tokio::test]
async fn test_uninitialized_project_is_not_audited() {
    let fx = Fixture::new(None);
    let engine = sandbox_host();

    let err = fx
        .orchestrator(&engine)
        .switch_to(&fx.project, Environment::Test)
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::ProjectNotInitialized(_)));
    assert!(engine.calls().is_empty());
    assert!(fx.store.recent_audit(&fx.key(), 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_prod_is_not_a_switch_target() {
    let fx = Fixture::new(Some(WITH_SIDECARS));
    let err = fx
        .orchestrator(&sandbox_host())
        .switch_to(&fx.project, Environment::Prod)
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::UnsupportedTarget(_)));
}
