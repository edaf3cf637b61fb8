//! External container/sandbox engine boundary
//!
//! Every lifecycle, sidecar and probe operation ends up as exactly one
//! command-line invocation of the engine. The [`Engine`] trait is the only
//! seam through which that happens, so orchestration logic can be exercised
//! against a scripted double and the real process runner stays trivial.
//!
//! Contract of [`Engine::run`]:
//! - `Ok` only when the process exits with status 0
//! - non-zero exit maps to [`OrbitError::CommandFailed`]
//! - exceeding the invocation timeout maps to [`OrbitError::CommandTimeout`]
//! - a missing engine binary maps to [`OrbitError::EngineNotInstalled`]

mod process;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use process::ProcessEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OrbitError, Result};

/// Timeout for quick read-only probes (`--version`, `info`, `ls`)
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Field separator used in every `--format` template we hand to the engine
pub const FIELD_SEPARATOR: char = '|';

/// A single engine command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: PROBE_TIMEOUT,
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Whether the argument list begins with `prefix`
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Human-readable command line for logs and error messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: Some(0),
        }
    }
}

/// Executes engine invocations
#[async_trait]
pub trait Engine: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput>;
}

/// Reachability of the container engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub installed: bool,
    pub running: bool,
    pub version: Option<String>,
}

/// Probe whether the engine binary exists and its daemon answers.
///
/// Never fails: every probe error degrades to `false`.
pub async fn engine_status(engine: &dyn Engine, program: &str) -> EngineStatus {
    let version = match engine.run(Invocation::new(program).arg("--version")).await {
        Ok(out) => out.stdout.trim().to_string(),
        Err(_) => return EngineStatus::default(),
    };

    let running = engine
        .run(Invocation::new(program).arg("info"))
        .await
        .is_ok();

    EngineStatus {
        installed: true,
        running,
        version: Some(version),
    }
}

/// Fail with the matching engine-unavailability error unless the daemon answers.
pub async fn require_engine(engine: &dyn Engine, program: &str) -> Result<EngineStatus> {
    let status = engine_status(engine, program).await;
    if !status.installed {
        return Err(OrbitError::EngineNotInstalled(program.to_string()));
    }
    if !status.running {
        return Err(OrbitError::EngineNotRunning);
    }
    Ok(status)
}

/// Split delimiter-separated tabular engine output into rows of fields.
/// Blank lines are skipped.
pub fn split_rows(stdout: &str) -> Vec<Vec<&str>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(FIELD_SEPARATOR).map(str::trim).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::mock::{fail, ScriptedEngine};
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("docker")
            .args(["sandbox", "create"])
            .arg("--mount")
            .arg("type=bind,source=/my project,target=/workspace")
            .timeout(Duration::from_secs(5));

        assert!(inv.starts_with(&["sandbox", "create"]));
        assert!(!inv.starts_with(&["sandbox", "rm"]));
        assert!(inv.has_arg("--mount"));
        assert_eq!(inv.timeout, Duration::from_secs(5));
        assert!(inv.command_line().contains("\"type=bind,source=/my project,target=/workspace\""));
    }

    #[test]
    fn test_split_rows() {
        let rows = split_rows("orbit-api-test|running|2024-01-01\n\n  orbit-web-test | stopped \n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["orbit-api-test", "running", "2024-01-01"]);
        assert_eq!(rows[1], vec!["orbit-web-test", "stopped"]);
    }

    #[test]
    fn test_engine_status_not_installed() {
        let engine = ScriptedEngine::new(|_| {
            Err(OrbitError::EngineNotInstalled("docker".to_string()))
        });
        let status = tokio_test::block_on(engine_status(&engine, "docker"));
        assert!(!status.installed);
        assert!(!status.running);

        let err = tokio_test::block_on(require_engine(&engine, "docker")).unwrap_err();
        assert!(matches!(err, OrbitError::EngineNotInstalled(_)));
    }

    #[test]
    fn test_engine_status_daemon_down() {
        let engine = ScriptedEngine::new(|inv| {
            if inv.has_arg("--version") {
                Ok(CommandOutput::stdout("Docker version 25.0.3, build 4debf41\n"))
            } else {
                fail("Cannot connect to the Docker daemon")
            }
        });
        let status = tokio_test::block_on(engine_status(&engine, "docker"));
        assert!(status.installed);
        assert!(!status.running);
        assert_eq!(status.version.as_deref(), Some("Docker version 25.0.3, build 4debf41"));

        let err = tokio_test::block_on(require_engine(&engine, "docker")).unwrap_err();
        assert!(matches!(err, OrbitError::EngineNotRunning));
    }
}
