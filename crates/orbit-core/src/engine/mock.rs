//! Scripted engine double for tests
//!
//! A closure decides the outcome of each invocation; every invocation is
//! recorded so tests can assert on exactly what would have been executed.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandOutput, Engine, Invocation};
use crate::error::{OrbitError, Result};

type Handler = dyn Fn(&Invocation) -> Result<CommandOutput> + Send + Sync;

pub struct ScriptedEngine {
    handler: Box<Handler>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedEngine {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Engine where every invocation succeeds with empty output
    pub fn permissive() -> Self {
        Self::new(|_| Ok(CommandOutput::default()))
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Number of recorded invocations whose arguments start with `prefix`
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|inv| inv.starts_with(prefix))
            .count()
    }

    pub fn find(&self, prefix: &[&str]) -> Option<Invocation> {
        self.calls
            .lock()
            .iter()
            .find(|inv| inv.starts_with(prefix))
            .cloned()
    }
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.calls.lock().push(invocation.clone());
        (self.handler)(&invocation)
    }
}

/// Successful output with the given stdout
pub fn ok(stdout: impl Into<String>) -> Result<CommandOutput> {
    Ok(CommandOutput::stdout(stdout))
}

/// Non-zero exit with the given stderr
pub fn fail(stderr: impl Into<String>) -> Result<CommandOutput> {
    Err(OrbitError::CommandFailed {
        command: "scripted".to_string(),
        code: Some(1),
        stderr: stderr.into(),
    })
}
