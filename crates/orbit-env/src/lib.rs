//! Orbit Env - environment switching for a single project
//!
//! - **Project** (`project`): reads `<project>/.orbit/config.json`
//! - **Sidecars** (`sidecars`): backing services, their catalog and the compose
//!   security overlay
//! - **Orchestrator** (`orchestrator`): `dev` / `test` / `staging` transitions
//! - **Service** (`service`): the operation surface used by front-ends
//!
//! The state store is opened by the caller and passed in; nothing here holds
//! a global connection.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations)]

pub mod orchestrator;
pub mod project;
pub mod service;
pub mod sidecars;

pub use orchestrator::{EnvironmentOrchestrator, SwitchResult};
pub use project::ProjectConfig;
pub use service::{
    OrbitService, SandboxAction, SandboxReport, SidecarAction, SidecarsReport, StateQuery,
    StateReport, StatusReport, StopAllReport, DEFAULT_AUDIT_LIMIT,
};
pub use sidecars::{SidecarReconciler, SIDECAR_CATALOG};
