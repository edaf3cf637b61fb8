//! Orbit Core - shared foundation for per-project environment orchestration
//!
//! Orbit moves a project between `dev`, `test` and `staging` by provisioning
//! isolated execution contexts and sidecar services through an external
//! container engine. This crate holds what every layer agrees on:
//!
//! - **Types** (`types`): `Environment` and the isolation `Backend`
//! - **Errors** (`error`): the `OrbitError` taxonomy
//! - **Engine** (`engine`): the single seam through which external commands run
//! - **Settings** (`settings`): global tunables from `~/.orbit/orbit.toml`
//! - **Storage** (`storage`): project state and audit trail in SQLite

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod engine;
pub mod error;
pub mod settings;
pub mod storage;
pub mod types;

pub use engine::{CommandOutput, Engine, EngineStatus, Invocation, ProcessEngine};
pub use error::{OrbitError, Result};
pub use settings::OrbitSettings;
pub use storage::StateStore;
pub use types::{Backend, Environment};

/// Orbit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name prefix marking every context and container Orbit owns
pub const OWNERSHIP_PREFIX: &str = "orbit-";
