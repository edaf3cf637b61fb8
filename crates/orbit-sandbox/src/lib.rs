//! Orbit Sandbox - isolated execution contexts
//!
//! Decides which isolation backend the host supports, translates a project's
//! declarative isolation policy into engine flags, and drives named contexts
//! through create / exec / stop / remove.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations)]

pub mod detector;
pub mod lifecycle;
pub mod policy;

pub use detector::{CapabilityDetector, HealthReport, IsolationCapabilities};
pub use lifecycle::{
    context_name, project_name, supports, ContextStatus, ExecOptions, ExecOutput, IsolatedContext,
    IsolationManager,
};
pub use policy::{Directive, IsolationPolicy, NetworkMode, NetworkPolicy};
