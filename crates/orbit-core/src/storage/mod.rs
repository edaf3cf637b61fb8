//! Persistent Storage Layer: SQLite WAL
//!
//! Durable project state and the append-only audit trail.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               StateStore                │
//! ├─────────────────────────────────────────┤
//! │  project_state      │  audit_log        │
//! │  (upsert per path)  │  (append-only)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The store is opened once by the process entry point and handed to the
//! orchestrator explicitly; there is no global connection.

pub mod state_store;

pub use state_store::{AuditLogEntry, NewAuditEntry, ProjectState, StateStore};
