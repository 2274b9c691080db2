//! Grafter core library: dependency-aware integration of loose TypeScript
//! files into an existing project.
//!
//! Candidates are analyzed in parallel, ordered by their dependencies on one
//! another, then created or merged into their target location one at a time,
//! each step verified with the project's own build check and recorded in a
//! resumable ledger.

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod files;
pub mod graph;
pub mod models;
pub mod orchestrator;
pub mod state;
pub mod verify;

pub use config::Config;
pub use errors::{GraftError, GraftResult};
pub use orchestrator::{Orchestrator, Plan, RollbackReport, SessionReport};
pub use verify::{BuildResult, BuildVerifier, CommandVerifier};
