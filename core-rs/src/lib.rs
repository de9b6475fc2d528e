//! # DCP Core - docker-compose port inventory
//!
//! Inspects a docker-compose file and its `.env` file, enumerates the
//! host ports each service publishes, cross-references them against live
//! system and container occupancy, and optionally rewrites the backing
//! files to move conflicting ports onto free ones.
//!
//! ## Pipeline
//!
//! ```text
//! compose + .env ──> extractor ──> classifier ──> allocator ──> rewrite
//!                      (resolve        (probe        (on           (backup,
//!                       ${VARS})        ports)        conflicts)    write)
//! ```
//!
//! Occupancy probing sits behind the single-method [`PortProbe`] trait so
//! the classifier and allocator run against a deterministic stub in tests
//! and against [`SystemProbe`] in production.

pub mod compose;
pub mod envfile;
pub mod errors;
pub mod inventory;
pub mod occupancy;
pub mod port;
pub mod report;
pub mod rewrite;

pub use compose::{extract, referenced_variables, ComposeFile, PortBinding, Protocol, ServiceSpec};
pub use envfile::EnvironmentMap;
pub use errors::DcpError;
pub use inventory::{classify, has_conflicts, summarize, InventorySummary, PortInventoryEntry};
pub use occupancy::{ContainerInfo, OccupancyRecord, PortProbe, ProcessInfo, SystemProbe};
pub use port::{allocate, PortRange};
pub use report::{exit_code, EnvironmentInfo, ExitPolicy, EXIT_HARD_ERROR, EXIT_OK, EXIT_PORTS_IN_USE};
pub use rewrite::{
    build_plan, commit, render, AllocationFailure, FileWriteReport, PlanEntry, PromptReply,
    Prompter, RenderedFiles, ResolutionPlan,
};

/// Crate version
pub const VERSION: &str = "1.0.0";

/// Default compose file name
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// Default environment file name for auto-detection
pub const DEFAULT_ENV_FILE: &str = ".env";
