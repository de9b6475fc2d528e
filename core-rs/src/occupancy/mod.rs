//! Port occupancy probing
//!
//! The classifier and allocator only ever see the [`PortProbe`] trait, so
//! they can be driven by a deterministic stub in tests. [`SystemProbe`] is
//! the live implementation backed by bind probes, `ss`/`lsof` and
//! `docker ps`.

pub mod system;

pub use system::SystemProbe;

use serde::Serialize;

use crate::compose::Protocol;

/// OS process holding a port
///
/// `name` is absent when the pid is visible but the process table lookup
/// fails (permissions, raced exit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Running container publishing a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Point-in-time result of probing one `(port, protocol)` pair
///
/// A port may be claimed by a process and a container at the same time
/// (the container's proxy process owns the socket); both are retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OccupancyRecord {
    pub in_use: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerInfo>,
}

/// The single injected capability: is this port occupied, and by what
///
/// Implementations must be side-effect free and idempotent within a run,
/// and must tolerate partial information (a pid without a name, a missing
/// docker daemon) by omitting fields rather than failing.
pub trait PortProbe {
    fn probe(&self, port: u16, protocol: Protocol) -> OccupancyRecord;
}
