//! Conflict classification
//!
//! Joins extracted bindings with occupancy records into the port
//! inventory. The probe is queried once per distinct `(host_port,
//! protocol)` pair; bindings sharing a pair share the record and are
//! flagged as declared duplicates regardless of live occupancy, because
//! bringing both services up would race for the bind.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::compose::{PortBinding, Protocol, ServiceSpec};
use crate::occupancy::{OccupancyRecord, PortProbe};

/// One classified binding
#[derive(Debug, Clone)]
pub struct PortInventoryEntry {
    pub binding: PortBinding,
    pub occupancy: OccupancyRecord,

    /// Derived: `!occupancy.in_use`
    pub available: bool,

    /// Another binding in the same document claims the same
    /// `(host_port, protocol)` pair
    pub declared_duplicate: bool,
}

/// Aggregated counters, always derived, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    pub total_services: usize,
    pub total_ports: usize,
    pub ports_in_use: usize,
}

/// Classify every binding against the probe, preserving document order
pub fn classify(specs: &[ServiceSpec], probe: &dyn PortProbe) -> Vec<PortInventoryEntry> {
    let bindings: Vec<&PortBinding> = specs.iter().flat_map(|s| s.bindings.iter()).collect();

    // Count declared claims per (port, protocol) to flag duplicates
    let mut declared: HashMap<(u16, Protocol), usize> = HashMap::new();
    for binding in &bindings {
        *declared
            .entry((binding.host_port, binding.protocol))
            .or_insert(0) += 1;
    }

    // One probe per distinct pair
    let mut records: HashMap<(u16, Protocol), OccupancyRecord> = HashMap::new();
    let mut entries = Vec::with_capacity(bindings.len());

    for binding in bindings {
        let key = (binding.host_port, binding.protocol);
        let occupancy = records
            .entry(key)
            .or_insert_with(|| probe.probe(key.0, key.1))
            .clone();

        entries.push(PortInventoryEntry {
            available: !occupancy.in_use,
            declared_duplicate: declared[&key] > 1,
            binding: binding.clone(),
            occupancy,
        });
    }

    debug!(
        ports = entries.len(),
        in_use = entries.iter().filter(|e| !e.available).count(),
        "classified inventory"
    );
    entries
}

/// Summary counters for the report header
pub fn summarize(specs: &[ServiceSpec], entries: &[PortInventoryEntry]) -> InventorySummary {
    InventorySummary {
        total_services: specs.len(),
        total_ports: entries.len(),
        ports_in_use: entries.iter().filter(|e| !e.available).count(),
    }
}

/// Any binding occupied or double-declared
pub fn has_conflicts(entries: &[PortInventoryEntry]) -> bool {
    entries.iter().any(|e| !e.available || e.declared_duplicate)
}
