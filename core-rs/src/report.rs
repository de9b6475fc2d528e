//! Report rendering
//!
//! Both renderings are pure views over the same classified inventory:
//! a serde JSON document for machine consumers and a plain-text layout
//! for terminals. Nothing here re-queries the system.

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use crate::compose::{Protocol, ServiceSpec};
use crate::errors::Result;
use crate::inventory::{summarize, InventorySummary, PortInventoryEntry};
use crate::occupancy::{ContainerInfo, ProcessInfo};
use crate::rewrite::{FileWriteReport, ResolutionPlan};

/// Process exit codes
pub const EXIT_OK: i32 = 0;
pub const EXIT_PORTS_IN_USE: i32 = 1;
pub const EXIT_HARD_ERROR: i32 = 2;

/// How occupied ports map to the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Occupied ports fail the run
    Default,
    /// Report only, always exit 0
    WarnOnly,
    /// Same as Default; kept distinct for the explicit CLI flag
    ExitOnUsed,
}

/// Exit code for a finished, error-free run
pub fn exit_code(summary: &InventorySummary, policy: ExitPolicy) -> i32 {
    if summary.ports_in_use > 0 && policy != ExitPolicy::WarnOnly {
        EXIT_PORTS_IN_USE
    } else {
        EXIT_OK
    }
}

/// Environment-file context shown alongside the inventory
#[derive(Debug, Clone, Default)]
pub struct EnvironmentInfo {
    pub env_file_path: Option<PathBuf>,
    pub detected: Vec<String>,
    pub loaded: usize,
}

impl EnvironmentInfo {
    pub fn uses_env_vars(&self) -> bool {
        !self.detected.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct PortJson {
    host_port: u16,
    container_port: Option<u16>,
    protocol: Protocol,
    available: bool,
    declared_duplicate: bool,
    env_var: Option<String>,
    process: Option<ProcessInfo>,
    docker_container: Option<ContainerInfo>,
}

#[derive(Debug, Serialize)]
struct ServiceJson {
    name: String,
    image: Option<String>,
    ports: Vec<PortJson>,
}

#[derive(Debug, Serialize)]
struct EnvironmentJson {
    uses_env_vars: bool,
    env_file_path: Option<String>,
    env_vars_detected: Vec<String>,
    env_vars_loaded: usize,
}

#[derive(Debug, Serialize)]
struct JsonReport {
    summary: InventorySummary,
    services: Vec<ServiceJson>,
    environment: EnvironmentJson,
}

/// Group flattened entries back under their services, in document order
fn group<'a>(
    specs: &'a [ServiceSpec],
    entries: &'a [PortInventoryEntry],
) -> Vec<(&'a ServiceSpec, &'a [PortInventoryEntry])> {
    let mut grouped = Vec::with_capacity(specs.len());
    let mut offset = 0;
    for spec in specs {
        let count = spec.bindings.len();
        grouped.push((spec, &entries[offset..offset + count]));
        offset += count;
    }
    grouped
}

/// Render the inventory as a JSON document
pub fn render_json(
    specs: &[ServiceSpec],
    entries: &[PortInventoryEntry],
    env_info: &EnvironmentInfo,
) -> Result<String> {
    let services = group(specs, entries)
        .into_iter()
        .map(|(spec, entries)| ServiceJson {
            name: spec.name.clone(),
            image: spec.image.clone(),
            ports: entries
                .iter()
                .map(|e| PortJson {
                    host_port: e.binding.host_port,
                    container_port: e.binding.container_port,
                    protocol: e.binding.protocol,
                    available: e.available,
                    declared_duplicate: e.declared_duplicate,
                    env_var: e.binding.source_variable.clone(),
                    process: e.occupancy.process.clone(),
                    docker_container: e.occupancy.container.clone(),
                })
                .collect(),
        })
        .collect();

    let report = JsonReport {
        summary: summarize(specs, entries),
        services,
        environment: EnvironmentJson {
            uses_env_vars: env_info.uses_env_vars(),
            env_file_path: env_info
                .env_file_path
                .as_ref()
                .map(|p| p.display().to_string()),
            env_vars_detected: env_info.detected.clone(),
            env_vars_loaded: env_info.loaded,
        },
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

/// Display form of one binding, `8080:80/tcp` or `8080/tcp`
fn port_display(entry: &PortInventoryEntry) -> String {
    let b = &entry.binding;
    match b.container_port {
        Some(container) if container != b.host_port => {
            format!("{}:{}/{}", b.host_port, container, b.protocol)
        }
        _ => format!("{}/{}", b.host_port, b.protocol),
    }
}

/// Render the inventory for a terminal
pub fn render_human(
    specs: &[ServiceSpec],
    entries: &[PortInventoryEntry],
    env_info: &EnvironmentInfo,
) -> String {
    let mut out = Vec::new();

    out.push("Docker Compose Port Analysis".to_string());
    out.push("=".repeat(50));
    out.push(String::new());

    if let Some(path) = &env_info.env_file_path {
        out.push(format!("Environment file: {}", path.display()));
    }
    if env_info.uses_env_vars() {
        out.push(format!(
            "Variables referenced by ports: {}",
            env_info.detected.join(", ")
        ));
    }
    if env_info.env_file_path.is_some() || env_info.uses_env_vars() {
        out.push(String::new());
    }

    if specs.is_empty() {
        out.push("No services found in compose file".to_string());
        return out.join("\n");
    }

    let summary = summarize(specs, entries);
    out.push(format!(
        "Summary: {} service(s), {} port(s) configured",
        summary.total_services, summary.total_ports
    ));
    if summary.ports_in_use == 0 {
        out.push(format!("{}", "All ports are available".green()));
    } else {
        out.push(format!(
            "{}",
            format!("{} port(s) in use", summary.ports_in_use).red()
        ));
    }
    out.push(String::new());

    for (spec, entries) in group(specs, entries) {
        let image = spec.image.as_deref().unwrap_or("N/A");
        out.push(format!("Service: {} ({})", spec.name, image));

        if entries.is_empty() {
            out.push("  no ports configured".to_string());
            out.push(String::new());
            continue;
        }

        for entry in entries {
            let mut line = format!("  {}", port_display(entry));
            if let Some(var) = &entry.binding.source_variable {
                line.push_str(&format!(" (${{{}}})", var));
            }
            line.push_str(" - ");
            if entry.available {
                line.push_str(&format!("{}", "available".green()));
            } else {
                line.push_str(&format!("{}", "IN USE".red()));
            }
            if entry.declared_duplicate {
                line.push_str(&format!(" [{}]", "duplicate declaration".yellow()));
            }
            out.push(line);

            if let Some(process) = &entry.occupancy.process {
                let name = process.name.as_deref().unwrap_or("unknown");
                out.push(format!("      process: {} (pid {})", name, process.pid));
            }
            if let Some(container) = &entry.occupancy.container {
                out.push(format!(
                    "      container: {} ({})",
                    container.name, container.image
                ));
            }
        }
        out.push(String::new());
    }

    out.join("\n")
}

/// Render the outcome of a fix run
pub fn render_changes(plan: &ResolutionPlan, write_reports: &[FileWriteReport]) -> String {
    if plan.is_empty() {
        return "No changes needed - all ports were available".to_string();
    }

    let mut out = Vec::new();
    out.push("Port Conflict Resolution".to_string());
    out.push("=".repeat(50));
    out.push(String::new());

    if !plan.entries.is_empty() {
        out.push(format!("Reassigned {} port(s):", plan.entries.len()));
        for entry in &plan.entries {
            let mut line = format!(
                "  {}: {} -> {}/{}",
                entry.service, entry.old_port, entry.new_port, entry.protocol
            );
            if let Some(var) = &entry.source_variable {
                line.push_str(&format!(" (via ${{{}}})", var));
            }
            out.push(line);
        }
        out.push(String::new());
    }

    if !plan.failures.is_empty() {
        out.push(format!("{}", "Unresolved conflicts:".red()));
        for failure in &plan.failures {
            out.push(format!(
                "  {}: {}/{} - {}",
                failure.service, failure.host_port, failure.protocol, failure.reason
            ));
        }
        out.push(String::new());
    }

    for report in write_reports {
        match &report.result {
            Ok(()) => {
                let mut line = format!("Updated {}", report.path.display());
                if let Some(backup) = &report.backup {
                    line.push_str(&format!(" (backup: {})", backup.display()));
                }
                out.push(line);
            }
            Err(reason) => out.push(format!(
                "{}",
                format!("Failed to update {}: {}", report.path.display(), reason).red()
            )),
        }
    }

    out.join("\n")
}
