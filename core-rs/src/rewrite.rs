//! Conflict resolution planning and durable rewriting
//!
//! A [`ResolutionPlan`] pairs each conflicting binding with a replacement
//! port. Rendering applies the plan to the in-memory file texts: bindings
//! driven by an environment variable update that variable's line in the
//! env text; inline literals are replaced inside the one occurrence of
//! their raw token within the declaring service's block. Committing backs
//! each target file up to `<path>.backup` before overwriting it, in a
//! fixed compose-then-env order, and reports per-file outcomes.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::compose::Protocol;
use crate::errors::{DcpError, Result};
use crate::inventory::PortInventoryEntry;
use crate::occupancy::PortProbe;
use crate::port::{allocate, PortRange};

/// One chosen replacement
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub service: String,
    pub old_port: u16,
    pub new_port: u16,
    pub container_port: Option<u16>,
    pub protocol: Protocol,

    /// When set, the env file is the artifact that changes
    pub source_variable: Option<String>,

    pub raw_token: String,
}

/// A binding the allocator could not serve; recorded, never fatal
#[derive(Debug, Clone)]
pub struct AllocationFailure {
    pub service: String,
    pub host_port: u16,
    pub protocol: Protocol,
    pub reason: String,
}

/// Replacements chosen for the current run
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    pub entries: Vec<PlanEntry>,
    pub failures: Vec<AllocationFailure>,
}

impl ResolutionPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.failures.is_empty()
    }

    /// Entries that rewrite the env file
    pub fn env_entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.source_variable.is_some())
    }

    /// Entries that rewrite the compose file
    pub fn compose_entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.source_variable.is_none())
    }
}

/// Operator reply for one conflicting binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptReply {
    /// Accept the allocator's suggestion
    Auto,
    /// Operator-supplied override, validated before acceptance
    Port(u16),
    /// Leave this binding untouched and move on
    Skip,
}

/// Interactive decision source, one exchange per conflicting binding
pub trait Prompter {
    fn choose(&mut self, entry: &PortInventoryEntry, suggestion: u16) -> PromptReply;

    /// Called when an override fails validation; `choose` runs again next
    fn reject(&mut self, port: u16, reason: &str);
}

/// Is this entry a conflict the fix should resolve?
///
/// Occupied ports always are. For declared duplicates the first declarant
/// of a `(port, protocol)` pair keeps its port and every later declarant
/// is reassigned - unless the duplication comes from the same shared
/// variable, where a rewrite would move every declarant in lockstep and
/// separate nothing.
fn is_conflict(
    entry: &PortInventoryEntry,
    first_declarants: &mut HashMap<(u16, u8), Option<String>>,
) -> bool {
    let binding = &entry.binding;
    let pair = (binding.host_port, binding.protocol as u8);

    match first_declarants.get(&pair) {
        None => {
            first_declarants.insert(pair, binding.source_variable.clone());
            !entry.available
        }
        Some(first_var) => {
            if !entry.available {
                return true;
            }
            let same_shared_var =
                binding.source_variable.is_some() && first_var == &binding.source_variable;
            entry.declared_duplicate && !same_shared_var
        }
    }
}

/// Choose replacement ports for every conflicting binding
///
/// The reserved set starts with every declared host port and grows with
/// each assignment, so two conflicts can never receive the same port even
/// within one run. Bindings sharing a `source_variable` share one
/// assignment: the env file holds a single value.
pub fn build_plan(
    inventory: &[PortInventoryEntry],
    range: &PortRange,
    probe: &dyn PortProbe,
    mut prompter: Option<&mut dyn Prompter>,
) -> ResolutionPlan {
    let mut reserved: BTreeSet<u16> =
        inventory.iter().map(|e| e.binding.host_port).collect();
    let mut var_assignments: HashMap<String, u16> = HashMap::new();
    let mut first_declarants: HashMap<(u16, u8), Option<String>> = HashMap::new();
    let mut plan = ResolutionPlan::default();

    for entry in inventory {
        if !is_conflict(entry, &mut first_declarants) {
            continue;
        }

        let binding = &entry.binding;

        // A variable already reassigned this run drives this binding too
        if let Some(var) = &binding.source_variable {
            if let Some(&port) = var_assignments.get(var) {
                plan.entries.push(PlanEntry {
                    service: binding.service.clone(),
                    old_port: binding.host_port,
                    new_port: port,
                    container_port: binding.container_port,
                    protocol: binding.protocol,
                    source_variable: Some(var.clone()),
                    raw_token: binding.raw_token.clone(),
                });
                continue;
            }
        }

        let suggestion =
            match allocate(binding.host_port, range, &reserved, probe, binding.protocol) {
                Ok(port) => port,
                Err(e) => {
                    warn!(service = %binding.service, port = binding.host_port, %e, "allocation failed");
                    plan.failures.push(AllocationFailure {
                        service: binding.service.clone(),
                        host_port: binding.host_port,
                        protocol: binding.protocol,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

        let new_port = match prompter.as_deref_mut() {
            None => Some(suggestion),
            Some(prompter) => loop {
                match prompter.choose(entry, suggestion) {
                    PromptReply::Auto => break Some(suggestion),
                    PromptReply::Skip => break None,
                    PromptReply::Port(port) => {
                        if reserved.contains(&port) {
                            prompter.reject(
                                port,
                                "already declared or reserved by a pending reassignment",
                            );
                        } else if probe.probe(port, binding.protocol).in_use {
                            prompter.reject(port, "already in use on this host");
                        } else {
                            break Some(port);
                        }
                    }
                }
            },
        };

        let Some(new_port) = new_port else {
            debug!(service = %binding.service, port = binding.host_port, "skipped by operator");
            continue;
        };

        reserved.insert(new_port);
        if let Some(var) = &binding.source_variable {
            var_assignments.insert(var.clone(), new_port);
        }

        info!(
            service = %binding.service,
            old = binding.host_port,
            new = new_port,
            via_env = binding.source_variable.is_some(),
            "planned reassignment"
        );
        plan.entries.push(PlanEntry {
            service: binding.service.clone(),
            old_port: binding.host_port,
            new_port,
            container_port: binding.container_port,
            protocol: binding.protocol,
            source_variable: binding.source_variable.clone(),
            raw_token: binding.raw_token.clone(),
        });
    }

    plan
}

/// New file contents produced by applying a plan; `None` means unchanged
#[derive(Debug, Clone, Default)]
pub struct RenderedFiles {
    pub compose: Option<String>,
    pub env: Option<String>,
}

/// Byte bounds of a service's block within the compose text
///
/// The search is anchored below the top-level `services:` key, so an
/// identically named entry under `networks:` or `volumes:` never matches.
fn service_block_bounds(text: &str, service: &str) -> Option<(usize, usize)> {
    let header = format!("{}:", service);
    let mut offset = 0;
    let mut in_services = false;
    // Direct children of `services:` share one indent level; only keys at
    // exactly that level are service names
    let mut child_indent: Option<usize> = None;
    let mut start: Option<(usize, usize)> = None; // (byte offset, indent)

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        let indent = trimmed.len() - trimmed.trim_start().len();
        let content = trimmed.trim_start();
        let blank = content.is_empty() || content.starts_with('#');

        if start.is_none() && indent == 0 && !blank {
            in_services = content == "services:";
            child_indent = None;
        }

        match start {
            None => {
                if in_services && indent > 0 && !blank {
                    let expected = *child_indent.get_or_insert(indent);
                    if indent == expected
                        && (content == header
                            || content.starts_with(&(header.clone() + " ")))
                    {
                        start = Some((offset, indent));
                    }
                }
            }
            Some((start_offset, service_indent)) => {
                // Block ends at the next non-blank, non-comment line at or
                // above the service's own indent
                if !blank && indent <= service_indent {
                    return Some((start_offset, offset));
                }
            }
        }

        offset += line.len();
    }

    start.map(|(start_offset, _)| (start_offset, text.len()))
}

/// Rewrite a token's host-port prefix (the part before `:` or `/`)
fn retarget_token(raw_token: &str, old_port: u16, new_port: u16) -> Option<String> {
    let old = old_port.to_string();
    let rest = raw_token.strip_prefix(&old)?;
    if !(rest.is_empty() || rest.starts_with(':') || rest.starts_with('/')) {
        return None;
    }
    Some(format!("{}{}", new_port, rest))
}

/// Replace one occurrence of `raw_token` inside the service's block
///
/// Only full sequence-item lines (`- token`) and long-form `published:`
/// lines match, so an identical number appearing as some other service's
/// container port is never touched.
fn replace_in_compose(
    text: &str,
    service: &str,
    raw_token: &str,
    old_port: u16,
    new_port: u16,
) -> Result<String> {
    let (start, end) = service_block_bounds(text, service).ok_or_else(|| {
        DcpError::WriteFailure(format!(
            "compose rewrite: service '{}' not found in document",
            service
        ))
    })?;
    let block = &text[start..end];

    let new_token = retarget_token(raw_token, old_port, new_port).ok_or_else(|| {
        DcpError::WriteFailure(format!(
            "compose rewrite: token '{}' does not start with host port {}",
            raw_token, old_port
        ))
    })?;

    let escaped = regex::escape(raw_token);
    let patterns = [
        format!(r#"(?m)^(\s*-\s*["']?){}(["']?\s*(?:#.*)?)$"#, escaped),
        format!(r#"(?m)^(\s*(?:-\s*)?published:\s*["']?){}(["']?\s*(?:#.*)?)$"#, escaped),
    ];

    for pattern in &patterns {
        let re = Regex::new(pattern).map_err(|e| {
            DcpError::WriteFailure(format!("compose rewrite: bad token pattern: {}", e))
        })?;
        if re.is_match(block) {
            let replaced = re
                .replace(block, |caps: &regex::Captures| {
                    format!("{}{}{}", &caps[1], new_token, &caps[2])
                })
                .into_owned();
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..start]);
            out.push_str(&replaced);
            out.push_str(&text[end..]);
            return Ok(out);
        }
    }

    Err(DcpError::WriteFailure(format!(
        "compose rewrite: token '{}' not found in service '{}'",
        raw_token, service
    )))
}

/// Apply a plan to the in-memory file texts
///
/// Pure over its inputs; nothing touches the filesystem until
/// [`commit`]. `env_text` of `None` behaves as an empty file, so a
/// default-resolved variable can still be pinned by appending its line.
pub fn render(
    plan: &ResolutionPlan,
    compose_text: &str,
    env_text: Option<&str>,
) -> Result<RenderedFiles> {
    let mut rendered = RenderedFiles::default();

    // Env file: one line update per distinct variable
    let mut env_updates: Vec<(&str, u16)> = Vec::new();
    for entry in plan.env_entries() {
        let var = entry.source_variable.as_deref().unwrap_or_default();
        if !env_updates.iter().any(|(name, _)| *name == var) {
            env_updates.push((var, entry.new_port));
        }
    }
    if !env_updates.is_empty() {
        let mut text = env_text.unwrap_or_default().to_string();
        for (name, port) in env_updates {
            text = crate::envfile::update_env_text(&text, name, &port.to_string());
        }
        rendered.env = Some(text);
    }

    // Compose file: one in-place token replacement per inline literal
    let mut compose = compose_text.to_string();
    let mut compose_changed = false;
    for entry in plan.compose_entries() {
        compose = replace_in_compose(
            &compose,
            &entry.service,
            &entry.raw_token,
            entry.old_port,
            entry.new_port,
        )?;
        compose_changed = true;
    }
    if compose_changed {
        rendered.compose = Some(compose);
    }

    Ok(rendered)
}

/// Outcome of writing one file
#[derive(Debug)]
pub struct FileWriteReport {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub result: std::result::Result<(), String>,
}

impl FileWriteReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Back up and overwrite one target file
fn write_one(path: &Path, content: &str, backup: bool) -> FileWriteReport {
    let mut backup_path = None;

    if backup && path.exists() {
        let bak = PathBuf::from(format!("{}.backup", path.display()));
        if let Err(e) = fs::copy(path, &bak) {
            // A failed backup blocks the write; the original is untouched
            return FileWriteReport {
                path: path.to_path_buf(),
                backup: None,
                result: Err(format!("backup to '{}' failed: {}", bak.display(), e)),
            };
        }
        backup_path = Some(bak);
    }

    let result = fs::write(path, content).map_err(|e| format!("write failed: {}", e));
    if result.is_ok() {
        info!(path = %path.display(), "updated file");
    }
    FileWriteReport {
        path: path.to_path_buf(),
        backup: backup_path,
        result,
    }
}

/// Persist rendered contents, compose file first, then env file
///
/// Each file carries its own backup safety net; there is no cross-file
/// rollback. A failure on one file does not stop the other.
pub fn commit(
    rendered: &RenderedFiles,
    compose_path: &Path,
    env_path: Option<&Path>,
    backup: bool,
) -> Vec<FileWriteReport> {
    let mut reports = Vec::new();

    if let Some(compose) = &rendered.compose {
        reports.push(write_one(compose_path, compose, backup));
    }

    if let Some(env) = &rendered.env {
        match env_path {
            Some(path) => reports.push(write_one(path, env, backup)),
            None => reports.push(FileWriteReport {
                path: PathBuf::from(".env"),
                backup: None,
                result: Err("no environment file path to write to".to_string()),
            }),
        }
    }

    reports
}
