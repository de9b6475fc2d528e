//! Live occupancy probing
//!
//! Occupancy is established by a bind probe on 0.0.0.0 (a port we can bind
//! is free). The owning pid comes from `ss -p` output, falling back to
//! `lsof` where `ss` is unavailable (macOS); the process name is resolved
//! through the system process table. Container claims come from a single
//! `docker ps` snapshot taken on first use and shared for the whole run,
//! keeping probes idempotent within a run.

use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::{TcpListener, UdpSocket};
use std::process::Command;
use sysinfo::{Pid, System};
use tracing::debug;

use crate::compose::Protocol;
use crate::occupancy::{ContainerInfo, OccupancyRecord, PortProbe, ProcessInfo};

/// One row of the `docker ps` snapshot
#[derive(Debug, Clone)]
struct ContainerRow {
    id: String,
    name: String,
    image: String,
    /// Published `(host_port, protocol)` pairs parsed from the Ports column
    published: Vec<(u16, Protocol)>,
}

/// Probe backed by the live system
pub struct SystemProbe {
    cache: RefCell<HashMap<(u16, Protocol), OccupancyRecord>>,
    containers: OnceCell<Vec<ContainerRow>>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        SystemProbe {
            cache: RefCell::new(HashMap::new()),
            containers: OnceCell::new(),
        }
    }

    /// Test whether the port can still be bound
    fn is_bindable(port: u16, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Tcp => TcpListener::bind(("0.0.0.0", port)).is_ok(),
            Protocol::Udp => UdpSocket::bind(("0.0.0.0", port)).is_ok(),
        }
    }

    /// Pid of the process listening on a port, if discoverable
    fn listening_pid(port: u16, protocol: Protocol) -> Option<u32> {
        Self::pid_from_ss(port, protocol).or_else(|| Self::pid_from_lsof(port, protocol))
    }

    /// Parse `ss -Hlnp` output for the listener on `port`
    fn pid_from_ss(port: u16, protocol: Protocol) -> Option<u32> {
        let proto_flag = match protocol {
            Protocol::Tcp => "-t",
            Protocol::Udp => "-u",
        };
        let output = Command::new("ss")
            .args(["-H", "-l", "-n", "-p", proto_flag])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let suffix = format!(":{}", port);
        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines() {
            let has_port = line
                .split_whitespace()
                .take(6)
                .any(|tok| tok.contains(':') && tok.ends_with(&suffix));
            if !has_port {
                continue;
            }
            if let Some(idx) = line.find("pid=") {
                let digits: String = line[idx + 4..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if let Ok(pid) = digits.parse() {
                    return Some(pid);
                }
            }
        }
        None
    }

    /// `lsof -t` fallback for platforms without `ss`
    fn pid_from_lsof(port: u16, protocol: Protocol) -> Option<u32> {
        let spec = match protocol {
            Protocol::Tcp => format!("-iTCP:{}", port),
            Protocol::Udp => format!("-iUDP:{}", port),
        };
        let mut cmd = Command::new("lsof");
        cmd.args(["-nP", "-t", &spec]);
        if protocol == Protocol::Tcp {
            cmd.args(["-sTCP:LISTEN"]);
        }

        let output = cmd.output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()?
            .trim()
            .parse()
            .ok()
    }

    /// Resolve a pid's name through the process table
    ///
    /// A pid that vanished or is unreadable yields None, not an error.
    fn process_name(pid: u32) -> Option<String> {
        let mut sys = System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All);
        sys.process(Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().into_owned())
    }

    /// The per-run `docker ps` snapshot (empty when docker is unavailable)
    fn container_table(&self) -> &Vec<ContainerRow> {
        self.containers.get_or_init(|| {
            let output = Command::new("docker")
                .args(["ps", "--format", "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Ports}}"])
                .output();

            let output = match output {
                Ok(out) if out.status.success() => out,
                _ => {
                    debug!("docker unavailable, container claims disabled");
                    return Vec::new();
                }
            };

            let text = String::from_utf8_lossy(&output.stdout);
            let rows: Vec<ContainerRow> = text
                .lines()
                .filter_map(|line| {
                    let mut parts = line.split('\t');
                    let id = parts.next()?.trim().to_string();
                    let name = parts.next()?.trim().to_string();
                    let image = parts.next()?.trim().to_string();
                    let ports = parts.next().unwrap_or_default();
                    Some(ContainerRow {
                        id,
                        name,
                        image,
                        published: parse_published_ports(ports),
                    })
                })
                .collect();

            debug!(containers = rows.len(), "docker ps snapshot");
            rows
        })
    }

    fn container_for(&self, port: u16, protocol: Protocol) -> Option<ContainerInfo> {
        self.container_table()
            .iter()
            .find(|row| row.published.contains(&(port, protocol)))
            .map(|row| ContainerInfo {
                id: row.id.clone(),
                name: row.name.clone(),
                image: row.image.clone(),
            })
    }
}

/// Parse a `docker ps` Ports column like
/// `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 5432/tcp`
fn parse_published_ports(ports: &str) -> Vec<(u16, Protocol)> {
    let mut out = Vec::new();

    for segment in ports.split(',') {
        let segment = segment.trim();
        let Some((host_side, container_side)) = segment.split_once("->") else {
            // Exposed-only entries publish nothing on the host
            continue;
        };

        let protocol = match container_side.rsplit_once('/').map(|(_, p)| p.trim()) {
            Some("udp") => Protocol::Udp,
            _ => Protocol::Tcp,
        };

        if let Some((_, port_str)) = host_side.rsplit_once(':') {
            if let Ok(port) = port_str.trim().parse::<u16>() {
                if !out.contains(&(port, protocol)) {
                    out.push((port, protocol));
                }
            }
        }
    }

    out
}

impl PortProbe for SystemProbe {
    fn probe(&self, port: u16, protocol: Protocol) -> OccupancyRecord {
        if let Some(cached) = self.cache.borrow().get(&(port, protocol)) {
            return cached.clone();
        }

        let in_use = !Self::is_bindable(port, protocol);
        let mut record = OccupancyRecord {
            in_use,
            process: None,
            container: None,
        };

        if in_use {
            record.process = Self::listening_pid(port, protocol).map(|pid| ProcessInfo {
                pid,
                name: Self::process_name(pid),
            });
            record.container = self.container_for(port, protocol);
        }

        debug!(port, %protocol, in_use, "probed port");
        self.cache
            .borrow_mut()
            .insert((port, protocol), record.clone());
        record
    }
}
