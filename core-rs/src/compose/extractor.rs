//! Port binding extraction
//!
//! Walks every service's `ports` list and produces one [`PortBinding`] per
//! published port, with environment references resolved to concrete
//! numbers. Extraction is total: an entry that matches no recognized form
//! is a hard error, never silently dropped.
//!
//! Recognized forms:
//! - `"HOST"`, `"HOST/proto"`, `"HOST:CONTAINER"`, `"HOST:CONTAINER/proto"`
//!   (each part may carry `${VAR}` / `${VAR:-default}` / `$VAR` references)
//! - bare integer scalars (`- 8080`)
//! - long form mappings (`published` / `target` / `protocol`)

use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::compose::ComposeFile;
use crate::envfile::{self, EnvironmentMap};
use crate::errors::{DcpError, Result};

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// One declared host-to-container port mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Declaring service
    pub service: String,

    /// Published host port, always concrete after extraction
    pub host_port: u16,

    /// Container-side port (equals `host_port` for host-only forms)
    pub container_port: Option<u16>,

    pub protocol: Protocol,

    /// Variable driving the host port, when the token references one
    pub source_variable: Option<String>,

    /// Original scalar as written in the compose file
    pub raw_token: String,
}

/// A service and its bindings, in document order
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub image: Option<String>,
    pub bindings: Vec<PortBinding>,
}

/// Parsed short-form port token, dispatched over the closed grammar
#[derive(Debug, PartialEq, Eq)]
enum PortSpec {
    HostOnly { host: u16, protocol: Protocol },
    Mapped { host: u16, container: u16, protocol: Protocol },
}

fn parse_port_number(part: &str) -> std::result::Result<u16, String> {
    let port: u16 = part
        .parse()
        .map_err(|_| format!("'{}' is not a port number", part))?;
    if port == 0 {
        return Err("port 0 is not publishable".to_string());
    }
    Ok(port)
}

/// Parse a fully resolved short-form token
fn parse_port_spec(resolved: &str) -> std::result::Result<PortSpec, String> {
    let (body, protocol) = match resolved.split_once('/') {
        Some((body, proto)) => (body, proto.parse::<Protocol>()?),
        None => (resolved, Protocol::Tcp),
    };

    let parts: Vec<&str> = body.split(':').collect();
    match parts.as_slice() {
        [host] => Ok(PortSpec::HostOnly {
            host: parse_port_number(host)?,
            protocol,
        }),
        [host, container] => Ok(PortSpec::Mapped {
            host: parse_port_number(host)?,
            container: parse_port_number(container)?,
            protocol,
        }),
        _ => Err("expected 'HOST' or 'HOST:CONTAINER'".to_string()),
    }
}

fn malformed(service: &str, token: &str, reason: &str) -> DcpError {
    DcpError::MalformedPort(format!(
        "service '{}': token '{}' ({})",
        service, token, reason
    ))
}

/// Resolve an optional long-form scalar (integer or string with references)
fn resolve_long_form_scalar(
    service: &str,
    value: &Value,
    env: &EnvironmentMap,
) -> Result<(u16, Option<String>)> {
    match value {
        Value::Number(n) => {
            let raw = n.to_string();
            let port = parse_port_number(&raw).map_err(|r| malformed(service, &raw, &r))?;
            Ok((port, None))
        }
        Value::String(s) => {
            let resolved = envfile::resolve(s, env)?;
            let port =
                parse_port_number(&resolved).map_err(|r| malformed(service, s, &r))?;
            Ok((port, envfile::first_variable(s)))
        }
        other => Err(malformed(
            service,
            &format!("{:?}", other),
            "expected a number or string",
        )),
    }
}

/// Extract one binding from a single `ports` entry
fn extract_entry(service: &str, entry: &Value, env: &EnvironmentMap) -> Result<PortBinding> {
    match entry {
        // - 8080
        Value::Number(n) => {
            let raw = n.to_string();
            let host = parse_port_number(&raw).map_err(|r| malformed(service, &raw, &r))?;
            Ok(PortBinding {
                service: service.to_string(),
                host_port: host,
                container_port: Some(host),
                protocol: Protocol::Tcp,
                source_variable: None,
                raw_token: raw,
            })
        }

        // - "8080:80", "8080:80/udp", "8080", "${API_PORT:-8080}:80", ...
        Value::String(raw) => {
            let resolved = envfile::resolve(raw, env)?;
            let spec =
                parse_port_spec(&resolved).map_err(|r| malformed(service, raw, &r))?;
            let (host, container, protocol) = match spec {
                PortSpec::HostOnly { host, protocol } => (host, Some(host), protocol),
                PortSpec::Mapped {
                    host,
                    container,
                    protocol,
                } => (host, Some(container), protocol),
            };

            Ok(PortBinding {
                service: service.to_string(),
                host_port: host,
                container_port: container,
                protocol,
                source_variable: envfile::first_variable(raw),
                raw_token: raw.clone(),
            })
        }

        // - published: 8080
        //   target: 80
        //   protocol: udp
        Value::Mapping(map) => {
            let published = map
                .get(&Value::String("published".to_string()))
                .ok_or_else(|| {
                    malformed(service, "<long form>", "long form without 'published'")
                })?;
            let (host, source_variable) = resolve_long_form_scalar(service, published, env)?;

            let container = match map.get(&Value::String("target".to_string())) {
                Some(target) => Some(resolve_long_form_scalar(service, target, env)?.0),
                None => None,
            };

            let protocol = match map.get(&Value::String("protocol".to_string())) {
                Some(Value::String(p)) => p
                    .parse::<Protocol>()
                    .map_err(|r| malformed(service, p, &r))?,
                Some(other) => {
                    return Err(malformed(
                        service,
                        &format!("{:?}", other),
                        "protocol must be a string",
                    ))
                }
                None => Protocol::Tcp,
            };

            // The published scalar is the rewrite target for long forms
            let raw_token = match published {
                Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            };

            Ok(PortBinding {
                service: service.to_string(),
                host_port: host,
                container_port: container,
                protocol,
                source_variable,
                raw_token,
            })
        }

        other => Err(malformed(
            service,
            &format!("{:?}", other),
            "unrecognized port entry",
        )),
    }
}

/// Extract every declared port, in document order
///
/// # Errors
/// Fails on the first malformed token or unresolved variable; the caller
/// never sees a partially built inventory.
pub fn extract(compose: &ComposeFile, env: &EnvironmentMap) -> Result<Vec<ServiceSpec>> {
    let mut specs = Vec::new();

    for (name, config) in compose.services()? {
        let image = config
            .get("image")
            .and_then(Value::as_str)
            .map(String::from);

        let mut bindings = Vec::new();
        if let Some(ports) = config.get("ports") {
            let entries = ports.as_sequence().ok_or_else(|| {
                malformed(&name, "<ports>", "'ports' is not a list")
            })?;
            for entry in entries {
                bindings.push(extract_entry(&name, entry, env)?);
            }
        }

        debug!(service = %name, ports = bindings.len(), "extracted service");
        specs.push(ServiceSpec {
            name,
            image,
            bindings,
        });
    }

    Ok(specs)
}

/// Variable names referenced by any port entry in the document
///
/// Drives `.env` auto-detection and the report's environment block.
pub fn referenced_variables(compose: &ComposeFile) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();

    for (_, config) in compose.services()? {
        let Some(entries) = config.get("ports").and_then(Value::as_sequence) else {
            continue;
        };
        for entry in entries {
            match entry {
                Value::String(raw) => names.extend(envfile::referenced_names(raw)),
                Value::Mapping(map) => {
                    for key in ["published", "target"] {
                        if let Some(Value::String(raw)) =
                            map.get(&Value::String(key.to_string()))
                        {
                            names.extend(envfile::referenced_names(raw));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(names)
}
