//! Environment file loading and variable substitution
//!
//! Loads `NAME=VALUE` pairs from a `.env` file and resolves `${VAR}`,
//! `${VAR:-default}` and `$VAR` references found in compose port tokens.
//! The map is immutable after load except for reassigned ports written
//! back through [`update_env_text`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::errors::{DcpError, Result};

/// `${NAME}` / `${NAME:-default}` references
static BRACED_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("braced variable pattern"));

/// Bare `$NAME` references (uppercase convention, as docker-compose documents)
static SIMPLE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").expect("simple variable pattern"));

/// Key/value pairs loaded from an environment file
#[derive(Debug, Clone, Default)]
pub struct EnvironmentMap {
    vars: HashMap<String, String>,
}

impl EnvironmentMap {
    /// Load variables from an environment file
    ///
    /// # Arguments
    /// * `path` - Path to the env file
    ///
    /// # Errors
    /// Returns `DcpError::EnvFile` if the file cannot be read. Callers that
    /// auto-detect the file should treat a missing file as an empty map via
    /// `EnvironmentMap::default()` instead of calling this.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DcpError::EnvFile(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        let map = Self::parse(&content);
        debug!(path = %path.display(), count = map.len(), "loaded environment file");
        Ok(map)
    }

    /// Parse env file content into a map
    ///
    /// Blank lines and `#` comments are skipped. Values wrapped in single
    /// or double quotes are unquoted.
    pub fn parse(content: &str) -> Self {
        let mut vars = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let mut value = value.trim();

                if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
                    || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
                {
                    value = &value[1..value.len() - 1];
                }

                vars.insert(key, value.to_string());
            }
        }

        EnvironmentMap { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Resolve every variable reference in a token
///
/// A token without references passes through unchanged. `${NAME:-default}`
/// falls back to `default` when `NAME` is absent.
///
/// # Errors
/// Returns `DcpError::UnresolvedVariable` when a referenced name is absent
/// from the map and carries no default.
pub fn resolve(token: &str, env: &EnvironmentMap) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();

    let pass1 = BRACED_VAR.replace_all(token, |caps: &regex::Captures| {
        let expr = &caps[1];
        if let Some((name, default)) = expr.split_once(":-") {
            match env.get(name) {
                Some(value) => value.to_string(),
                None => default.to_string(),
            }
        } else {
            match env.get(expr) {
                Some(value) => value.to_string(),
                None => {
                    missing.push(expr.to_string());
                    String::new()
                }
            }
        }
    });

    let pass2 = SIMPLE_VAR.replace_all(&pass1, |caps: &regex::Captures| {
        let name = &caps[1];
        match env.get(name) {
            Some(value) => value.to_string(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing.first() {
        return Err(DcpError::UnresolvedVariable(format!(
            "'{}' referenced in '{}' is not defined and has no default",
            name, token
        )));
    }

    Ok(pass2.into_owned())
}

/// Extract the variable names referenced in a token, defaults stripped
pub fn referenced_names(token: &str) -> Vec<String> {
    let mut names = Vec::new();

    for caps in BRACED_VAR.captures_iter(token) {
        let expr = &caps[1];
        let name = match expr.split_once(":-") {
            Some((name, _)) => name,
            None => expr,
        };
        names.push(name.to_string());
    }

    for caps in SIMPLE_VAR.captures_iter(token) {
        names.push(caps[1].to_string());
    }

    names
}

/// First variable referenced in a token, if any
///
/// A port driven by `${API_PORT:-8080}:8080` is reassigned by updating
/// `API_PORT`, so the leading reference identifies the rewrite target.
pub fn first_variable(token: &str) -> Option<String> {
    referenced_names(token).into_iter().next()
}

/// Replace the value of `name` in env file text, preserving every other
/// line byte-for-byte
///
/// The first non-comment `name=...` line is rewritten to `name=value`.
/// When no such line exists the assignment is appended, so variables that
/// were only ever satisfied by a `:-` default get pinned on first fix.
pub fn update_env_text(text: &str, name: &str, value: &str) -> String {
    if text.is_empty() {
        return format!("{}={}\n", name, value);
    }

    let ends_with_newline = text.ends_with('\n');
    let mut lines: Vec<String> = text.split('\n').map(String::from).collect();
    if ends_with_newline {
        // split leaves a trailing empty element for the final newline
        lines.pop();
    }

    let mut replaced = false;
    for line in lines.iter_mut() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        if let Some((key, _)) = stripped.split_once('=') {
            if key.trim() == name && !replaced {
                *line = format!("{}={}", name, value);
                replaced = true;
            }
        }
    }

    if !replaced {
        lines.push(format!("{}={}", name, value));
    }

    let mut out = lines.join("\n");
    if ends_with_newline || !replaced {
        out.push('\n');
    }
    out
}
