//! Compose document model
//!
//! Holds both the parsed YAML document (for extraction) and the raw file
//! text (for in-place rewriting). Service order and per-service port order
//! follow the document and are the canonical report order.

pub mod extractor;

pub use extractor::{extract, referenced_variables, PortBinding, Protocol, ServiceSpec};

use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{DcpError, Result};

/// A loaded compose file: raw text plus parsed document
#[derive(Debug, Clone)]
pub struct ComposeFile {
    path: PathBuf,
    text: String,
    doc: Value,
}

impl ComposeFile {
    /// Load and parse a compose file
    ///
    /// # Errors
    /// `DcpError::ComposeFile` when the file is unreadable or not valid YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            DcpError::ComposeFile(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        let mut file = Self::from_str_named(&text, path)?;
        file.path = path.to_path_buf();
        debug!(path = %path.display(), "loaded compose file");
        Ok(file)
    }

    /// Parse compose content without touching the filesystem
    pub fn from_str(text: &str) -> Result<Self> {
        Self::from_str_named(text, Path::new("<inline>"))
    }

    fn from_str_named(text: &str, path: &Path) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(text).map_err(|e| {
            DcpError::ComposeFile(format!("Invalid YAML in '{}': {}", path.display(), e))
        })?;

        Ok(ComposeFile {
            path: path.to_path_buf(),
            text: text.to_string(),
            doc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Services in document order as (name, definition) pairs
    ///
    /// A document without a `services` key yields an empty list; a
    /// `services` value that is not a mapping is an error.
    pub fn services(&self) -> Result<Vec<(String, &Value)>> {
        let services = match self.doc.get("services") {
            Some(value) => value,
            None => return Ok(Vec::new()),
        };

        let mapping = services.as_mapping().ok_or_else(|| {
            DcpError::ComposeFile(format!(
                "'services' in '{}' is not a mapping",
                self.path.display()
            ))
        })?;

        let mut out = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = key.as_str().ok_or_else(|| {
                DcpError::ComposeFile(format!(
                    "non-string service name in '{}'",
                    self.path.display()
                ))
            })?;
            out.push((name.to_string(), value));
        }
        Ok(out)
    }
}
