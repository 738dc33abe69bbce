//! Job file loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{Result, SyncError};
use std::path::Path;

impl JobFile {
    /// Load a job file.
    ///
    /// Automatically detects the format based on file extension:
    /// - `.json` files are parsed as JSON
    /// - `.yaml` or `.yml` files are parsed as YAML
    /// - Other extensions default to YAML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a job file from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let job: JobFile = serde_yaml::from_str(yaml)?;
        job.validate()?;
        Ok(job)
    }

    /// Parse a job file from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let job: JobFile = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("Failed to parse JSON job file: {}", e)))?;
        job.validate()?;
        Ok(job)
    }

    /// Validate the job file.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}
