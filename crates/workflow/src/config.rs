//! Workflow configuration.

use custody_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration shared by all workflow commands.
///
/// Loaded from YAML when a config file is given; every field has a default
/// and can be overridden from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Root directory of the blob store.
    pub store_root: PathBuf,
    /// Audit log file. Defaults to `<store_root>/audit.jsonl`.
    pub audit_log: Option<PathBuf>,
    /// Name recorded as the acting examiner in audit entries.
    pub examiner: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("./custody-store"),
            audit_log: None,
            examiner: "unknown".to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: WorkflowConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.examiner.trim().is_empty() {
            return Err(Error::Config("examiner must not be empty".to_string()));
        }
        if self.store_root.as_os_str().is_empty() {
            return Err(Error::Config("store_root must not be empty".to_string()));
        }
        Ok(())
    }

    /// Effective audit log path.
    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.store_root.join("audit.jsonl"))
    }
}
