use std::path::Path;

use ctl_merge::MergeBasePolicy;
use serde::{Deserialize, Serialize};

use crate::error::{CtlError, CtlResult};

/// Engine tunables. Every field has a default, so a TOML file only needs
/// the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Compare-and-swap attempts for a plain append.
    pub append_attempts: u32,
    /// Read-compute-write rounds for a merge.
    pub merge_attempts: u32,
    /// History page size when the caller gives none.
    pub history_page_size: usize,
    /// Upper bound on any requested page size.
    pub max_history_page_size: usize,
    pub merge_base: MergeBasePolicy,
    pub root_branch_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            append_attempts: 3,
            merge_attempts: 3,
            history_page_size: 50,
            max_history_page_size: 500,
            merge_base: MergeBasePolicy::LatestFork,
            root_branch_name: "main".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> CtlResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| CtlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> CtlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> CtlResult<()> {
        if self.append_attempts == 0 || self.merge_attempts == 0 {
            return Err(CtlError::Config("attempt counts must be at least 1".into()));
        }
        if self.history_page_size == 0 || self.history_page_size > self.max_history_page_size {
            return Err(CtlError::Config(format!(
                "history_page_size must be between 1 and max_history_page_size ({})",
                self.max_history_page_size
            )));
        }
        ctl_branch::validate_branch_name(&self.root_branch_name)?;
        Ok(())
    }

    /// Clamp a requested page size to `1..=max_history_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.history_page_size)
            .clamp(1, self.max_history_page_size)
    }
}
