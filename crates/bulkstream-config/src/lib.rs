//! Configuration management for Bulkstream
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (BULK_* prefix, `__` between keys)
//! 2. bulkstream.local.toml (gitignored, local overrides)
//! 3. bulkstream.toml (git-tracked, project config)
//! 4. ~/.config/bulkstream/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Bulkstream configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkstreamConfig {
    pub processor: ProcessorConfig,
    pub bulk: BulkConfig,
    pub audit: AuditConfig,
}

/// Defaults applied to every computation without a more specific setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub concurrency: usize,
    pub partitions: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            partitions: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub bucket_size: u32,
    pub batch_size: u32,
    pub actions: BTreeMap<String, ActionConfig>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            bucket_size: 100,
            batch_size: 25,
            actions: BTreeMap::new(),
        }
    }
}

/// Per-action overrides. Unset fields fall back to the `bulk` and
/// `processor` sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub stream: String,
    pub batch_size: usize,
    pub batch_threshold_ms: u64,
    pub concurrency: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stream: "audit".to_string(),
            batch_size: 25,
            batch_threshold_ms: 200,
            concurrency: 1,
        }
    }
}

impl BulkstreamConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.bulk.actions.get(name)
    }

    pub fn bucket_size_for(&self, action: &str) -> u32 {
        self.action(action)
            .and_then(|a| a.bucket_size)
            .unwrap_or(self.bulk.bucket_size)
    }

    /// Batch size for `action`, never above its bucket size.
    pub fn batch_size_for(&self, action: &str) -> u32 {
        self.action(action)
            .and_then(|a| a.batch_size)
            .unwrap_or(self.bulk.batch_size)
            .min(self.bucket_size_for(action))
    }

    pub fn concurrency_for(&self, action: &str) -> usize {
        self.action(action)
            .and_then(|a| a.concurrency)
            .unwrap_or(self.processor.concurrency)
    }

    pub fn partitions_for(&self, action: &str) -> usize {
        self.action(action)
            .and_then(|a| a.partitions)
            .unwrap_or(self.processor.partitions)
    }

    /// Rejects sizes the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::ValidationError(format!("{name} must be positive")))
            } else {
                Ok(())
            }
        };

        positive("processor.concurrency", self.processor.concurrency as u64)?;
        positive("processor.partitions", self.processor.partitions as u64)?;
        positive("bulk.bucket_size", u64::from(self.bulk.bucket_size))?;
        positive("bulk.batch_size", u64::from(self.bulk.batch_size))?;
        positive("audit.batch_size", self.audit.batch_size as u64)?;
        positive("audit.batch_threshold_ms", self.audit.batch_threshold_ms)?;
        positive("audit.concurrency", self.audit.concurrency as u64)?;
        if self.audit.stream.is_empty() {
            return Err(ConfigError::ValidationError("audit.stream must not be empty".to_string()));
        }

        for (name, action) in &self.bulk.actions {
            for (field, value) in [
                ("concurrency", action.concurrency.map(|v| v as u64)),
                ("partitions", action.partitions.map(|v| v as u64)),
                ("bucket_size", action.bucket_size.map(u64::from)),
                ("batch_size", action.batch_size.map(u64::from)),
            ] {
                if let Some(value) = value {
                    positive(&format!("bulk.actions.{name}.{field}"), value)?;
                }
            }
        }
        Ok(())
    }

    /// Renders the configuration as a `bulkstream.toml` document.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
