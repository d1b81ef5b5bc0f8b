//! Configuration loader with multi-source merging

use crate::{BulkstreamConfig, Paths};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
    env_vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "BULK".to_string(),
            user_config: true,
            env_vars: None,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "BULK")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/bulkstream/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<BulkstreamConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = BulkstreamConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/bulkstream/config.toml)
        if self.user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(toml_file(user_config_file));
                }
            }
        }

        // 3. Project config (bulkstream.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(toml_file(project_config_file));
        }

        // 4. Local config (bulkstream.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(toml_file(local_config_file));
        }

        // 5. Environment variables (BULK_SECTION__KEY)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_vars),
        );

        let config = builder.build().context("failed to build configuration")?;

        let bulkstream_config: BulkstreamConfig = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        bulkstream_config.validate()?;

        Ok(bulkstream_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> BulkstreamConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn toml_file(path: PathBuf) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path)
        .required(false)
        .format(config::FileFormat::Toml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader(project_dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(project_dir)
            .without_user_config()
            .with_env_vars(HashMap::new())
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config, BulkstreamConfig::default());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[processor]
concurrency = 2
partitions = 4

[bulk]
bucket_size = 50

[bulk.actions.automation]
concurrency = 8
batch_size = 5

[audit]
batch_size = 10
"#;
        fs::write(project_dir.join("bulkstream.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.processor.partitions, 4);
        assert_eq!(config.bulk.bucket_size, 50);
        assert_eq!(config.bulk.batch_size, 25);
        assert_eq!(config.concurrency_for("automation"), 8);
        assert_eq!(config.batch_size_for("automation"), 5);
        assert_eq!(config.concurrency_for("other"), 2);
        assert_eq!(config.audit.batch_size, 10);
        assert_eq!(config.audit.batch_threshold_ms, 200);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("bulkstream.toml"),
            "[bulk]\nbucket_size = 50\nbatch_size = 10\n",
        )
        .expect("Failed to write project config");
        fs::write(
            project_dir.join("bulkstream.local.toml"),
            "[bulk]\nbucket_size = 20\n",
        )
        .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.bulk.bucket_size, 20);
        assert_eq!(config.bulk.batch_size, 10);
    }

    #[test]
    fn test_env_overrides_files() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("bulkstream.local.toml"),
            "[audit]\nbatch_threshold_ms = 1000\nstream = \"audit\"\n",
        )
        .expect("Failed to write local config");

        let config = loader(project_dir)
            .with_env_vars(vars(&[
                ("BULK_AUDIT__BATCH_THRESHOLD_MS", "50"),
                ("BULK_PROCESSOR__CONCURRENCY", "3"),
                ("OTHER_PROCESSOR__CONCURRENCY", "9"),
            ]))
            .load()
            .expect("Failed to load config");

        assert_eq!(config.audit.batch_threshold_ms, 50);
        assert_eq!(config.processor.concurrency, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(project_dir.join("bulkstream.toml"), "[bulk]\nbatch_size = 0\n")
            .expect("Failed to write config");

        assert!(loader(project_dir).load().is_err());
        assert_eq!(loader(project_dir).load_or_default(), BulkstreamConfig::default());
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let mut expected = BulkstreamConfig::default();
        expected.processor.partitions = 3;
        expected.audit.stream = "audit/bulk".to_string();
        fs::write(
            project_dir.join("bulkstream.toml"),
            expected.to_toml().expect("render"),
        )
        .expect("Failed to write config");

        assert_eq!(loader(project_dir).load().expect("Failed to load config"), expected);
    }
}
