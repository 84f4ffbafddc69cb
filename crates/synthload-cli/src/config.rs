use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use synthload_generate::GenerateOptions;
use synthload_load::sinks::postgres::DEFAULT_TABLE;
use synthload_load::{LoaderOptions, PipelineOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkSettings {
    pub table: String,
    /// Create the table with its unique constraints before loading.
    pub create_table: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            create_table: false,
        }
    }
}

/// Contents of `synthload.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub generation: GenerateOptions,
    pub load: LoaderOptions,
    pub pipeline: PipelineOptions,
    pub sink: SinkSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generation: GenerateOptions {
                email_domains: vec![
                    "example.com".to_string(),
                    "example.net".to_string(),
                    "example.org".to_string(),
                ],
                ..GenerateOptions::default()
            },
            load: LoaderOptions::default(),
            pipeline: PipelineOptions::default(),
            sink: SinkSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.generation
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.load.connect_timeout_ms == 0 || self.load.statement_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "load timeouts must be greater than zero".to_string(),
            ));
        }
        if self.load.backoff_initial_ms > self.load.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_initial_ms {} exceeds backoff_max_ms {}",
                self.load.backoff_initial_ms, self.load.backoff_max_ms
            )));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> ConfigResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Write the default config to `path` unless a file is already there.
pub fn init_config(path: &Path, force: bool) -> ConfigResult<AppConfig> {
    if path.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let config = AppConfig::default();
    std::fs::write(path, toml::to_string_pretty(&config)?)?;
    Ok(config)
}
