use crate::cli::{Cli, OutputFormat};
use crate::content_model::ContentModel;
use crate::file_discovery::FileDiscovery;
use crate::queue::QueueConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "CNXML_VALIDATE_";
const MAX_SETTLE_DELAY_MS: u64 = 60_000;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub queue: QueueSettings,
    pub content_model: ContentModelConfig,
    pub output: OutputConfig,
}

/// Where modules are looked up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace roots; each is expected to contain `modules/`
    pub roots: Vec<PathBuf>,
    /// Glob patterns for module paths to leave out of the catalog
    pub exclude: Vec<String>,
    /// Directory levels below `modules/` to search (unlimited when unset)
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct QueueSettings {
    /// Delay before a drain starts, in milliseconds
    pub settle_delay_ms: u64,
}

/// Additions to the built-in CNXML content model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ContentModelConfig {
    /// Extra or replacement tag -> ID prefix entries
    pub prefixes: BTreeMap<String, String>,
    /// Tags that need IDs in addition to the ones with a prefix
    pub identifiable: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub verbose: bool,
    /// Errors only
    pub quiet: bool,
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "cnxml-validate.toml",
            "cnxml-validate.json",
            ".cnxml-validate.toml",
            ".cnxml-validate.json",
        ];

        // Check current directory first
        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("cnxml-validate");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        let var = |name: &str| env.get(&format!("{}{}", ENV_PREFIX, name));

        if let Some(roots) = var("WORKSPACE") {
            config.workspace.roots = roots
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }

        if let Some(delay) = var("SETTLE_DELAY_MS") {
            config.queue.settle_delay_ms = parse_env("SETTLE_DELAY_MS", &delay)?;
        }

        if let Some(verbose) = var("VERBOSE") {
            config.output.verbose = parse_env("VERBOSE", &verbose)?;
        }

        if let Some(quiet) = var("QUIET") {
            config.output.quiet = parse_env("QUIET", &quiet)?;
        }

        if let Some(format) = var("FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormat::Human,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid {}FORMAT value: {}",
                        ENV_PREFIX, format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if !cli.workspace.is_empty() {
            config.workspace.roots = cli.workspace.clone();
        }
        if let Some(format) = cli.output_format {
            config.output.format = format;
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-empty values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if !override_config.workspace.roots.is_empty() {
            base.workspace.roots = override_config.workspace.roots;
        }
        for pattern in override_config.workspace.exclude {
            if !base.workspace.exclude.contains(&pattern) {
                base.workspace.exclude.push(pattern);
            }
        }
        if override_config.workspace.max_depth.is_some() {
            base.workspace.max_depth = override_config.workspace.max_depth;
        }
        base.workspace.follow_symlinks = override_config.workspace.follow_symlinks;

        base.queue.settle_delay_ms = override_config.queue.settle_delay_ms;

        base.content_model
            .prefixes
            .extend(override_config.content_model.prefixes);
        for tag in override_config.content_model.identifiable {
            if !base.content_model.identifiable.contains(&tag) {
                base.content_model.identifiable.push(tag);
            }
        }

        base.output.format = override_config.output.format;
        base.output.verbose = override_config.output.verbose;
        base.output.quiet = override_config.output.quiet;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.queue.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(ConfigError::Validation(format!(
                "Settle delay cannot exceed {} ms",
                MAX_SETTLE_DELAY_MS
            )));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        Self::module_discovery(config)?;

        for (tag, prefix) in &config.content_model.prefixes {
            if tag.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Content model tags cannot be empty".to_string(),
                ));
            }
            if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
                return Err(ConfigError::Validation(format!(
                    "Invalid ID prefix for <{}>: {:?}",
                    tag, prefix
                )));
            }
        }

        if config
            .content_model
            .identifiable
            .iter()
            .any(|tag| tag.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "Content model tags cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Workspace roots, falling back to the current directory
    pub fn workspace_roots(config: &Config) -> Vec<PathBuf> {
        if config.workspace.roots.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            config.workspace.roots.clone()
        }
    }

    /// Built-in content model extended with the configured tags
    pub fn content_model(config: &Config) -> ContentModel {
        let model = config
            .content_model
            .prefixes
            .iter()
            .fold(ContentModel::default(), |model, (tag, prefix)| {
                model.with_prefix(tag, prefix)
            });
        config
            .content_model
            .identifiable
            .iter()
            .fold(model, |model, tag| model.with_identifiable(tag))
    }

    /// Module file walk configured from `[workspace]`
    pub fn module_discovery(config: &Config) -> Result<FileDiscovery> {
        let discovery = FileDiscovery::new()
            .with_exclude_patterns(config.workspace.exclude.clone())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(discovery
            .with_max_depth(config.workspace.max_depth)
            .with_follow_symlinks(config.workspace.follow_symlinks))
    }

    pub fn get_settle_delay(config: &Config) -> Duration {
        Duration::from_millis(config.queue.settle_delay_ms)
    }

    pub fn queue_config(config: &Config) -> Result<QueueConfig> {
        Ok(QueueConfig {
            settle_delay: Self::get_settle_delay(config),
            discovery: Self::module_discovery(config)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        ConfigError::Environment(format!("Invalid {}{} value: {}", ENV_PREFIX, name, value))
    })
}
