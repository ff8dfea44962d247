// Configuration file and environment loading

use crate::config::CsrfConfig;
use crate::error::{ConfigError, ConfigResult};
use std::env;
use std::fs;
use std::path::Path;

/// Prefix of environment variables that override file values.
pub const DEFAULT_ENV_PREFIX: &str = "CSRFGUARD";

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }

    /// Detect the format from a file path
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::Load("No file extension found".to_string()))?;

        Self::from_extension(ext)
            .ok_or_else(|| ConfigError::Load(format!("Unsupported format: {}", ext)))
    }
}

/// Loads a [`CsrfConfig`] from a file and the environment.
///
/// Values are layered: defaults, then the file, then environment variables
/// named `<PREFIX>_<FIELD>` (for example `CSRFGUARD_TOKEN_LENGTH=64`). List
/// fields take comma-separated values. The result is validated before it is
/// returned.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
        }
    }

    /// Change or disable (`None`) environment overrides
    pub fn with_env_prefix(mut self, prefix: Option<String>) -> Self {
        self.env_prefix = prefix;
        self
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>) -> ConfigResult<CsrfConfig> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("Failed to read {}: {}", path.display(), e)))?;

        self.load_str(&content, format)
    }

    /// Parse `content`, apply environment overrides and validate
    pub fn load_str(&self, content: &str, format: FileFormat) -> ConfigResult<CsrfConfig> {
        let config = Self::parse(content, format)?;
        self.finish(config, env::vars())
    }

    /// Load defaults overridden by the environment only
    pub fn load_env(&self) -> ConfigResult<CsrfConfig> {
        self.finish(CsrfConfig::default(), env::vars())
    }

    /// Parse configuration from string
    pub fn parse(content: &str, format: FileFormat) -> ConfigResult<CsrfConfig> {
        match format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("JSON parse error: {}", e))),
            FileFormat::Toml => toml::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e))),
        }
    }

    /// Apply overrides from `vars` and validate.
    pub fn finish<I>(&self, mut config: CsrfConfig, vars: I) -> ConfigResult<CsrfConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if let Some(prefix) = &self.env_prefix {
            let prefix = format!("{}_", prefix);
            for (key, value) in vars {
                if let Some(field) = key.strip_prefix(&prefix) {
                    apply_override(&mut config, &field.to_ascii_lowercase(), &value)?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_override(config: &mut CsrfConfig, field: &str, value: &str) -> ConfigResult<()> {
    match field {
        "token_name" => config.token_name = value.to_string(),
        "header_name" => config.header_name = value.to_string(),
        "token_length" => {
            config.token_length = value.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "token_length",
                message: format!("{:?} is not a number", value),
            })?
        }
        "rotate" => config.rotate = parse_bool("rotate", value)?,
        "token_per_page" => config.token_per_page = parse_bool("token_per_page", value)?,
        "token_per_page_precreate" => {
            config.token_per_page_precreate = parse_bool("token_per_page_precreate", value)?
        }
        "validate_when_no_session_exists" => {
            config.validate_when_no_session_exists =
                parse_bool("validate_when_no_session_exists", value)?
        }
        "protect_all" => config.protect_all = parse_bool("protect_all", value)?,
        "protected_pages" => config.protected_pages = parse_list(value),
        "unprotected_pages" => config.unprotected_pages = parse_list(value),
        "protected_methods" => config.protected_methods = parse_list(value),
        "unprotected_methods" => config.unprotected_methods = parse_list(value),
        "unprotected_extensions" => config.unprotected_extensions = parse_list(value),
        "session_key" => config.session_key = value.to_string(),
        "page_tokens_key" => config.page_tokens_key = value.to_string(),
        "prng" => config.prng = value.to_string(),
        "context_path" => config.context_path = value.to_string(),
        "reload_interval_secs" => {
            config.reload_interval_secs =
                Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                    field: "reload_interval_secs",
                    message: format!("{:?} is not a number", value),
                })?)
        }
        // Unrelated variables sharing the prefix are ignored
        _ => {}
    }
    Ok(())
}

fn parse_bool(field: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field,
            message: format!("{:?} is not a boolean", value),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
