use super::types::Config;
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })?;

    config.storage.path = expand_tilde(&config.storage.path);

    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap.get(1).unwrap().as_str().to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let var_list = unexpanded_vars.join(", ");
    Err(ConfigError::Validation(format!(
        "Environment variables are not set: {}\n\
         \n\
         To fix this, either:\n\
         1. Set the environment variables (e.g., export TRACESHIP_TOKEN=...)\n\
         2. Replace the variables in the config file with actual values",
        var_list
    )))
}

/// Validates the parsed config, collecting every failure.
///
/// A missing identity, bucket alias, or key prefix is fatal at startup by
/// design: the engine must never run half-configured and sync into the wrong
/// place.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.remote.endpoint.trim().is_empty() {
        errors.push("remote.endpoint must not be empty".to_string());
    } else if !config.remote.endpoint.starts_with("http://")
        && !config.remote.endpoint.starts_with("https://")
    {
        errors.push(format!(
            "remote.endpoint must be an http(s) URL, got '{}'",
            config.remote.endpoint
        ));
    }

    if config.remote.token.trim().is_empty() {
        errors.push("remote.token must not be empty".to_string());
    }

    if config.sync.bucket_alias.trim().is_empty() {
        errors.push("sync.bucket_alias must not be empty".to_string());
    }

    if config.sync.key_prefix.trim().is_empty() {
        errors.push("sync.key_prefix must not be empty".to_string());
    }

    if config.sync.key_prefix.contains(char::is_whitespace) {
        errors.push("sync.key_prefix must not contain whitespace".to_string());
    }

    if config.sync.record_type.trim().is_empty() {
        errors.push("sync.record_type must not be empty".to_string());
    }

    if config.sync.batch_size_kb == 0 {
        errors.push("sync.batch_size_kb must be greater than zero".to_string());
    }

    if config.sync.fetch_limit == 0 {
        errors.push("sync.fetch_limit must be greater than zero".to_string());
    }

    if config.sync.interval < std::time::Duration::from_secs(1) {
        errors.push("sync.interval must be at least 1s".to_string());
    }

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
