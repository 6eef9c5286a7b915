//! Config loading: JSON file, programmatic validation, environment
//! overrides.
//!
//! Environment variables take precedence over the file so deployments
//! can tweak a single knob without shipping a new config:
//! `APKSCOPE_PORT`, `APKSCOPE_UPLOAD_DIR`, `APKSCOPE_OUTPUT_DIR`,
//! `APKSCOPE_DATABASE_PATH`, `APKSCOPE_WORKER_COUNT`.

use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(port) = env_var("APKSCOPE_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
            name: "APKSCOPE_PORT".to_string(),
            reason: format!("'{}' is not a valid port", port),
        })?;
    }
    if let Some(dir) = env_var("APKSCOPE_UPLOAD_DIR") {
        config.upload_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_var("APKSCOPE_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(path) = env_var("APKSCOPE_DATABASE_PATH") {
        config.database_path = PathBuf::from(path);
    }
    if let Some(count) = env_var("APKSCOPE_WORKER_COUNT") {
        config.worker_count = count.parse().map_err(|_| ConfigError::InvalidEnv {
            name: "APKSCOPE_WORKER_COUNT".to_string(),
            reason: format!("'{}' is not a valid worker count", count),
        })?;
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.queue.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "queue.retry.max_attempts must be at least 1".to_string(),
        });
    }

    if config.limits.max_upload_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "limits.max_upload_bytes must be positive".to_string(),
        });
    }
    for (label, rate) in [
        ("limits.upload_rate", &config.limits.upload_rate),
        ("limits.general_rate", &config.limits.general_rate),
    ] {
        if rate.max_requests == 0 || rate.window_secs == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must have positive max_requests and window_secs", label),
            });
        }
    }

    for (token, user) in &config.auth_tokens {
        if token.is_empty() || user.is_empty() {
            return Err(ConfigError::Validation {
                message: "auth_tokens entries must have non-empty token and user".to_string(),
            });
        }
    }

    Ok(())
}
