use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level service configuration. Every field has a default, so an
/// empty JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    pub worker_count: usize,
    pub queue: QueueConfig,
    pub limits: LimitsConfig,
    /// Bearer token -> user id. Empty map means no client can
    /// authenticate; populate it before exposing the service.
    pub auth_tokens: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload_dir: default_data_dir().join("uploads"),
            output_dir: default_data_dir().join("output"),
            database_path: default_data_dir().join("apkscope.db"),
            worker_count: default_worker_count(),
            queue: QueueConfig::default(),
            limits: LimitsConfig::default(),
            auth_tokens: HashMap::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".apkscope")
        .join("data")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: crate::queue::DEFAULT_QUEUE_NAME.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 5000,
            backoff_cap_ms: 300_000,
        }
    }
}

impl RetryConfig {
    pub fn to_enqueue_options(&self) -> crate::queue::EnqueueOptions {
        crate::queue::EnqueueOptions {
            max_attempts: self.max_attempts,
            backoff_base: std::time::Duration::from_millis(self.backoff_base_ms),
            backoff_cap: std::time::Duration::from_millis(self.backoff_cap_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Request body ceiling in bytes.
    pub max_upload_bytes: usize,
    pub upload_rate: RateLimitConfig,
    pub general_rate: RateLimitConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            upload_rate: RateLimitConfig {
                max_requests: 5,
                window_secs: 900,
            },
            general_rate: RateLimitConfig {
                max_requests: 100,
                window_secs: 900,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_secs: u64,
}
