use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SbxError, SbxResult};

/// Top-level suite configuration (loaded from shardbox.toml).
///
/// The whole struct is a plain value: it is parsed once at startup and
/// injected into the pipeline constructor, never stored in process-wide
/// state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SbxConfig {
    pub storage: StorageConfig,
    pub pipeline: PipelineSection,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind: "fs", "s3" or "memory"
    pub backend: String,
    /// Root directory for the "fs" backend
    pub root: PathBuf,
    /// S3 endpoint (any S3-compatible store)
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket (also the key prefix for fs/memory backends)
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Plaintext bytes per chunk
    pub chunk_size: usize,
    /// PBKDF2 iteration count (minimum 10000)
    pub iterations: u32,
    /// Worker count for the upload/download pool (0 = cpu count)
    pub workers: usize,
    /// Pending-task queue capacity
    pub queue_size: usize,
    /// Retry budget for transient backend errors
    pub max_retries: u32,
    /// Overall deadline for one pipeline run, in seconds
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Opaque bearer token attached to every backend request
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/shardbox/blobs"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "shardbox".into(),
            enforce_tls: false,
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            iterations: 10_000,
            workers: 0,
            queue_size: 64,
            max_retries: 3,
            deadline_secs: 300,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SbxConfig {
    /// Parse a TOML configuration file.
    pub fn load(path: &Path) -> SbxResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| SbxError::InvalidArgument(format!("config {}: {e}", path.display())))
    }

    /// Parse the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> SbxResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
