/*!
 * Kernel Configuration
 * Environment-driven settings with builder-style overrides
 */

use super::errors::KernelError;
use super::types::KernelResult;
use std::path::PathBuf;
use std::time::Duration;

/// Default backing store root when `KERNEL_STORAGE_PATH` is unset
pub const DEFAULT_STORAGE_PATH: &str = "/tmp/overlay-kernel-root";

/// Mount table file name placed under the storage root by default
pub const DEFAULT_MOUNT_TABLE_NAME: &str = ".mounttab";

/// Default time a lookup waits for a translator to self-register
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time shutdown waits for each process to deregister
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Kernel configuration
///
/// Environment variables:
/// - KERNEL_STORAGE_PATH: backing store root directory
/// - KERNEL_MOUNT_TABLE: persisted translator mount table
/// - KERNEL_ACTIVATION_TIMEOUT_MS: translator start timeout
/// - KERNEL_SHUTDOWN_GRACE_MS: per-process shutdown wait
/// - KERNEL_TRACE_JSON: JSON log output
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub storage_path: PathBuf,
    /// `None` keeps the mount table in memory only
    pub mount_table_path: Option<PathBuf>,
    pub activation_timeout: Duration,
    pub shutdown_grace: Duration,
    pub trace_json: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let storage_path = PathBuf::from(DEFAULT_STORAGE_PATH);
        Self {
            mount_table_path: Some(storage_path.join(DEFAULT_MOUNT_TABLE_NAME)),
            storage_path,
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            trace_json: false,
        }
    }
}

impl KernelConfig {
    /// Build configuration from `KERNEL_*` environment variables
    pub fn from_env() -> KernelResult<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("KERNEL_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
            config.mount_table_path = Some(config.storage_path.join(DEFAULT_MOUNT_TABLE_NAME));
        }

        if let Ok(path) = std::env::var("KERNEL_MOUNT_TABLE") {
            config.mount_table_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(ms) = Self::millis_var("KERNEL_ACTIVATION_TIMEOUT_MS")? {
            config.activation_timeout = ms;
        }

        if let Some(ms) = Self::millis_var("KERNEL_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace = ms;
        }

        config.trace_json = std::env::var("KERNEL_TRACE_JSON")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

        Ok(config)
    }

    fn millis_var(name: &str) -> KernelResult<Option<Duration>> {
        match std::env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(|ms| Some(Duration::from_millis(ms)))
                .map_err(|e| KernelError::Configuration(format!("{}={}: {}", name, raw, e))),
            Err(_) => Ok(None),
        }
    }

    pub fn with_storage_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_mount_table(mut self, path: Option<PathBuf>) -> Self {
        self.mount_table_path = path;
        self
    }

    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
