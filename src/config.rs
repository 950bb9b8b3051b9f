//! Configuration types for taskfetch

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};

/// Sub-directory of the cache directory that receives downloaded packages
pub const DOWNLOAD_SUB_DIR_PACKAGES: &str = "packages";

/// Download behavior configuration (provider selection, directories, concurrency)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Provider backend id used for new tasks (default: "http")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Cache directory; files land in `<cache_dir>/packages` (default: "./cache")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Maximum number of tasks holding an admission slot at once (default: 3)
    #[serde(default = "default_max_downloading_tasks")]
    pub max_downloading_tasks: usize,

    /// User-Agent sent by the built-in HTTP providers
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for establishing HTTP requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Minimum interval between progress notifications, in milliseconds (default: 200)
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            cache_dir: default_cache_dir(),
            max_downloading_tasks: default_max_downloading_tasks(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

/// Main configuration for taskfetch
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Parse configuration from a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to read config file '{}': {}",
                    path.as_ref().display(),
                    e
                ),
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Reject settings the orchestrator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_downloading_tasks == 0 {
            return Err(Error::config(
                "max_downloading_tasks must be at least 1",
                "max_downloading_tasks",
            ));
        }
        if self.download.provider.trim().is_empty() {
            return Err(Error::config("provider id must not be empty", "provider"));
        }
        Ok(())
    }

    /// Directory downloaded packages are written to
    pub fn packages_dir(&self) -> PathBuf {
        self.download.cache_dir.join(DOWNLOAD_SUB_DIR_PACKAGES)
    }

    /// Minimum interval between progress notifications
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.download.progress_interval_ms)
    }
}

/// Configuration update for runtime-changeable settings
///
/// Changes apply to tasks started afterwards; running tasks keep the
/// [`TaskMeta`](crate::types::TaskMeta) they resolved at start.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    /// Provider backend id for new tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Cache directory for new tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Admission bound, read at every admission decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_downloading_tasks: Option<usize>,
}

/// Shared, live configuration
///
/// Cloning is cheap and every clone observes updates.
#[derive(Clone, Debug, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
}

impl ConfigHandle {
    /// Wrap a configuration
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> Config {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Current admission bound
    pub fn max_downloading_tasks(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .download
            .max_downloading_tasks
    }

    /// Apply an update after validating the resulting configuration
    pub fn apply(&self, update: &ConfigUpdate) -> Result<Config> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = guard.clone();
        if let Some(provider) = &update.provider {
            next.download.provider = provider.clone();
        }
        if let Some(cache_dir) = &update.cache_dir {
            next.download.cache_dir = cache_dir.clone();
        }
        if let Some(max) = update.max_downloading_tasks {
            next.download.max_downloading_tasks = max;
        }
        next.validate()?;

        *guard = next.clone();
        Ok(next)
    }
}

fn default_provider() -> String {
    "http".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_max_downloading_tasks() -> usize {
    3
}

fn default_user_agent() -> String {
    concat!("taskfetch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_progress_interval_ms() -> u64 {
    200
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
