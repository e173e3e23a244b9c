//! Configuration structures for the status cache.
//!
//! - [`CacheConfig`] - Cache policy (lifetimes, crawler threads, policy flags)
//! - [`WatchConfig`] - File watcher settings (debouncing, recursion)
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`] and deserialize with
//! `#[serde(default)]`, so a config file only needs the fields it overrides.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default lifetime of a cached status entry: ten minutes.
pub const DEFAULT_ENTRY_TTL_MS: u64 = 10 * 60 * 1000;

/// Configuration for the status cache.
///
/// # Examples
///
/// ```
/// use wcs_core::CacheConfig;
///
/// let config = CacheConfig::default();
/// assert_eq!(config.admin_dir_name, ".git");
/// assert!(!config.unversioned_as_modified);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Propagate status across nested working-copy boundaries.
    pub recurse_submodules: bool,

    /// Count unversioned files as modified when computing a directory's
    /// most important file status.
    pub unversioned_as_modified: bool,

    /// How long a cached entry stays trustworthy, in milliseconds.
    pub entry_ttl_ms: u64,

    /// Number of background crawler threads.
    pub crawler_threads: usize,

    /// Name of the version-control administrative directory.
    pub admin_dir_name: String,

    /// Where the cache is persisted between runs, if anywhere.
    pub cache_file: Option<Utf8PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recurse_submodules: false,
            unversioned_as_modified: false,
            entry_ttl_ms: DEFAULT_ENTRY_TTL_MS,
            crawler_threads: 2,
            admin_dir_name: ".git".to_owned(),
            cache_file: None,
        }
    }
}

impl CacheConfig {
    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for a zero lifetime, zero
    /// crawler threads or an empty admin directory name.
    /// A cache file that names a directory is [`ConfigError::InvalidPath`];
    /// one whose parent does not exist is [`ConfigError::MissingDirectory`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_ttl_ms == 0 {
            return Err(ConfigError::invalid_option("entry_ttl_ms", "must be positive"));
        }
        if self.crawler_threads == 0 {
            return Err(ConfigError::invalid_option(
                "crawler_threads",
                "at least one crawler thread is required",
            ));
        }
        if self.admin_dir_name.is_empty() || self.admin_dir_name.contains('/') {
            return Err(ConfigError::invalid_option(
                "admin_dir_name",
                "must be a single non-empty path component",
            ));
        }
        if let Some(cache_file) = &self.cache_file {
            if cache_file.is_dir() {
                return Err(ConfigError::invalid_path(cache_file, "is a directory"));
            }
            match cache_file.parent() {
                Some(parent) if !parent.as_str().is_empty() && !parent.is_dir() => {
                    return Err(ConfigError::MissingDirectory(parent.to_owned()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Configuration for the file watcher.
///
/// # Examples
///
/// ```
/// use wcs_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.debounce_ms, 100);
/// assert!(config.recursive);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Whether file watching is enabled at all.
    pub enabled: bool,

    /// Debounce window in milliseconds.
    ///
    /// Multiple file changes within this window are batched into a single event.
    pub debounce_ms: u64,

    /// Whether to watch subdirectories recursively.
    pub recursive: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
            recursive: true,
        }
    }
}

/// Root configuration.
///
/// # Examples
///
/// ```
/// use wcs_core::Config;
///
/// let config = Config::default();
/// let json = serde_json::to_string_pretty(&config).unwrap();
/// assert!(json.contains("entry_ttl_ms"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache configuration.
    pub cache: CacheConfig,

    /// File watcher configuration.
    pub watch: WatchConfig,
}

impl Config {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON for this schema, or
    /// [`ConfigError::InvalidOption`] if a value fails validation.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_std_path())?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON configuration string.
    ///
    /// # Errors
    ///
    /// See [`from_file`](Self::from_file).
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.cache.validate()?;
        Ok(config)
    }
}
