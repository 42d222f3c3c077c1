use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Engine configuration.
///
/// # Configuration Locations
///
/// Loaded from, in increasing order of precedence:
/// 1. Global `$CONFIG_DIR/logsearch/config.yaml`
/// 2. Local `.logsearch.yaml` in the current directory
/// 3. A file given explicitly (the CLI's `--config` flag)
///
/// # Configuration Format
///
/// ```yaml
/// # Worker threads used to scan files (default: CPU cores)
/// thread_count: 4
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
///
/// # How to treat invalid UTF-8 (lossy, failfast)
/// encoding: "lossy"
///
/// # Files at least this large are memory mapped
/// mmap_threshold: 10485760
/// ```
///
/// Every field has a default, so an empty or missing file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of worker threads in the scan pool
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Handling of invalid UTF-8 in scanned files
    #[serde(default)]
    pub encoding: EncodingMode,

    /// Size in bytes from which files are memory mapped instead of streamed
    #[serde(default = "default_mmap_threshold")]
    pub mmap_threshold: u64,
}

/// How the scanner decodes lines that are not valid UTF-8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Replace invalid sequences with U+FFFD and keep scanning
    #[default]
    Lossy,
    /// Stop scanning the file at the first invalid line
    FailFast,
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_mmap_threshold() -> u64 {
    10 * 1024 * 1024
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            log_level: default_log_level(),
            encoding: EncodingMode::default(),
            mmap_threshold: default_mmap_threshold(),
        }
    }
}

impl SearchConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from the default locations plus `config_path`.
    ///
    /// An explicit path that does not exist is an error; the default
    /// locations are skipped when absent.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            dirs::config_dir().map(|p| p.join("logsearch/config.yaml")),
            Some(PathBuf::from(".logsearch.yaml")),
        ];

        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Overlays values given on the command line
    pub fn merge_with_cli(
        mut self,
        thread_count: Option<NonZeroUsize>,
        log_level: Option<String>,
        encoding: Option<EncodingMode>,
    ) -> Self {
        if let Some(threads) = thread_count {
            self.thread_count = threads;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        if let Some(encoding) = encoding {
            self.encoding = encoding;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
            thread_count: 4
            log_level: "debug"
            encoding: "failfast"
            mmap_threshold: 1024
        "#,
        )
        .unwrap();

        let config = SearchConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.thread_count, NonZeroUsize::new(4).unwrap());
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.encoding, EncodingMode::FailFast);
        assert_eq!(config.mmap_threshold, 1024);
    }

    #[test]
    fn test_default_values() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        fs::write(&config_path, "log_level: \"info\"\n").unwrap();

        let config = SearchConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.thread_count, default_thread_count());
        assert_eq!(config.encoding, EncodingMode::Lossy);
        assert_eq!(config.mmap_threshold, 10 * 1024 * 1024);
    }

    #[test]
    fn test_merge_with_cli() {
        let config = SearchConfig::default();

        let merged = config.clone().merge_with_cli(
            NonZeroUsize::new(2),
            Some("trace".to_string()),
            Some(EncodingMode::FailFast),
        );
        assert_eq!(merged.thread_count, NonZeroUsize::new(2).unwrap());
        assert_eq!(merged.log_level, "trace");
        assert_eq!(merged.encoding, EncodingMode::FailFast);

        let untouched = config.clone().merge_with_cli(None, None, None);
        assert_eq!(untouched, config);
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
            thread_count: "invalid"
            encoding: "utf-16"
        "#,
        )
        .unwrap();

        let result = SearchConfig::load_from(Some(&config_path));
        assert!(result.is_err(), "Expected error loading invalid config");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = SearchConfig::load_from(Some(Path::new("nonexistent.yaml")));
        assert!(result.is_err());
    }
}
