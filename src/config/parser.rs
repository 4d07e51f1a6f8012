use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Jobs: {}", config.jobs.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so a worker process can be matched to the exact
/// configuration its parent loaded.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LaunchMode, SourceConfig};
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = r#"
[orchestrator]
pool-size = 2
poll-interval-secs = 60
mode = "in-process"

[pipeline]
download-workers = 3
queue-capacity = 16

[retry]
tries = 4
backoff = 1.5

[output]
storage-dir = "./data"
seen-db = "./seen.db"

[[job]]
name = "gfs"
limit = 10
categories = ["grib2", "idx"]
single-pass = true
target-date = "2026-10-19"
lock-group = "ncep"

[job.source]
kind = "single-page-html"
url = "https://example.com/gfs/"
pattern = '\.(grib2|idx)$'

[[job]]
name = "archive"
enabled = false

[job.source]
kind = "ftp-listing"
host = "ftp.example.com"
directory = "/pub/data"
pattern = '^data_.*\.gz$'
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.orchestrator.pool_size, 2);
        assert_eq!(config.orchestrator.mode, LaunchMode::InProcess);
        assert_eq!(config.pipeline.download_workers, 3);
        assert_eq!(config.pipeline.storage_workers, 1);
        assert_eq!(config.retry.tries, 4);
        assert_eq!(config.jobs.len(), 2);

        let gfs = config.job("gfs").unwrap();
        assert_eq!(gfs.limit, Some(10));
        assert!(gfs.single_pass);
        assert_eq!(
            gfs.target_date,
            Some(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())
        );
        assert_eq!(gfs.source.kind(), "single-page-html");

        let archive = config.job("archive").unwrap();
        match &archive.source {
            SourceConfig::FtpListing { port, username, .. } => {
                assert_eq!(*port, 21);
                assert_eq!(username, "anonymous");
            }
            other => panic!("unexpected source {:?}", other),
        }

        let enabled: Vec<_> = config.enabled_jobs().map(|j| j.name.as_str()).collect();
        assert_eq!(enabled, vec!["gfs"]);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let content = VALID.replace("limit = 10", "limit = 0");
        let result = parse_config(&content);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");
        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);

        let other = create_temp_config("other content");
        assert_ne!(hash1, compute_config_hash(other.path()).unwrap());
    }
}
