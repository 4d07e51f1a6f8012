use crate::config::types::{
    Config, JobConfig, OrchestratorConfig, OutputConfig, PipelineConfig, RetryConfig,
    SourceConfig,
};
use crate::ConfigError;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_orchestrator_config(&config.orchestrator)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    validate_jobs(&config.jobs)?;
    Ok(())
}

fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.pool_size < 1 {
        return Err(ConfigError::Validation(format!(
            "pool_size must be >= 1, got {}",
            config.pool_size
        )));
    }
    Ok(())
}

/// Validates worker pool sizes and queue parameters
pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    for (name, workers) in [
        ("process_workers", config.process_workers),
        ("download_workers", config.download_workers),
        ("storage_workers", config.storage_workers),
    ] {
        if workers < 1 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 1, got {}",
                name, workers
            )));
        }
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "queue_capacity must be >= 1, got {}",
            config.queue_capacity
        )));
    }

    if config.poll_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "poll_timeout_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry/backoff parameters
pub fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.tries < 1 {
        return Err(ConfigError::Validation(format!(
            "tries must be >= 1, got {}",
            config.tries
        )));
    }

    if !config.backoff.is_finite() || config.backoff < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff must be a finite value >= 1.0, got {}",
            config.backoff
        )));
    }

    if config.max_delay_ms < config.initial_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay_ms ({}) must be >= initial_delay_ms ({})",
            config.max_delay_ms, config.initial_delay_ms
        )));
    }

    if config.initial_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "initial_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_timeout_secs < config.initial_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "max_timeout_secs ({}) must be >= initial_timeout_secs ({})",
            config.max_timeout_secs, config.initial_timeout_secs
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.storage_dir.is_empty() {
        return Err(ConfigError::Validation(
            "storage_dir cannot be empty".to_string(),
        ));
    }

    if config.seen_db.is_empty() {
        return Err(ConfigError::Validation("seen_db cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_jobs(jobs: &[JobConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for job in jobs {
        validate_job_name(&job.name)?;
        if !names.insert(job.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate job name '{}'",
                job.name
            )));
        }
        validate_job(job)?;
    }
    Ok(())
}

/// Job names become directory names, so they stay filesystem-safe
fn validate_job_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation("job name cannot be empty".to_string()));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "job name must contain only ASCII alphanumerics, '-' or '_', got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_job(job: &JobConfig) -> Result<(), ConfigError> {
    if job.limit == Some(0) {
        return Err(ConfigError::Validation(format!(
            "job '{}': limit must be positive",
            job.name
        )));
    }

    if job.categories.iter().any(|c| c.is_empty()) {
        return Err(ConfigError::Validation(format!(
            "job '{}': categories cannot contain empty entries",
            job.name
        )));
    }

    if job.poll_interval_secs == Some(0) {
        return Err(ConfigError::Validation(format!(
            "job '{}': poll_interval_secs must be positive",
            job.name
        )));
    }

    Regex::new(job.source.pattern()).map_err(|e| {
        ConfigError::InvalidPattern(format!("job '{}': {}", job.name, e))
    })?;

    match &job.source {
        SourceConfig::SinglePageHtml { url, selector, .. } => {
            validate_url(&job.name, url)?;
            validate_selector(&job.name, selector)?;
        }
        SourceConfig::PaginatedHtml {
            url_template,
            selector,
            max_pages,
            ..
        } => {
            if !url_template.contains("{page}") {
                return Err(ConfigError::Validation(format!(
                    "job '{}': url_template must contain '{{page}}'",
                    job.name
                )));
            }
            validate_url(&job.name, &url_template.replace("{page}", "1"))?;
            validate_selector(&job.name, selector)?;
            if *max_pages < 1 {
                return Err(ConfigError::Validation(format!(
                    "job '{}': max_pages must be >= 1",
                    job.name
                )));
            }
        }
        SourceConfig::FtpListing {
            host, directory, ..
        } => {
            if host.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "job '{}': ftp host cannot be empty",
                    job.name
                )));
            }
            if !directory.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "job '{}': ftp directory must be absolute, got '{}'",
                    job.name, directory
                )));
            }
        }
    }

    Ok(())
}

fn validate_url(job: &str, url: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(url)
        .map_err(|e| ConfigError::InvalidUrl(format!("job '{}': '{}': {}", job, url, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "job '{}': '{}' must use http or https",
            job, url
        )));
    }

    Ok(())
}

fn validate_selector(job: &str, selector: &str) -> Result<(), ConfigError> {
    scraper::Selector::parse(selector).map_err(|_| {
        ConfigError::InvalidPattern(format!("job '{}': invalid selector '{}'", job, selector))
    })?;
    Ok(())
}
