use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{BatchError, Result};
use crate::proxy::OffsetStrategy;
use crate::sink::SinkFormat;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Scheduler and retry configuration
    pub batch: BatchConfig,
    /// Backend endpoint and timeouts
    pub transport: TransportConfig,
    /// Result sink configuration
    pub sink: SinkConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum executors in flight (default: 30)
    pub concurrency: usize,
    /// Attempts per payload (default: 5)
    pub max_retries: u32,
    /// Delay between attempts (default: 5s)
    pub retry_delay: Duration,
    /// Initial proxy offset per payload (default: head)
    pub proxy_offset: OffsetStrategy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 30,
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            proxy_offset: OffsetStrategy::Head,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Backend URL; each payload is appended as the `input` query parameter
    pub endpoint: Url,
    /// Timeout for reaching the proxy and opening the tunnel
    pub connect_timeout: Duration,
    /// Timeout for the request/response exchange
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SinkConfig {
    /// Line format for the results file (plain, jsonl)
    pub format: SinkFormat,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/data";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let concurrency: usize = get_env_or("BATCH_CONCURRENCY", "30").parse().map_err(|_| {
            BatchError::InvalidConfig("BATCH_CONCURRENCY must be a valid number".into())
        })?;
        if concurrency == 0 {
            return Err(BatchError::InvalidConfig(
                "BATCH_CONCURRENCY must be at least 1".into(),
            ));
        }

        let max_retries: u32 = get_env_or("BATCH_MAX_RETRIES", "5").parse().map_err(|_| {
            BatchError::InvalidConfig("BATCH_MAX_RETRIES must be a valid number".into())
        })?;
        if max_retries == 0 {
            return Err(BatchError::InvalidConfig(
                "BATCH_MAX_RETRIES must be at least 1".into(),
            ));
        }

        let retry_delay_ms: u64 = get_env_or("BATCH_RETRY_DELAY_MS", "5000")
            .parse()
            .map_err(|_| {
                BatchError::InvalidConfig("BATCH_RETRY_DELAY_MS must be a valid number".into())
            })?;

        let offset_raw = get_env_or("BATCH_PROXY_OFFSET", "head");
        let proxy_offset = OffsetStrategy::from_str(&offset_raw).ok_or_else(|| {
            BatchError::InvalidConfig(format!(
                "BATCH_PROXY_OFFSET must be head, staggered or random, got {}",
                offset_raw
            ))
        })?;

        let sink_raw = get_env_or("BATCH_SINK_FORMAT", "plain");
        let sink_format = SinkFormat::from_str(&sink_raw).ok_or_else(|| {
            BatchError::InvalidConfig(format!(
                "BATCH_SINK_FORMAT must be plain or jsonl, got {}",
                sink_raw
            ))
        })?;

        Ok(Config {
            batch: BatchConfig {
                concurrency,
                max_retries,
                retry_delay: Duration::from_millis(retry_delay_ms),
                proxy_offset,
            },
            transport: TransportConfig {
                endpoint: parse_endpoint(&get_env_or("BATCH_ENDPOINT", DEFAULT_ENDPOINT))?,
                connect_timeout: parse_timeout("BATCH_CONNECT_TIMEOUT", "10")?,
                request_timeout: parse_timeout("BATCH_REQUEST_TIMEOUT", "30")?,
            },
            sink: SinkConfig {
                format: sink_format,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        BatchError::InvalidConfig(format!("BATCH_ENDPOINT must be a valid URL: {}", e))
    })?;

    if url.scheme() != "http" {
        return Err(BatchError::InvalidConfig(format!(
            "BATCH_ENDPOINT has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(BatchError::InvalidConfig(
            "BATCH_ENDPOINT must include a host".into(),
        ));
    }
    if url.fragment().is_some() {
        return Err(BatchError::InvalidConfig(
            "BATCH_ENDPOINT must not include a fragment".into(),
        ));
    }

    Ok(url)
}

/// Timeout in whole seconds; zero would fail every attempt
fn parse_timeout(key: &str, default: &str) -> Result<Duration> {
    let secs: u64 = get_env_or(key, default)
        .parse()
        .map_err(|_| BatchError::InvalidConfig(format!("{} must be a valid number", key)))?;
    if secs == 0 {
        return Err(BatchError::InvalidConfig(format!(
            "{} must be at least 1",
            key
        )));
    }
    Ok(Duration::from_secs(secs))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
