//! Payload and proxy sources
//!
//! Both sources are plain text, one entry per line. Lines are trimmed and
//! blank lines skipped; the proxy list also skips `#` comments.

use std::path::Path;

use tracing::debug;

use crate::error::{BatchError, Result};
use crate::models::{Payload, ProxyEndpoint};

pub fn parse_payloads(text: &str) -> Vec<Payload> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| Payload::new(line).ok())
        .collect()
}

pub fn parse_proxies(text: &str) -> Result<Vec<ProxyEndpoint>> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            ProxyEndpoint::parse(line)
                .map_err(|e| BatchError::InvalidConfig(format!("proxy list line {}: {}", n, e)))
        })
        .collect()
}

pub async fn load_payloads(path: &Path) -> Result<Vec<Payload>> {
    let text = read_source(path, "input").await?;
    let payloads = parse_payloads(&text);
    debug!("Read {} payloads from {}", payloads.len(), path.display());
    Ok(payloads)
}

pub async fn load_proxies(path: &Path) -> Result<Vec<ProxyEndpoint>> {
    let text = read_source(path, "proxies").await?;
    let proxies = parse_proxies(&text)?;
    debug!("Read {} proxies from {}", proxies.len(), path.display());
    Ok(proxies)
}

async fn read_source(path: &Path, what: &str) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        BatchError::InvalidConfig(format!(
            "cannot read {} file {}: {}",
            what,
            path.display(),
            e
        ))
    })
}
