use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BatchError, Result};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks4a => "socks4a",
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Socks5h => "socks5h",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks4a" => Some(ProxyProtocol::Socks4a),
            "socks5" => Some(ProxyProtocol::Socks5),
            "socks5h" => Some(ProxyProtocol::Socks5h),
            _ => None,
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }

    /// Port assumed when the proxy line carries none
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyProtocol::Http => 80,
            ProxyProtocol::Https => 443,
            _ => 1080,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One outbound proxy as read from the proxy source.
///
/// Accepted forms are `host:port`, `user:pass@host:port` and
/// `scheme://[user[:pass]@]host[:port]`. Lines without a scheme are HTTP
/// proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parse a proxy identifier
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BatchError::InvalidProxyAddress(
                "empty proxy address".to_string(),
            ));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        let url = Url::parse(&candidate)
            .map_err(|e| BatchError::InvalidProxyAddress(format!("{}: {}", trimmed, e)))?;

        let protocol = ProxyProtocol::from_str(url.scheme())
            .ok_or_else(|| BatchError::UnsupportedProtocol(url.scheme().to_string()))?;

        // Reject URLs that carry request-specific components.
        if url.fragment().is_some() || url.query().is_some() {
            return Err(BatchError::InvalidProxyAddress(format!(
                "{}: must not include query/fragment",
                trimmed
            )));
        }
        if !(url.path().is_empty() || url.path() == "/") {
            return Err(BatchError::InvalidProxyAddress(format!(
                "{}: must not include a path",
                trimmed
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                BatchError::InvalidProxyAddress(format!("{}: must include a host", trimmed))
            })?
            .to_string();

        let port = url.port().unwrap_or_else(|| protocol.default_port());

        let username = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };
        let password = url.password().map(|p| p.to_string());

        Ok(Self {
            protocol,
            host,
            port,
            username,
            password,
        })
    }

    /// `host:port` used to dial the proxy
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Host without IPv6 brackets, as SOCKS libraries expect it
    pub fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// Credentials never reach logs.
impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address())
    }
}

impl std::str::FromStr for ProxyEndpoint {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
