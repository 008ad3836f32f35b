//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Performs one HTTP GET against the backend through a given upstream proxy.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};
use url::Url;

use crate::config::TransportConfig;
use crate::error::{BatchError, Result};
use crate::models::{Payload, ProxyEndpoint, ProxyProtocol};

const USER_AGENT_VALUE: &str = concat!("rota-batch/", env!("CARGO_PKG_VERSION"));

/// Status and body returned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Performs a single backend request through a proxy.
///
/// Any `Err` is a transport-level failure (the proxy or the network broke
/// before a status line arrived). HTTP statuses, including errors, come back
/// as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, payload: &Payload, proxy: &ProxyEndpoint) -> Result<TransportResponse>;
}

/// HTTP/1.1 transport speaking to HTTP forward proxies and SOCKS proxies
pub struct HttpTransport {
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Backend URL for a payload, with `input` percent-encoded
    pub fn target_url(&self, payload: &Payload) -> Url {
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut().append_pair("input", payload.as_str());
        url
    }

    /// Open a TCP stream that reaches `target` through `proxy`.
    ///
    /// HTTP proxies get a plain connection (requests are sent in absolute
    /// form); SOCKS proxies get a tunnel to the target.
    async fn open_stream(&self, proxy: &ProxyEndpoint, target: &Url) -> Result<TcpStream> {
        let (target_host, target_port) = parse_target(target)?;

        match proxy.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                debug!("Connecting to HTTP proxy at {}", proxy.address());
                TcpStream::connect(proxy.address()).await.map_err(|e| {
                    BatchError::ProxyConnectionFailed(format!("TCP connect failed: {}", e))
                })
            }
            ProxyProtocol::Socks5 => {
                let target_addr = resolve(&target_host, target_port).await?;
                Self::connect_socks5(proxy, target_addr).await
            }
            ProxyProtocol::Socks5h => {
                Self::connect_socks5(proxy, (target_host.as_str(), target_port)).await
            }
            ProxyProtocol::Socks4 => {
                let target_addr = resolve_v4(&target_host, target_port).await?;
                Self::connect_socks4(proxy, target_addr).await
            }
            ProxyProtocol::Socks4a => {
                Self::connect_socks4(proxy, (target_host.as_str(), target_port)).await
            }
        }
    }

    /// Connect through SOCKS5 proxy
    async fn connect_socks5<'t, T>(proxy: &ProxyEndpoint, target: T) -> Result<TcpStream>
    where
        T: tokio_socks::IntoTargetAddr<'t>,
    {
        debug!("Connecting to SOCKS5 proxy at {}", proxy.address());
        let proxy_addr = resolve(proxy.bare_host(), proxy.port).await?;

        let stream = match (&proxy.username, &proxy.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password(proxy_addr, target, username, password).await
            }
            _ => Socks5Stream::connect(proxy_addr, target).await,
        }?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }

    /// Connect through SOCKS4/SOCKS4a proxy
    async fn connect_socks4<'t, T>(proxy: &ProxyEndpoint, target: T) -> Result<TcpStream>
    where
        T: tokio_socks::IntoTargetAddr<'t>,
    {
        debug!("Connecting to SOCKS4 proxy at {}", proxy.address());
        let proxy_addr = resolve(proxy.bare_host(), proxy.port).await?;

        let stream = match &proxy.username {
            Some(user_id) => Socks4Stream::connect_with_userid(proxy_addr, target, user_id).await,
            None => Socks4Stream::connect(proxy_addr, target).await,
        }?;

        debug!("SOCKS4 connection established");
        Ok(stream.into_inner())
    }

    /// Build the GET request for `target`
    fn build_request(proxy: &ProxyEndpoint, target: &Url) -> Result<Request<Empty<Bytes>>> {
        let (host, port) = parse_target(target)?;
        let host_header = if port == 80 {
            host
        } else {
            format!("{}:{}", host, port)
        };

        // Forward proxies want the absolute URI; tunnels want origin form.
        let uri = if proxy.protocol.is_http() {
            target.to_string()
        } else {
            match target.query() {
                Some(query) => format!("{}?{}", target.path(), query),
                None => target.path().to_string(),
            }
        };

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(HOST, host_header)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(ACCEPT, "*/*");

        // Add proxy authentication if needed
        if proxy.protocol.is_http() {
            if let Some(username) = &proxy.username {
                let password = proxy.password.as_deref().unwrap_or("");
                let credentials = format!("{}:{}", username, password);
                builder = builder.header(
                    PROXY_AUTHORIZATION,
                    format!("Basic {}", BASE64.encode(credentials.as_bytes())),
                );
            }
        }

        builder
            .body(Empty::new())
            .map_err(|e| BatchError::InvalidRequest(format!("Failed to build request: {}", e)))
    }

    async fn exchange(
        &self,
        stream: TcpStream,
        request: Request<Empty<Bytes>>,
    ) -> Result<TransportResponse> {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| BatchError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| BatchError::ProxyConnectionFailed(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                BatchError::ProxyConnectionFailed(format!("Failed to read response: {}", e))
            })?
            .to_bytes();

        // Bodies land in the sink verbatim, so undecodable bytes fail the attempt
        let body = String::from_utf8(body.to_vec())
            .map_err(|_| BatchError::Http("response body is not valid UTF-8".into()))?;

        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, payload, proxy), fields(proxy = %proxy))]
    async fn get(&self, payload: &Payload, proxy: &ProxyEndpoint) -> Result<TransportResponse> {
        let target = self.target_url(payload);
        let request = Self::build_request(proxy, &target)?;

        let stream = with_timeout(self.config.connect_timeout, self.open_stream(proxy, &target))
            .await?;

        let response =
            with_timeout(self.config.request_timeout, self.exchange(stream, request)).await?;

        debug!(status = response.status, "Backend responded");
        Ok(response)
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    timeout(limit, fut).await.map_err(|_| BatchError::Timeout)?
}

/// Parse host and port from the target URL
fn parse_target(target: &Url) -> Result<(String, u16)> {
    let host = target
        .host_str()
        .ok_or_else(|| BatchError::InvalidRequest("Missing host in URL".to_string()))?
        .to_string();
    let port = target.port_or_known_default().unwrap_or(80);
    Ok((host, port))
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            BatchError::ProxyConnectionFailed(format!("Failed to resolve {}: {}", host, e))
        })?
        .next()
        .ok_or_else(|| BatchError::ProxyConnectionFailed(format!("No address for {}", host)))
}

/// SOCKS4 only carries IPv4 targets
async fn resolve_v4(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            BatchError::ProxyConnectionFailed(format!("Failed to resolve {}: {}", host, e))
        })?
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| {
            BatchError::ProxyConnectionFailed(format!(
                "SOCKS4 requires an IPv4 target, {} has none. Use SOCKS4a or SOCKS5",
                host
            ))
        })
}
