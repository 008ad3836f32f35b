use thiserror::Error;

/// Unified error type for rota-batch
#[derive(Error, Debug)]
pub enum BatchError {
    // Proxy errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Input errors
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for rota-batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

impl BatchError {
    /// Configuration errors abort the whole run before any request is made.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BatchError::NoProxiesAvailable
                | BatchError::InvalidProxyAddress(_)
                | BatchError::UnsupportedProtocol(_)
                | BatchError::InvalidPayload(_)
                | BatchError::InvalidConfig(_)
        )
    }

    /// Process exit code for an error that escapes the run
    pub fn exit_code(&self) -> u8 {
        if self.is_config_error() {
            2
        } else {
            1
        }
    }
}

// Convert from tokio-socks errors
impl From<tokio_socks::Error> for BatchError {
    fn from(err: tokio_socks::Error) -> Self {
        BatchError::ProxyConnectionFailed(format!("SOCKS connect failed: {}", err))
    }
}
