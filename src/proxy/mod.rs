//! Outbound proxy handling
//!
//! This module provides:
//! - The proxy ring and per-payload starting offsets
//! - HTTP and SOCKS transports for backend requests
//! - Per-proxy usage counters

pub mod ring;
pub mod transport;
pub mod usage;

pub use ring::{OffsetStrategy, ProxyRing};
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use usage::{ProxyUsage, UsageCounts};
