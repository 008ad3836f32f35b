//! Round-robin proxy ring
//!
//! The ring is fixed for the lifetime of a run. Selection is a pure function
//! of the caller's cursor, so every executor rotates independently.

use rand::Rng;

use crate::error::{BatchError, Result};
use crate::models::ProxyEndpoint;

/// Ordered, cyclic, never-empty list of proxies
#[derive(Debug, Clone)]
pub struct ProxyRing {
    proxies: Vec<ProxyEndpoint>,
}

impl ProxyRing {
    /// Build a ring; an empty proxy list is a configuration error
    pub fn new(proxies: Vec<ProxyEndpoint>) -> Result<Self> {
        if proxies.is_empty() {
            return Err(BatchError::NoProxiesAvailable);
        }
        Ok(Self { proxies })
    }

    /// Ring position a cursor lands on
    pub fn slot(&self, cursor: usize) -> usize {
        cursor % self.proxies.len()
    }

    /// `proxies[cursor mod len]`
    pub fn select(&self, cursor: usize) -> &ProxyEndpoint {
        &self.proxies[self.slot(cursor)]
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Always false; kept for the `len` convention
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

/// Where each payload's first attempt lands on the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetStrategy {
    /// Every payload starts at the ring head
    #[default]
    Head,
    /// Payload `i` starts at proxy `i mod len`
    Staggered,
    /// Uniformly random starting proxy
    Random,
}

impl OffsetStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "head" | "fixed" => Some(Self::Head),
            "staggered" | "stagger" | "round_robin" | "round-robin" => Some(Self::Staggered),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Staggered => "staggered",
            Self::Random => "random",
        }
    }

    /// Initial cursor for the payload at `index` on a ring of `len` proxies
    pub fn offset(&self, index: usize, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        match self {
            Self::Head => 0,
            Self::Staggered => index % len,
            Self::Random => rand::thread_rng().gen_range(0..len),
        }
    }
}

impl std::fmt::Display for OffsetStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
