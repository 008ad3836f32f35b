//! Result sinks
//!
//! Successful outcomes are appended as `(payload, body)` records. Appends
//! from concurrent executors never interleave.

mod file;
mod format;

pub use file::FileSink;
pub use format::{decode_plain_line, SinkFormat};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::Payload;

/// Append-only destination for successful results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Append one record; either the whole record lands or an error returns
    async fn append(&self, payload: &Payload, body: &str) -> Result<()>;
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(Payload, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Payload, String)> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append(&self, payload: &Payload, body: &str) -> Result<()> {
        self.entries.lock().push((payload.clone(), body.to_string()));
        Ok(())
    }
}
