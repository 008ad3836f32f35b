use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ResultSink, SinkFormat};
use crate::error::{BatchError, Result};
use crate::models::Payload;

/// Appends records to a file opened in append mode.
///
/// Each record is encoded up front and written with a single `write_all`
/// under the lock, then flushed.
pub struct FileSink {
    path: PathBuf,
    format: SinkFormat,
    file: Mutex<File>,
}

impl FileSink {
    /// Open (or create) `path` for appending
    pub async fn open(path: impl AsRef<Path>, format: SinkFormat) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                BatchError::InvalidConfig(format!(
                    "cannot open output file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        debug!("Appending results to {} ({})", path.display(), format);
        Ok(Self {
            path,
            format,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SinkFormat {
        self.format
    }
}

#[async_trait]
impl ResultSink for FileSink {
    async fn append(&self, payload: &Payload, body: &str) -> Result<()> {
        let line = self.format.encode(payload, body)?;

        let mut file = self.file.lock().await;
        let start = file.metadata().await?.len();
        if let Err(e) = write_record(&mut file, line.as_bytes()).await {
            rollback(&file, start, &self.path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn write_record(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

/// Drop whatever part of a failed record reached the file
async fn rollback(file: &File, len: u64, path: &Path) {
    if let Err(e) = file.set_len(len).await {
        warn!(
            "Failed to remove partial record from {}: {}",
            path.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::decode_plain_line;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_file_sink_appends_to_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "earlier run\n").unwrap();

        let sink = FileSink::open(&path, SinkFormat::Plain).await.unwrap();
        sink.append(&Payload::new("abc").unwrap(), "multi\nline")
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "earlier run\nabc multi\\nline\n");
        assert_eq!(sink.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_file_sink_concurrent_appends_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        let sink = Arc::new(FileSink::open(&path, SinkFormat::Plain).await.unwrap());

        let body = "x".repeat(4096);
        let mut handles = Vec::new();
        for i in 0..50 {
            let sink = sink.clone();
            let body = format!("{}\n{}", i, body);
            handles.push(tokio::spawn(async move {
                let payload = Payload::new(format!("item-{}", i)).unwrap();
                sink.append(&payload, &body).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let mut seen: Vec<String> = content
            .lines()
            .map(|line| {
                let (payload, body) = decode_plain_line(line).unwrap();
                let index = payload.trim_start_matches("item-");
                assert!(body.starts_with(&format!("{}\n", index)));
                assert_eq!(body.len(), index.len() + 1 + 4096);
                payload
            })
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_file_sink_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.jsonl");
        let sink = FileSink::open(&path, SinkFormat::JsonLines).await.unwrap();
        assert_eq!(sink.format(), SinkFormat::JsonLines);

        sink.append(&Payload::new("abc").unwrap(), "{\"v\":1}")
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
        assert_eq!(value["input"], "abc");
        assert_eq!(value["body"], "{\"v\":1}");
    }

    #[tokio::test]
    async fn test_rollback_removes_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        let sink = FileSink::open(&path, SinkFormat::Plain).await.unwrap();
        sink.append(&Payload::new("first").unwrap(), "one")
            .await
            .unwrap();

        {
            let mut file = sink.file.lock().await;
            let start = file.metadata().await.unwrap().len();
            file.write_all(b"second half-writ").await.unwrap();
            file.flush().await.unwrap();
            rollback(&file, start, sink.path()).await;
        }

        sink.append(&Payload::new("third").unwrap(), "three")
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first one\nthird three\n");
    }

    #[tokio::test]
    async fn test_failed_write_is_reported() {
        // /dev/full rejects every write with ENOSPC
        let device = Path::new("/dev/full");
        if !device.exists() {
            return;
        }

        let Ok(sink) = FileSink::open(device, SinkFormat::Plain).await else {
            return;
        };
        let err = sink
            .append(&Payload::new("abc").unwrap(), "body")
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Io(_)));
    }

    #[tokio::test]
    async fn test_file_sink_open_failure_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("output.txt");

        let err = FileSink::open(&path, SinkFormat::Plain).await.err().unwrap();
        assert!(err.is_config_error());
    }
}
