//! Rota Batch - proxied batch request runner
//!
//! Sends one backend GET per input payload through a ring of outbound
//! proxies and appends successful bodies to a results file.
//!
//! ## Features
//!
//! - Bounded concurrency across the whole batch
//! - Round-robin proxy rotation with per-payload retry budgets
//! - 503 and transport failures retried, other statuses fatal per payload
//! - HTTP, HTTPS, SOCKS4, SOCKS4a, SOCKS5 and SOCKS5h proxy support
//! - Append-only results file safe under concurrent writers
//! - Cooperative shutdown on Ctrl+C / SIGTERM

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod proxy;
pub mod sink;
pub mod source;

pub use config::Config;
pub use engine::{RequestExecutor, RunReport, Scheduler};
pub use error::{BatchError, Result};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use url::Url;

    use super::*;
    use crate::config::TransportConfig;
    use crate::engine::{ExecutorConfig, SchedulerConfig};
    use crate::models::{FailureReason, Payload};
    use crate::proxy::{HttpTransport, OffsetStrategy};
    use crate::sink::{decode_plain_line, FileSink, SinkFormat};

    /// Forward proxy that answers itself: `busy` gets 503, anything else 200
    async fn spawn_backend_proxy() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer(socket));
            }
        });

        addr
    }

    async fn answer(mut socket: TcpStream) {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }

        let head = String::from_utf8_lossy(&head);
        let target = head.split_whitespace().nth(1).unwrap_or_default();
        let input = Url::parse(target)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == "input")
                    .map(|(_, v)| v.into_owned())
            })
            .unwrap_or_default();

        let response = if input == "busy" {
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        } else {
            let body = format!("result for {}", input);
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        };

        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_through_http_proxies_into_file() {
        let first = spawn_backend_proxy().await;
        let second = spawn_backend_proxy().await;
        let list = format!("{}\n# spare\n{}\n", first, second);
        let proxies = source::parse_proxies(&list).unwrap();

        let transport = Arc::new(HttpTransport::new(TransportConfig {
            endpoint: Url::parse("http://backend.test:3000/api/data").unwrap(),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        }));
        let executor = RequestExecutor::new(
            transport,
            proxies,
            ExecutorConfig {
                max_retries: 2,
                retry_delay: Duration::from_millis(10),
            },
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("results.txt");
        let sink = FileSink::open(&output, SinkFormat::Plain).await.unwrap();

        let scheduler = Scheduler::new(
            Arc::new(executor),
            Arc::new(sink),
            SchedulerConfig {
                concurrency_limit: 3,
                offset: OffsetStrategy::Staggered,
            },
        )
        .unwrap();

        let payloads = source::parse_payloads("alpha\nbusy\nhello world\nomega\n");
        let report = scheduler.run(payloads).await;

        assert_eq!(report.total(), 4);
        assert_eq!(report.succeeded(), 3);
        let (failed, failure) = report.failures().next().unwrap();
        assert_eq!(failed.payload, Payload::new("busy").unwrap());
        assert_eq!(failure.reason, FailureReason::RetriesExhausted);
        assert_eq!(failure.attempts, 2);

        let written = std::fs::read_to_string(&output).unwrap();
        let mut records: Vec<(String, String)> =
            written.lines().filter_map(decode_plain_line).collect();
        records.sort();
        assert_eq!(
            records,
            vec![
                ("alpha".to_string(), "result for alpha".to_string()),
                ("hello world".to_string(), "result for hello world".to_string()),
                ("omega".to_string(), "result for omega".to_string()),
            ]
        );
    }
}
