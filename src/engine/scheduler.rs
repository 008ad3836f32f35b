//! Concurrency-bounded batch scheduler
//!
//! Runs one executor per payload with at most `concurrency_limit` in flight,
//! appends successes to the result sink and collects every outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::executor::RequestExecutor;
use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::models::{Failure, FailureReason, Payload, RequestOutcome};
use crate::proxy::{OffsetStrategy, UsageCounts};
use crate::sink::ResultSink;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum executors in flight
    pub concurrency_limit: usize,
    /// Starting ring position per payload
    pub offset: OffsetStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 30,
            offset: OffsetStrategy::Head,
        }
    }
}

impl From<&BatchConfig> for SchedulerConfig {
    fn from(config: &BatchConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency,
            offset: config.proxy_offset,
        }
    }
}

/// Terminal outcome of one payload, tagged with its input position
#[derive(Debug, Clone, Serialize)]
pub struct PayloadResult {
    pub index: usize,
    pub payload: Payload,
    pub outcome: RequestOutcome,
}

/// Counters for one ring slot
#[derive(Debug, Clone, Serialize)]
pub struct ProxyUsageEntry {
    pub slot: usize,
    /// Credential-masked proxy label
    pub proxy: String,
    #[serde(flatten)]
    pub counts: UsageCounts,
}

/// Summary of a scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per payload, in input order
    pub results: Vec<PayloadResult>,
    /// Per-slot counters for this run, sorted by slot
    pub proxy_usage: Vec<ProxyUsageEntry>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn cancelled(&self) -> usize {
        self.failures()
            .filter(|(_, f)| f.reason == FailureReason::Cancelled)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PayloadResult, &Failure)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.failure().map(|f| (r, f)))
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Fans payloads out over request executors
pub struct Scheduler {
    executor: Arc<RequestExecutor>,
    sink: Arc<dyn ResultSink>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        executor: Arc<RequestExecutor>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if config.concurrency_limit == 0 {
            return Err(BatchError::InvalidConfig(
                "concurrency limit must be at least 1".into(),
            ));
        }

        Ok(Self {
            executor,
            sink,
            config,
        })
    }

    /// Run every payload to completion
    pub async fn run(&self, payloads: Vec<Payload>) -> RunReport {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run_until(payloads, shutdown_rx).await
    }

    /// Run every payload to completion, or until `shutdown` flips to `true`.
    ///
    /// Payloads still waiting or between attempts when shutdown arrives end
    /// as `Cancelled`; appends already under way finish first.
    ///
    /// Usage counters are reset when a run starts, so runs sharing an
    /// executor must not overlap.
    pub async fn run_until(
        &self,
        payloads: Vec<Payload>,
        shutdown: watch::Receiver<bool>,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch_run", %run_id, payloads = payloads.len());
        self.drive(run_id, payloads, shutdown).instrument(span).await
    }

    async fn drive(
        &self,
        run_id: Uuid,
        payloads: Vec<Payload>,
        shutdown: watch::Receiver<bool>,
    ) -> RunReport {
        let started_at = Utc::now();
        let ring = self.executor.ring();
        let ring_len = ring.len();
        self.executor.usage().clear();

        info!(
            "Starting batch of {} payloads across {} proxies (concurrency {}, offset {})",
            payloads.len(),
            ring_len,
            self.config.concurrency_limit,
            self.config.offset
        );

        let stream = futures::stream::iter(payloads.into_iter().enumerate());
        let mut results: Vec<PayloadResult> = stream
            .map(|(index, payload)| {
                let shutdown = shutdown.clone();
                async move {
                    let offset = self.config.offset.offset(index, ring_len);
                    let outcome = self
                        .executor
                        .execute_until(&payload, offset, Some(shutdown))
                        .await;
                    let outcome = self.settle(&payload, outcome).await;
                    PayloadResult {
                        index,
                        payload,
                        outcome,
                    }
                }
            })
            .buffer_unordered(self.config.concurrency_limit)
            .collect()
            .await;

        results.sort_by_key(|r| r.index);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
            proxy_usage: self
                .executor
                .usage()
                .snapshot()
                .into_iter()
                .map(|(slot, counts)| ProxyUsageEntry {
                    slot,
                    proxy: ring.select(slot).to_string(),
                    counts,
                })
                .collect(),
        };

        info!(
            "Batch complete: {} succeeded, {} failed of {} in {}ms",
            report.succeeded(),
            report.failed(),
            report.total(),
            report.elapsed().num_milliseconds()
        );

        report
    }

    /// Write a success to the sink and report failures
    async fn settle(&self, payload: &Payload, outcome: RequestOutcome) -> RequestOutcome {
        let (body, attempts, proxy) = match outcome {
            RequestOutcome::Success {
                body,
                attempts,
                proxy,
            } => (body, attempts, proxy),
            RequestOutcome::Failure(failure) => {
                report_failure(payload, &failure);
                return RequestOutcome::Failure(failure);
            }
        };

        match self.sink.append(payload, &body).await {
            Ok(()) => {
                info!(payload = %payload, proxy = %proxy, attempts, "Result recorded");
                RequestOutcome::Success {
                    body,
                    attempts,
                    proxy,
                }
            }
            Err(e) => {
                let failure = Failure {
                    reason: FailureReason::SinkWrite,
                    attempts,
                    last_proxy: Some(proxy),
                    last_error: Some(e.to_string()),
                };
                report_failure(payload, &failure);
                RequestOutcome::Failure(failure)
            }
        }
    }
}

fn report_failure(payload: &Payload, failure: &Failure) {
    if failure.reason == FailureReason::Cancelled {
        warn!(payload = %payload, attempts = failure.attempts, "Request cancelled");
    } else {
        error!(
            payload = %payload,
            reason = failure.reason.as_str(),
            attempts = failure.attempts,
            last_proxy = ?failure.last_proxy,
            "Request failed: {}",
            failure
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ExecutorConfig;
    use crate::engine::testing::{proxies, BatchTransport, ScriptedTransport};
    use crate::proxy::Transport;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    fn executor(transport: Arc<dyn Transport>, proxy_count: usize) -> Arc<RequestExecutor> {
        Arc::new(
            RequestExecutor::new(
                transport,
                proxies(proxy_count),
                ExecutorConfig {
                    max_retries: 3,
                    retry_delay: Duration::from_secs(5),
                },
            )
            .unwrap(),
        )
    }

    fn payloads(count: usize) -> Vec<Payload> {
        (0..count)
            .map(|i| Payload::new(format!("item-{}", i)).unwrap())
            .collect()
    }

    fn scheduler(
        executor: Arc<RequestExecutor>,
        sink: Arc<dyn ResultSink>,
        concurrency_limit: usize,
    ) -> Scheduler {
        Scheduler::new(
            executor,
            sink,
            SchedulerConfig {
                concurrency_limit,
                offset: OffsetStrategy::Head,
            },
        )
        .unwrap()
    }

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn append(&self, _payload: &Payload, _body: &str) -> Result<()> {
            Err(BatchError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    #[test]
    fn test_scheduler_rejects_zero_concurrency() {
        let transport = Arc::new(BatchTransport::new(Duration::ZERO));
        let result = Scheduler::new(
            executor(transport, 1),
            Arc::new(MemorySink::new()),
            SchedulerConfig {
                concurrency_limit: 0,
                offset: OffsetStrategy::Head,
            },
        );
        assert!(matches!(result, Err(BatchError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_outcome_per_payload() {
        let transport = Arc::new(
            BatchTransport::new(Duration::from_millis(20))
                .with_status("item-3", 404)
                .with_status("item-7", 503),
        );
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport, 3), sink.clone(), 4);

        let report = scheduler.run(payloads(10)).await;

        assert_eq!(report.total(), 10);
        let indexes: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, (0..10).collect::<Vec<_>>());
        for result in &report.results {
            assert_eq!(result.payload.as_str(), format!("item-{}", result.index));
        }

        assert_eq!(report.succeeded(), 8);
        assert_eq!(report.failed(), 2);
        assert!(!report.is_success());

        let failures: Vec<(&str, FailureReason)> = report
            .failures()
            .map(|(r, f)| (r.payload.as_str(), f.reason))
            .collect();
        assert_eq!(
            failures,
            vec![
                ("item-3", FailureReason::UnexpectedStatus { status: 404 }),
                ("item-7", FailureReason::RetriesExhausted),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_gets_each_success_once() {
        let transport =
            Arc::new(BatchTransport::new(Duration::from_millis(5)).with_status("item-2", 0));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport, 2), sink.clone(), 3);

        let report = scheduler.run(payloads(6)).await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 5);
        let unique: HashSet<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(unique.len(), 5);
        assert!(!unique.contains("item-2"));
        for (payload, body) in &entries {
            assert_eq!(body, &format!("body of {}", payload));
        }
        for result in &report.results {
            if let Some(body) = result.outcome.body() {
                assert_eq!(body, format!("body of {}", result.payload));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_is_respected() {
        let transport = Arc::new(BatchTransport::new(Duration::from_millis(50)));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport.clone(), 5), sink, 7);

        let report = scheduler.run(payloads(100)).await;

        assert!(report.is_success());
        assert_eq!(transport.call_count(), 100);
        assert!(transport.max_in_flight() <= 7);
        assert_eq!(transport.max_in_flight(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_cancel_siblings() {
        let transport = Arc::new(
            BatchTransport::new(Duration::from_millis(1))
                .with_status("item-0", 500)
                .with_status("item-1", 0),
        );
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport.clone(), 2), sink.clone(), 2);

        let report = scheduler.run(payloads(4)).await;

        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(sink.len(), 2);
        // 1 fatal attempt + 3 exhausted attempts + 2 successes
        assert_eq!(transport.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_error_becomes_failure() {
        let transport = Arc::new(BatchTransport::new(Duration::ZERO));
        let scheduler = scheduler(executor(transport, 1), Arc::new(FailingSink), 2);

        let report = scheduler.run(payloads(2)).await;

        assert_eq!(report.failed(), 2);
        let (_, failure) = report.failures().next().unwrap();
        assert_eq!(failure.reason, FailureReason::SinkWrite);
        assert_eq!(failure.attempts, 1);
        assert!(failure.last_error.as_deref().unwrap().contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggered_offsets_spread_first_attempts() {
        let transport = Arc::new(ScriptedTransport::always_status(200));
        let scheduler = Scheduler::new(
            executor(transport.clone(), 3),
            Arc::new(MemorySink::new()),
            SchedulerConfig {
                concurrency_limit: 1,
                offset: OffsetStrategy::Staggered,
            },
        )
        .unwrap();

        scheduler.run(payloads(4)).await;
        assert_eq!(
            transport.calls(),
            vec![
                "http://127.0.0.1:9000",
                "http://127.0.0.1:9001",
                "http://127.0.0.1:9002",
                "http://127.0.0.1:9000",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_offset_starts_every_payload_at_first_proxy() {
        let transport = Arc::new(ScriptedTransport::always_status(200));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport.clone(), 3), sink, 2);

        let report = scheduler.run(payloads(3)).await;
        assert!(transport.calls().iter().all(|p| p == "http://127.0.0.1:9000"));

        let usage = &report.proxy_usage;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].slot, 0);
        assert_eq!(usage[0].proxy, "http://127.0.0.1:9000");
        assert_eq!(usage[0].counts.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_is_per_run() {
        let transport = Arc::new(ScriptedTransport::always_status(200));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport, 2), sink, 2);

        scheduler.run(payloads(4)).await;
        let report = scheduler.run(payloads(2)).await;

        assert_eq!(report.proxy_usage.len(), 1);
        assert_eq!(report.proxy_usage[0].counts.attempts, 2);
        assert_eq!(report.proxy_usage[0].counts.successes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_without_new_attempts() {
        let transport = Arc::new(ScriptedTransport::always_status(503));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport.clone(), 2), sink, 2);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run_until(payloads(5), rx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let report = handle.await.unwrap();
        assert_eq!(report.total(), 5);
        assert_eq!(report.cancelled(), 5);
        // Only the first two payloads got a slot before shutdown
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let transport = Arc::new(BatchTransport::new(Duration::ZERO));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(executor(transport.clone(), 1), sink, 2);

        let report = scheduler.run(Vec::new()).await;
        assert_eq!(report.total(), 0);
        assert!(report.is_success());
        assert_eq!(transport.call_count(), 0);
    }
}
