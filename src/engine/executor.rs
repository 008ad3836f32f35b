//! Request executor with retry logic
//!
//! Drives one payload through the proxy ring until it succeeds, hits a fatal
//! status, runs out of attempts or is cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::state::{classify, RetryState, Step, Verdict};
use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::models::{AttemptRecord, Failure, FailureReason, Payload, ProxyEndpoint, RequestOutcome};
use crate::proxy::{ProxyRing, ProxyUsage, Transport};

/// Configuration for the request executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of attempts per payload
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl From<&BatchConfig> for ExecutorConfig {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }
}

/// Runs the retry/rotation state machine for single payloads
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    ring: ProxyRing,
    config: ExecutorConfig,
    usage: Arc<ProxyUsage>,
}

impl RequestExecutor {
    /// Fails fast on an empty proxy list or a zero attempt budget
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Vec<ProxyEndpoint>,
        config: ExecutorConfig,
    ) -> Result<Self> {
        if config.max_retries == 0 {
            return Err(BatchError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }

        Ok(Self {
            transport,
            ring: ProxyRing::new(proxies)?,
            config,
            usage: Arc::new(ProxyUsage::new()),
        })
    }

    pub fn ring(&self) -> &ProxyRing {
        &self.ring
    }

    /// Per-proxy counters accumulated by every call to this executor
    pub fn usage(&self) -> &Arc<ProxyUsage> {
        &self.usage
    }

    /// Drive `payload` to its terminal outcome, starting at ring position
    /// `initial_offset`
    pub async fn execute(&self, payload: &Payload, initial_offset: usize) -> RequestOutcome {
        self.execute_until(payload, initial_offset, None).await
    }

    /// Like [`execute`](Self::execute), but stops before the next attempt
    /// once `shutdown` flips to `true`
    #[instrument(skip(self, payload, shutdown), fields(payload = %payload))]
    pub async fn execute_until(
        &self,
        payload: &Payload,
        initial_offset: usize,
        mut shutdown: Option<watch::Receiver<bool>>,
    ) -> RequestOutcome {
        let max_retries = self.config.max_retries;
        let mut state = RetryState::starting_at(initial_offset);
        let mut last_proxy: Option<String> = None;
        let mut last_error: Option<String> = None;

        loop {
            if is_cancelled(&shutdown) {
                return cancelled(state.attempt, last_proxy, last_error);
            }

            let slot = self.ring.slot(state.cursor);
            let proxy = self.ring.select(state.cursor);
            let proxy_label = proxy.to_string();

            debug!(
                "Requesting through proxy {} (attempt {}/{})",
                proxy_label,
                state.attempt + 1,
                max_retries
            );

            self.usage.acquire(slot);
            let attempt_start = Instant::now();
            let result = self.transport.get(payload, proxy).await;

            let record = AttemptRecord {
                payload: payload.to_string(),
                proxy_address: proxy_label.clone(),
                attempt: state.attempt,
                status_code: result.as_ref().ok().map(|r| r.status),
                error_message: result.as_ref().err().map(|e| e.to_string()),
                response_time: attempt_start.elapsed().as_millis() as u64,
                timestamp: chrono::Utc::now(),
            };
            self.usage.release(slot, record.is_success());
            debug!(
                proxy = %record.proxy_address,
                attempt = record.attempt,
                status = ?record.status_code,
                error = ?record.error_message,
                response_time_ms = record.response_time,
                "Attempt finished"
            );

            let verdict = classify(result);
            last_error = match &verdict {
                Verdict::Success(_) => None,
                Verdict::Retry(cause) => Some(cause.to_string()),
                Verdict::Fatal { status } => Some(format!("unexpected status code {}", status)),
            };
            last_proxy = Some(proxy_label);

            match state.transition(verdict, max_retries) {
                Step::Succeed { body, attempts } => {
                    info!(
                        "Request succeeded through {} after {} attempt(s)",
                        record.proxy_address, attempts
                    );
                    return RequestOutcome::Success {
                        body,
                        attempts,
                        proxy: record.proxy_address,
                    };
                }
                Step::Fail { reason, attempts } => {
                    return RequestOutcome::Failure(Failure {
                        reason,
                        attempts,
                        last_proxy,
                        last_error,
                    });
                }
                Step::Retry { next, cause } => {
                    warn!(
                        "Proxy {} failed: {}, retrying with next proxy (attempt {}/{})",
                        record.proxy_address,
                        cause,
                        next.attempt + 1,
                        max_retries
                    );
                    state = next;

                    if self.pause(&mut shutdown).await {
                        return cancelled(state.attempt, last_proxy, last_error);
                    }
                }
            }
        }
    }

    /// Sleep `retry_delay`; returns `true` if shutdown arrived first
    async fn pause(&self, shutdown: &mut Option<watch::Receiver<bool>>) -> bool {
        let delay = tokio::time::sleep(self.config.retry_delay);
        match shutdown {
            Some(rx) => tokio::select! {
                _ = delay => false,
                _ = wait_for_shutdown(rx) => true,
            },
            None => {
                delay.await;
                false
            }
        }
    }
}

fn is_cancelled(shutdown: &Option<watch::Receiver<bool>>) -> bool {
    shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Resolves once the flag is set; never resolves if the sender is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn cancelled(
    attempts: u32,
    last_proxy: Option<String>,
    last_error: Option<String>,
) -> RequestOutcome {
    RequestOutcome::Failure(Failure {
        reason: FailureReason::Cancelled,
        attempts,
        last_proxy,
        last_error,
    })
}
