//! Request execution engine
//!
//! - `state`: the pure retry/rotation state machine
//! - `executor`: drives one payload through the proxy ring
//! - `scheduler`: bounded fan-out over a batch of payloads

pub mod executor;
pub mod scheduler;
pub mod state;

pub use executor::{ExecutorConfig, RequestExecutor};
pub use scheduler::{PayloadResult, ProxyUsageEntry, RunReport, Scheduler, SchedulerConfig};
pub use state::{classify, RetryCause, RetryState, Step, Verdict};
