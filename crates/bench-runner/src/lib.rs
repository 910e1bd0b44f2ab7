//! Sequential, resumable runner for leaderboard route evaluations.
//!
//! Each run-file configuration is expanded into one job per seed and route.
//! Jobs whose result file already reports a clean, finished evaluation are
//! skipped; the rest are launched through the external evaluator and retried
//! up to the configured budget.

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod queue;
pub mod retry;
pub mod routes;

pub use config::{load_run_file, resolve_config, JobConfig, RawJobConfig};
pub use driver::{queue_status, run_jobs, FailedJob, JobStatus, RunSummary};
pub use error::ConfigError;
pub use executor::{JobExecutor, LocalEvaluator};
pub use oracle::{RerunReason, Verdict, FAILURE_STATUSES};
pub use queue::{build_job_queue, JobDescriptor, JobPaths};
pub use retry::{process_job, JobOutcome, JobState, RetryController};
pub use routes::{discover_routes, RouteDescriptor};
