use crate::executor::JobExecutor;
use crate::oracle::{self, Verdict};
use crate::queue::JobDescriptor;
use crate::retry::{process_job, JobOutcome, JobState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    pub agent: String,
    pub benchmark: String,
    pub route_id: String,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<FailedJob>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every job in order, one at a time. A job that exhausts its budget
/// is recorded and the batch moves on.
pub fn run_jobs<E: JobExecutor + ?Sized>(jobs: &[JobDescriptor], executor: &mut E) -> RunSummary {
    let started_at = Utc::now();
    let total = jobs.len();
    let mut succeeded = 0;
    let mut skipped = 0;
    let mut failures = Vec::new();

    for (idx, job) in jobs.iter().enumerate() {
        let JobOutcome {
            state,
            skipped: was_skipped,
            ..
        } = process_job(job, executor);
        match state {
            JobState::Succeeded => {
                succeeded += 1;
                if was_skipped {
                    skipped += 1;
                }
            }
            _ => failures.push(FailedJob {
                agent: job.config.agent.clone(),
                benchmark: job.config.benchmark.clone(),
                route_id: job.route_id.clone(),
                seed: job.seed,
            }),
        }
        info!(
            done = idx + 1,
            total,
            failed = failures.len(),
            "[{}/{}] routes processed",
            idx + 1,
            total
        );
    }

    RunSummary {
        total,
        succeeded,
        skipped,
        failures,
        started_at,
        finished_at: Utc::now(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub agent: String,
    pub benchmark: String,
    pub route_id: String,
    pub seed: u64,
    pub result_file: String,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Completion verdict of every job, without running anything.
pub fn queue_status(jobs: &[JobDescriptor]) -> Vec<JobStatus> {
    jobs.iter()
        .map(|job| JobStatus {
            agent: job.config.agent.clone(),
            benchmark: job.config.benchmark.clone(),
            route_id: job.route_id.clone(),
            seed: job.seed,
            result_file: job.paths.result_file.display().to_string(),
            verdict: oracle::inspect(&job.paths.result_file),
        })
        .collect()
}
