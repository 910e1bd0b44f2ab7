//! Per-job retry state machine.
//!
//! `Pending -> Running -> {Succeeded, Retrying, Exhausted}`, with `Retrying`
//! looping back to the completion check. Success is judged by the result
//! file, never by the exit code alone.

use crate::executor::JobExecutor;
use crate::oracle;
use crate::queue::JobDescriptor;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Exhausted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Exhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub route_id: String,
    pub seed: u64,
    pub state: JobState,
    /// Executor invocations made for this job.
    pub attempts: u32,
    /// True when the job was already complete and never executed.
    pub skipped: bool,
}

/// State of one job while the controller drives it.
#[derive(Debug)]
pub struct RetryController<'a> {
    job: &'a JobDescriptor,
    state: JobState,
    remaining_tries: u32,
    attempts: u32,
}

impl<'a> RetryController<'a> {
    pub fn new(job: &'a JobDescriptor) -> Self {
        Self {
            job,
            state: JobState::Pending,
            remaining_tries: job.tries(),
            attempts: 0,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn remaining_tries(&self) -> u32 {
        self.remaining_tries
    }

    /// Performs one transition and returns the new state.
    pub fn step<E: JobExecutor + ?Sized>(&mut self, executor: &mut E) -> JobState {
        let job = self.job;
        let next = match self.state {
            JobState::Pending | JobState::Retrying => {
                if oracle::inspect(&job.paths.result_file).is_complete() {
                    info!(route_id = %job.route_id, seed = job.seed, "[SKIP] already completed");
                    JobState::Succeeded
                } else if self.remaining_tries == 0 {
                    JobState::Exhausted
                } else {
                    JobState::Running
                }
            }
            JobState::Running => {
                self.attempts += 1;
                info!(
                    route_id = %job.route_id,
                    seed = job.seed,
                    attempt = self.attempts,
                    "[RUN ] launching evaluator"
                );
                let exited_ok = match executor.execute(job) {
                    Ok(ok) => ok,
                    Err(err) => {
                        let error = format!("{:#}", err);
                        warn!(
                            route_id = %job.route_id,
                            seed = job.seed,
                            error = %error,
                            "attempt could not run"
                        );
                        false
                    }
                };
                self.remaining_tries -= 1;

                if exited_ok && oracle::inspect(&job.paths.result_file).is_complete() {
                    info!(
                        route_id = %job.route_id,
                        seed = job.seed,
                        "[DONE] finished successfully"
                    );
                    JobState::Succeeded
                } else if self.remaining_tries > 0 {
                    info!(
                        route_id = %job.route_id,
                        seed = job.seed,
                        remaining_tries = self.remaining_tries,
                        "[RETRY] retrying"
                    );
                    JobState::Retrying
                } else {
                    JobState::Exhausted
                }
            }
            terminal => terminal,
        };
        if next == JobState::Exhausted && self.state != JobState::Exhausted {
            warn!(route_id = %job.route_id, seed = job.seed, "[FAIL] exhausted all retries");
        }
        self.state = next;
        next
    }

    /// Drives the job to a terminal state.
    pub fn run<E: JobExecutor + ?Sized>(mut self, executor: &mut E) -> JobOutcome {
        while !self.step(executor).is_terminal() {}
        JobOutcome {
            route_id: self.job.route_id.clone(),
            seed: self.job.seed,
            state: self.state,
            attempts: self.attempts,
            skipped: self.state == JobState::Succeeded && self.attempts == 0,
        }
    }
}

pub fn process_job<E: JobExecutor + ?Sized>(job: &JobDescriptor, executor: &mut E) -> JobOutcome {
    RetryController::new(job).run(executor)
}
