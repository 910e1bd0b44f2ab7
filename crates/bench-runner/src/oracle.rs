//! Decides from a job's result file whether the job still has to run.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Record statuses the evaluator writes for a route that did not finish cleanly.
pub const FAILURE_STATUSES: &[&str] = &[
    "Failed",
    "Failed - Agent couldn't be set up",
    "Failed - Simulation crashed",
    "Failed - Agent crashed",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RerunReason {
    Missing,
    Unparsable,
    NoProgress,
    MalformedProgress,
    Incomplete { completed: f64, total: f64 },
    FailedRecord { status: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Complete,
    NeedsRerun(RerunReason),
}

impl Verdict {
    pub fn is_complete(&self) -> bool {
        matches!(self, Verdict::Complete)
    }
}

pub fn is_failure_status(status: &str) -> bool {
    FAILURE_STATUSES.contains(&status)
}

/// Reads `result_file` and classifies it. Never fails and has no side effects.
pub fn inspect(result_file: &Path) -> Verdict {
    let bytes = match fs::read(result_file) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Verdict::NeedsRerun(RerunReason::Missing)
        }
        Err(_) => return Verdict::NeedsRerun(RerunReason::Unparsable),
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => classify(&value),
        Err(_) => Verdict::NeedsRerun(RerunReason::Unparsable),
    }
}

pub fn needs_rerun(result_file: &Path) -> bool {
    !inspect(result_file).is_complete()
}

fn classify(evaluation: &Value) -> Verdict {
    let Some(checkpoint) = evaluation.get("_checkpoint") else {
        return Verdict::NeedsRerun(RerunReason::NoProgress);
    };
    let Some(progress) = checkpoint.get("progress") else {
        return Verdict::NeedsRerun(RerunReason::NoProgress);
    };
    let Some(progress) = progress.as_array() else {
        return Verdict::NeedsRerun(RerunReason::MalformedProgress);
    };
    if progress.len() < 2 {
        return Verdict::NeedsRerun(RerunReason::MalformedProgress);
    }
    let (Some(completed), Some(total)) = (progress[0].as_f64(), progress[1].as_f64()) else {
        return Verdict::NeedsRerun(RerunReason::MalformedProgress);
    };
    if completed < total {
        return Verdict::NeedsRerun(RerunReason::Incomplete { completed, total });
    }

    let records = checkpoint
        .get("records")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    for record in records {
        if let Some(status) = record.get("status").and_then(|s| s.as_str()) {
            if is_failure_status(status) {
                return Verdict::NeedsRerun(RerunReason::FailedRecord {
                    status: status.to_string(),
                });
            }
        }
    }
    Verdict::Complete
}
