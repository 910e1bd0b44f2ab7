//! Launching the external leaderboard evaluator for one job.

use crate::config::JobConfig;
use crate::queue::{ensure_dir, JobDescriptor};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

pub const PYTHONPATH: &str = "PYTHONPATH";

pub type Environment = BTreeMap<OsString, OsString>;

/// Runs one attempt of a job. `Ok(true)` means the process exited zero; it
/// says nothing about whether the result file is complete.
pub trait JobExecutor {
    fn execute(&mut self, job: &JobDescriptor) -> Result<bool>;
}

/// Runs the evaluator as a blocking child process on this machine.
#[derive(Debug, Default)]
pub struct LocalEvaluator {
    base_env: Option<Environment>,
}

impl LocalEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `base_env` instead of the inherited process environment.
    pub fn with_base_env(base_env: Environment) -> Self {
        Self {
            base_env: Some(base_env),
        }
    }
}

impl JobExecutor for LocalEvaluator {
    fn execute(&mut self, job: &JobDescriptor) -> Result<bool> {
        reset_dir(&job.paths.viz_dir)?;

        let base = match &self.base_env {
            Some(env) => env.clone(),
            None => std::env::vars_os().collect(),
        };
        let env = evaluator_environment(&base, &job.config, &job.paths.viz_dir)?;
        let command = evaluator_command(job);

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]);
        cmd.current_dir(&job.config.repo_root);
        cmd.env_clear();
        cmd.envs(&env);
        let status =
            run_process_with_job_logs(cmd, &command, &job.paths.out_log, &job.paths.err_log)?;
        tracing::debug!(
            route_id = %job.route_id,
            seed = job.seed,
            status = %status,
            "evaluator exited"
        );
        Ok(status.success())
    }
}

/// Layers the simulator and leaderboard variables over `base` and prepends
/// the CARLA API and repository roots to `PYTHONPATH`.
pub fn evaluator_environment(
    base: &Environment,
    config: &JobConfig,
    save_path: &Path,
) -> Result<Environment> {
    let leaderboard_root = config.leaderboard_root();
    let scenario_runner_root = config.scenario_runner_root();

    let mut env = base.clone();
    env.insert("CARLA_ROOT".into(), config.carla_root.clone().into());
    env.insert(
        "SCENARIO_RUNNER_ROOT".into(),
        scenario_runner_root.clone().into(),
    );
    env.insert("LEADERBOARD_ROOT".into(), leaderboard_root.clone().into());
    env.insert("SAVE_PATH".into(), save_path.to_path_buf().into());

    let carla_api = config.carla_root.join("PythonAPI").join("carla");
    let search_path: [PathBuf; 5] = [
        carla_api.clone(),
        carla_api.join("dist").join(&config.carla_egg),
        config.repo_root.clone(),
        leaderboard_root,
        scenario_runner_root,
    ];
    let mut joined = std::env::join_paths(&search_path)
        .context("evaluator search path contains a separator character")?;
    if let Some(existing) = base.get(&OsString::from(PYTHONPATH)) {
        if !existing.is_empty() {
            joined.push(path_list_separator());
            joined.push(existing);
        }
    }
    env.insert(PYTHONPATH.into(), joined);
    Ok(env)
}

/// Full evaluator command line, interpreter first.
pub fn evaluator_command(job: &JobDescriptor) -> Vec<String> {
    let config = &job.config;
    vec![
        config.python.clone(),
        "-u".to_string(),
        config.evaluator_entry().display().to_string(),
        format!("--routes={}", job.route.path.display()),
        "--repetitions=1".to_string(),
        "--track=SENSORS".to_string(),
        format!("--checkpoint={}", job.paths.result_file.display()),
        format!("--timeout={}", config.timeout),
        format!("--agent={}", config.agent_file.display()),
        format!("--agent-config={}", config.checkpoint.display()),
        format!("--traffic-manager-seed={}", job.seed),
        format!("--port={}", config.carla_port),
        format!("--traffic-manager-port={}", config.carla_tm_port),
    ]
}

fn path_list_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}

/// Removes whatever an earlier attempt left in `dir` and recreates it empty.
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("failed to clear {}", dir.display()))?;
    }
    ensure_dir(dir)
}

fn run_process_with_job_logs(
    mut cmd: Command,
    command: &[String],
    out_log: &Path,
    err_log: &Path,
) -> Result<ExitStatus> {
    let mut out_file = fs::File::create(out_log)
        .with_context(|| format!("failed to create {}", out_log.display()))?;
    let err_file = fs::File::create(err_log)
        .with_context(|| format!("failed to create {}", err_log.display()))?;
    writeln!(out_file, "COMMAND: {}", shell_join(command))?;
    out_file.flush()?;

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(out_file));
    cmd.stderr(Stdio::from(err_file));
    let status = cmd
        .status()
        .with_context(|| format!("failed to launch {}", command[0]))?;
    Ok(status)
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
