use anyhow::Result;
use bench_runner::{ConfigError, JobDescriptor, JobStatus, RunSummary};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bench",
    version,
    about = "Sequential, resumable route evaluation runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every pending job in the run file, skipping finished ones.
    Run {
        run_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List the job queue without running anything.
    Plan {
        run_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Report which jobs are complete and why the others need a rerun.
    Status {
        run_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write a run-file template.
    Init {
        #[arg(long, default_value = "bench.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bench_runner=info,bench=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Outcome { payload, exit_code }) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

struct Outcome {
    payload: Option<Value>,
    exit_code: i32,
}

impl Outcome {
    fn ok(payload: Option<Value>) -> Self {
        Self {
            payload,
            exit_code: 0,
        }
    }
}

fn run_command(command: Commands) -> Result<Outcome> {
    match command {
        Commands::Run { run_file, json } => {
            let configs = bench_runner::load_run_file(&run_file)?;
            let jobs = bench_runner::build_job_queue(&configs)?;
            if jobs.is_empty() {
                if json {
                    return Ok(Outcome::ok(Some(json!({
                        "ok": true,
                        "command": "run",
                        "jobs": 0
                    }))));
                }
                println!("No jobs discovered. Check the configs in {}.", run_file.display());
                return Ok(Outcome::ok(None));
            }
            tracing::info!(
                run_file = %run_file.display(),
                configs = configs.len(),
                jobs = jobs.len(),
                "job queue built"
            );
            let summary =
                bench_runner::run_jobs(&jobs, &mut bench_runner::LocalEvaluator::new());
            let exit_code = if summary.all_succeeded() { 0 } else { 1 };
            if json {
                return Ok(Outcome {
                    payload: Some(json!({
                        "ok": summary.all_succeeded(),
                        "command": "run",
                        "summary": summary,
                    })),
                    exit_code,
                });
            }
            print_run_summary(&summary);
            Ok(Outcome {
                payload: None,
                exit_code,
            })
        }
        Commands::Plan { run_file, json } => {
            let configs = bench_runner::load_run_file(&run_file)?;
            let jobs = bench_runner::build_job_queue(&configs)?;
            if json {
                return Ok(Outcome::ok(Some(json!({
                    "ok": true,
                    "command": "plan",
                    "total_jobs": jobs.len(),
                    "jobs": jobs.iter().map(job_to_json).collect::<Vec<_>>(),
                }))));
            }
            println!("total_jobs: {}", jobs.len());
            for job in &jobs {
                println!(
                    "{}/{} seed {} route {} ({}) tries {} -> {}",
                    job.config.agent,
                    job.config.benchmark,
                    job.seed,
                    job.route_id,
                    job.route.file_name,
                    job.tries(),
                    job.paths.result_file.display()
                );
            }
            Ok(Outcome::ok(None))
        }
        Commands::Status { run_file, json } => {
            let configs = bench_runner::load_run_file(&run_file)?;
            let jobs = bench_runner::build_job_queue(&configs)?;
            let status = bench_runner::queue_status(&jobs);
            let complete = status.iter().filter(|s| s.verdict.is_complete()).count();
            if json {
                return Ok(Outcome::ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "total_jobs": status.len(),
                    "complete": complete,
                    "jobs": status,
                }))));
            }
            print_status(&status, complete);
            Ok(Outcome::ok(None))
        }
        Commands::Init { path, force } => {
            write_run_file_template(&path, force)?;
            println!("wrote: {}", path.display());
            println!("next: edit {} and fill in every path", path.display());
            println!("next: bench plan {}", path.display());
            Ok(Outcome::ok(None))
        }
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::MissingPath { .. }) => "missing_path",
        Some(ConfigError::HomeUnset { .. }) => "home_unset",
        Some(ConfigError::NotADirectory { .. }) => "not_a_directory",
        Some(ConfigError::SeparatorInPath { .. }) => "separator_in_path",
        None => "command_failed",
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Plan { json, .. }
        | Commands::Status { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn job_to_json(job: &JobDescriptor) -> Value {
    json!({
        "agent": job.config.agent,
        "benchmark": job.config.benchmark,
        "seed": job.seed,
        "route_id": job.route_id,
        "route": job.route.path.display().to_string(),
        "tries": job.tries(),
        "paths": job.paths,
    })
}

fn print_run_summary(summary: &RunSummary) {
    println!("total_jobs: {}", summary.total);
    println!("succeeded: {}", summary.succeeded);
    println!("skipped: {}", summary.skipped);
    println!(
        "elapsed: {}s",
        (summary.finished_at - summary.started_at).num_seconds()
    );
    if summary.all_succeeded() {
        println!("All jobs completed successfully.");
    } else {
        println!("The following jobs failed:");
        for failed in &summary.failures {
            println!(
                "  - {}/{} route {}, seed {}",
                failed.agent, failed.benchmark, failed.route_id, failed.seed
            );
        }
    }
}

fn print_status(status: &[JobStatus], complete: usize) {
    for row in status {
        let verdict = serde_json::to_value(&row.verdict).unwrap_or(Value::Null);
        let reason = verdict
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("complete");
        println!(
            "{}/{} seed {} route {}: {}",
            row.agent, row.benchmark, row.seed, row.route_id, reason
        );
    }
    println!("complete: {}/{}", complete, status.len());
}

fn write_run_file_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        ));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let template = "\
configs:
  - agent: simlingo                     # REQUIRED: names the output subtree
    benchmark: bench2drive              # REQUIRED: bench2drive pads route ids to 3 digits, others to 2
    route_path: leaderboard/data/bench2drive_split   # REQUIRED: directory of *.xml routes
    out_root: ./eval_results/Bench2Drive             # created on demand
    carla_root: ~/software/carla0915    # REQUIRED
    repo_root: ~/models/simlingo        # REQUIRED: evaluator runs from here
    agent_file: ./team_code/agent_simlingo.py        # REQUIRED
    checkpoint: ckpts/simlingo/pytorch_model.pt      # REQUIRED
    seeds: [1]
    tries: 1
    carla_port: 2000                    # must match the running CARLA server
    carla_tm_port: 2500
    timeout: 600
";
    std::fs::write(path, template)?;
    Ok(())
}
