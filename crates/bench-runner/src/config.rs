//! Run-file loading and per-configuration path resolution.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_CARLA_PORT: u16 = 2000;
pub const DEFAULT_CARLA_TM_PORT: u16 = 2500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TRIES: u32 = 1;
pub const DEFAULT_PYTHON: &str = "python";
pub const DEFAULT_CARLA_EGG: &str = "carla-0.9.15-py3.7-linux-x86_64.egg";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunFile {
    configs: Vec<RawJobConfig>,
}

/// One job-configuration record as written in the run file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawJobConfig {
    pub agent: String,
    pub benchmark: String,
    pub route_path: String,
    pub out_root: String,
    pub carla_root: String,
    pub repo_root: String,
    pub agent_file: String,
    pub checkpoint: String,
    #[serde(default)]
    pub carla_port: Option<u16>,
    #[serde(default)]
    pub carla_tm_port: Option<u16>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub tries: Option<u32>,
    #[serde(default)]
    pub seeds: Option<Vec<u64>>,
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default)]
    pub carla_egg: Option<String>,
}

/// A configuration with absolute, validated paths and every default applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobConfig {
    pub agent: String,
    pub benchmark: String,
    pub route_path: PathBuf,
    pub out_root: PathBuf,
    pub carla_root: PathBuf,
    pub repo_root: PathBuf,
    pub agent_file: PathBuf,
    pub checkpoint: PathBuf,
    pub carla_port: u16,
    pub carla_tm_port: u16,
    pub timeout: u64,
    pub tries: u32,
    pub seeds: Vec<u64>,
    pub python: String,
    pub carla_egg: String,
}

impl JobConfig {
    pub fn leaderboard_root(&self) -> PathBuf {
        self.repo_root.join("Bench2Drive").join("leaderboard")
    }

    pub fn scenario_runner_root(&self) -> PathBuf {
        self.repo_root.join("Bench2Drive").join("scenario_runner")
    }

    pub fn evaluator_entry(&self) -> PathBuf {
        self.leaderboard_root()
            .join("leaderboard")
            .join("leaderboard_evaluator.py")
    }

    /// Width route identifiers are zero-padded to for this benchmark.
    pub fn route_id_width(&self) -> usize {
        route_id_width(&self.benchmark)
    }
}

pub fn route_id_width(benchmark: &str) -> usize {
    if benchmark.eq_ignore_ascii_case("bench2drive") {
        3
    } else {
        2
    }
}

pub fn load_run_file(path: &Path) -> Result<Vec<RawJobConfig>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read run file {}", path.display()))?;
    let run_file: RunFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse run file {}", path.display()))?;
    Ok(run_file.configs)
}

pub fn resolve_config(raw: &RawJobConfig) -> Result<JobConfig> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let home = std::env::var_os("HOME").map(PathBuf::from);
    Ok(resolve_config_in(raw, &cwd, home.as_deref())?)
}

/// Resolves `raw` against an explicit working directory and home directory.
pub fn resolve_config_in(
    raw: &RawJobConfig,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<JobConfig, ConfigError> {
    let expand = |field: &'static str, value: &str| expand_path(field, value, cwd, home);
    let config = JobConfig {
        agent: raw.agent.clone(),
        benchmark: raw.benchmark.clone(),
        route_path: expand("route_path", &raw.route_path)?,
        out_root: expand("out_root", &raw.out_root)?,
        carla_root: expand("carla_root", &raw.carla_root)?,
        repo_root: expand("repo_root", &raw.repo_root)?,
        agent_file: expand("agent_file", &raw.agent_file)?,
        checkpoint: expand("checkpoint", &raw.checkpoint)?,
        carla_port: raw.carla_port.unwrap_or(DEFAULT_CARLA_PORT),
        carla_tm_port: raw.carla_tm_port.unwrap_or(DEFAULT_CARLA_TM_PORT),
        timeout: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
        tries: raw.tries.unwrap_or(DEFAULT_TRIES),
        seeds: raw.seeds.clone().unwrap_or_else(|| vec![1]),
        python: raw
            .python
            .clone()
            .unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
        carla_egg: raw
            .carla_egg
            .clone()
            .unwrap_or_else(|| DEFAULT_CARLA_EGG.to_string()),
    };

    let required: [(&'static str, &Path); 5] = [
        ("route_path", &config.route_path),
        ("carla_root", &config.carla_root),
        ("repo_root", &config.repo_root),
        ("agent_file", &config.agent_file),
        ("checkpoint", &config.checkpoint),
    ];
    for (field, path) in required {
        if !path.exists() {
            return Err(ConfigError::MissingPath {
                field,
                path: path.to_path_buf(),
            });
        }
    }
    if !config.route_path.is_dir() {
        return Err(ConfigError::NotADirectory {
            field: "route_path",
            path: config.route_path.clone(),
        });
    }
    // both roots end up in PYTHONPATH
    let search_roots = [
        ("carla_root", &config.carla_root),
        ("repo_root", &config.repo_root),
    ];
    for (field, path) in search_roots {
        if std::env::join_paths([path]).is_err() {
            return Err(ConfigError::SeparatorInPath {
                field,
                path: path.clone(),
            });
        }
    }
    Ok(config)
}

fn expand_path(
    field: &'static str,
    value: &str,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    let expanded = if value == "~" {
        home.ok_or(ConfigError::HomeUnset { field })?.to_path_buf()
    } else if let Some(rest) = value.strip_prefix("~/") {
        home.ok_or(ConfigError::HomeUnset { field })?.join(rest)
    } else {
        PathBuf::from(value)
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };
    Ok(normalize_path(&absolute))
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{scratch_dir, Fixture};

    #[test]
    fn defaults_fill_missing_numeric_fields() {
        let fixture = Fixture::new("cfg_defaults");
        let config = resolve_config_in(&fixture.raw, &fixture.root, None).expect("resolves");
        assert_eq!(config.carla_port, 2000);
        assert_eq!(config.carla_tm_port, 2500);
        assert_eq!(config.timeout, 600);
        assert_eq!(config.tries, 1);
        assert_eq!(config.seeds, vec![1]);
        assert_eq!(config.python, "python");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut fixture = Fixture::new("cfg_explicit");
        fixture.raw.carla_port = Some(3000);
        fixture.raw.carla_tm_port = Some(3500);
        fixture.raw.timeout = Some(30);
        fixture.raw.tries = Some(4);
        fixture.raw.seeds = Some(vec![2, 5]);
        let config = resolve_config_in(&fixture.raw, &fixture.root, None).expect("resolves");
        assert_eq!(config.carla_port, 3000);
        assert_eq!(config.carla_tm_port, 3500);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.tries, 4);
        assert_eq!(config.seeds, vec![2, 5]);
    }

    #[test]
    fn relative_paths_become_absolute() {
        let fixture = Fixture::new("cfg_relative");
        let mut raw = fixture.raw.clone();
        raw.route_path = "./routes".to_string();
        raw.agent_file = "repo/./team_code/../team_code/agent.py".to_string();
        let config = resolve_config_in(&raw, &fixture.root, None).expect("resolves");
        assert_eq!(config.route_path, fixture.root.join("routes"));
        assert_eq!(
            config.agent_file,
            fixture.root.join("repo").join("team_code").join("agent.py")
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        let fixture = Fixture::new("cfg_home");
        let mut raw = fixture.raw.clone();
        raw.carla_root = "~/carla".to_string();
        let config =
            resolve_config_in(&raw, Path::new("/nowhere"), Some(&fixture.root)).expect("resolves");
        assert_eq!(config.carla_root, fixture.root.join("carla"));
    }

    #[test]
    fn tilde_without_home_is_an_error() {
        let fixture = Fixture::new("cfg_no_home");
        let mut raw = fixture.raw.clone();
        raw.carla_root = "~/carla".to_string();
        let err = resolve_config_in(&raw, &fixture.root, None).expect_err("must fail");
        assert!(matches!(err, ConfigError::HomeUnset { field: "carla_root" }));
    }

    #[test]
    fn missing_checkpoint_names_the_field() {
        let fixture = Fixture::new("cfg_missing");
        fs::remove_file(fixture.root.join("model.pt")).expect("remove checkpoint");
        let err = resolve_config_in(&fixture.raw, &fixture.root, None).expect_err("must fail");
        match &err {
            ConfigError::MissingPath { field, path } => {
                assert_eq!(*field, "checkpoint");
                assert_eq!(path, &fixture.root.join("model.pt"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.to_string().starts_with("checkpoint does not exist"));
    }

    #[test]
    fn route_path_pointing_at_a_file_is_rejected() {
        let fixture = Fixture::new("cfg_route_file");
        fixture.add_routes(&["route_1.xml"]);
        let mut raw = fixture.raw.clone();
        raw.route_path = fixture.root.join("routes/route_1.xml").display().to_string();
        let err = resolve_config_in(&raw, &fixture.root, None).expect_err("must fail");
        match &err {
            ConfigError::NotADirectory { field, path } => {
                assert_eq!(*field, "route_path");
                assert_eq!(path, &fixture.root.join("routes").join("route_1.xml"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn root_with_path_separator_is_rejected() {
        let fixture = Fixture::new("cfg_separator");
        let carla = fixture.root.join("car:la");
        fs::create_dir_all(&carla).expect("carla dir");
        let mut raw = fixture.raw.clone();
        raw.carla_root = carla.display().to_string();
        let err = resolve_config_in(&raw, &fixture.root, None).expect_err("must fail");
        match &err {
            ConfigError::SeparatorInPath { field, path } => {
                assert_eq!(*field, "carla_root");
                assert_eq!(path, &carla);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn out_root_does_not_need_to_exist() {
        let fixture = Fixture::new("cfg_out_root");
        let mut raw = fixture.raw.clone();
        raw.out_root = "not/yet/created".to_string();
        let config = resolve_config_in(&raw, &fixture.root, None).expect("resolves");
        assert_eq!(config.out_root, fixture.root.join("not/yet/created"));
    }

    #[test]
    fn route_id_width_depends_on_benchmark() {
        assert_eq!(route_id_width("bench2drive"), 3);
        assert_eq!(route_id_width("Bench2Drive"), 3);
        assert_eq!(route_id_width("longest6"), 2);
        assert_eq!(route_id_width(""), 2);
    }

    #[test]
    fn load_run_file_reads_yaml_configs() {
        let root = scratch_dir("cfg_load");
        let path = root.join("run.yaml");
        fs::write(
            &path,
            "configs:\n  - agent: simlingo\n    benchmark: bench2drive\n    route_path: routes\n    out_root: out\n    carla_root: carla\n    repo_root: repo\n    agent_file: agent.py\n    checkpoint: model.pt\n    seeds: [1, 2]\n    tries: 3\n",
        )
        .expect("write run file");
        let configs = load_run_file(&path).expect("parses");
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].agent, "simlingo");
        assert_eq!(configs[0].seeds, Some(vec![1, 2]));
        assert_eq!(configs[0].tries, Some(3));
        assert_eq!(configs[0].carla_port, None);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn load_run_file_rejects_unknown_fields() {
        let root = scratch_dir("cfg_unknown");
        let path = root.join("run.yaml");
        fs::write(
            &path,
            "configs:\n  - agent: a\n    benchmark: b\n    route_path: r\n    out_root: o\n    carla_root: c\n    repo_root: p\n    agent_file: f\n    checkpoint: k\n    retries: 3\n",
        )
        .expect("write run file");
        let err = load_run_file(&path).expect_err("unknown field must fail");
        assert!(err.to_string().contains("failed to parse run file"));
        let _ = fs::remove_dir_all(root);
    }
}
