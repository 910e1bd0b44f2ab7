//! Expansion of configurations into the ordered job queue.

use crate::config::{resolve_config, JobConfig, RawJobConfig};
use crate::routes::{discover_routes, RouteDescriptor};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output locations of one job under
/// `<out_root>/<agent>/<benchmark>/<seed>/{run,res,out,err,viz}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPaths {
    pub base_dir: PathBuf,
    pub run_dir: PathBuf,
    pub viz_dir: PathBuf,
    pub result_file: PathBuf,
    pub out_log: PathBuf,
    pub err_log: PathBuf,
}

impl JobPaths {
    pub fn new(config: &JobConfig, seed: u64, route_id: &str) -> Self {
        let base_dir = config
            .out_root
            .join(&config.agent)
            .join(&config.benchmark)
            .join(seed.to_string());
        Self {
            run_dir: base_dir.join("run"),
            viz_dir: base_dir.join("viz").join(route_id),
            result_file: base_dir.join("res").join(format!("{}_res.json", route_id)),
            out_log: base_dir.join("out").join(format!("{}_out.log", route_id)),
            err_log: base_dir.join("err").join(format!("{}_err.log", route_id)),
            base_dir,
        }
    }

    /// Creates the per-seed directories. Existing directories are fine.
    pub fn prepare(&self) -> Result<()> {
        for sub in ["run", "res", "out", "err", "viz"] {
            ensure_dir(&self.base_dir.join(sub))?;
        }
        Ok(())
    }
}

/// One (configuration, seed, route) unit of work.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub config: Arc<JobConfig>,
    pub seed: u64,
    pub route: RouteDescriptor,
    pub route_id: String,
    pub paths: JobPaths,
}

impl JobDescriptor {
    /// Attempt budget this job starts with.
    pub fn tries(&self) -> u32 {
        self.config.tries
    }
}

/// Resolves every configuration and expands it into jobs, in
/// config, then seed, then route order.
///
/// A configuration that fails to resolve aborts the whole build.
pub fn build_job_queue(raw_configs: &[RawJobConfig]) -> Result<Vec<JobDescriptor>> {
    let mut queue = Vec::new();
    for (idx, raw) in raw_configs.iter().enumerate() {
        let config = resolve_config(raw)
            .with_context(|| format!("config #{} ({}/{})", idx, raw.agent, raw.benchmark))?;
        queue.extend(jobs_for_config(Arc::new(config))?);
    }
    Ok(queue)
}

pub fn jobs_for_config(config: Arc<JobConfig>) -> Result<Vec<JobDescriptor>> {
    let routes = discover_routes(&config.route_path)?;
    let width = config.route_id_width();
    let mut jobs = Vec::with_capacity(routes.len() * config.seeds.len());
    for &seed in &config.seeds {
        for route in &routes {
            let route_id = route.route_id(width);
            let paths = JobPaths::new(&config, seed, &route_id);
            paths.prepare()?;
            jobs.push(JobDescriptor {
                config: Arc::clone(&config),
                seed,
                route: route.clone(),
                route_id,
                paths,
            });
        }
    }
    Ok(jobs)
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn bench2drive_pads_route_ids_to_three_digits() {
        let fixture = Fixture::new("queue_b2d");
        fixture.add_routes(&["route_7.xml"]);
        let jobs = build_job_queue(&[fixture.raw.clone()]).expect("queue");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].route_id, "007");
    }

    #[test]
    fn other_benchmarks_pad_route_ids_to_two_digits() {
        let mut fixture = Fixture::new("queue_other");
        fixture.raw.benchmark = "longest6".to_string();
        fixture.add_routes(&["route_7.xml"]);
        let jobs = build_job_queue(&[fixture.raw.clone()]).expect("queue");
        assert_eq!(jobs[0].route_id, "07");
    }

    #[test]
    fn jobs_follow_config_then_seed_then_route_order() {
        let mut first = Fixture::new("queue_order_a");
        first.raw.seeds = Some(vec![1, 2]);
        first.add_routes(&["route_2.xml", "route_1.xml"]);
        let mut second = Fixture::new("queue_order_b");
        second.raw.agent = "other".to_string();
        second.add_routes(&["route_5.xml"]);

        let jobs = build_job_queue(&[first.raw.clone(), second.raw.clone()]).expect("queue");
        let order: Vec<(String, u64, String)> = jobs
            .iter()
            .map(|j| (j.config.agent.clone(), j.seed, j.route_id.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("simlingo".to_string(), 1, "001".to_string()),
                ("simlingo".to_string(), 1, "002".to_string()),
                ("simlingo".to_string(), 2, "001".to_string()),
                ("simlingo".to_string(), 2, "002".to_string()),
                ("other".to_string(), 1, "005".to_string()),
            ]
        );
    }

    #[test]
    fn output_layout_is_namespaced_and_created() {
        let fixture = Fixture::new("queue_layout");
        fixture.add_routes(&["route_12.xml"]);
        let jobs = build_job_queue(&[fixture.raw.clone()]).expect("queue");
        let base = fixture.root.join("out").join("simlingo").join("bench2drive").join("1");
        let paths = &jobs[0].paths;
        assert_eq!(paths.base_dir, base);
        assert_eq!(paths.result_file, base.join("res").join("012_res.json"));
        assert_eq!(paths.out_log, base.join("out").join("012_out.log"));
        assert_eq!(paths.err_log, base.join("err").join("012_err.log"));
        assert_eq!(paths.viz_dir, base.join("viz").join("012"));
        for sub in ["run", "res", "out", "err", "viz"] {
            assert!(base.join(sub).is_dir(), "{} should exist", sub);
        }
        assert_eq!(jobs[0].tries(), 1);
    }

    #[test]
    fn rebuilding_yields_identical_paths() {
        let fixture = Fixture::new("queue_idempotent");
        fixture.add_routes(&["route_1.xml", "route_10.xml", "route_2.xml"]);
        let first = build_job_queue(&[fixture.raw.clone()]).expect("first build");
        let second = build_job_queue(&[fixture.raw.clone()]).expect("second build");
        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.route_id, b.route_id);
            assert_eq!(a.paths, b.paths);
        }
    }

    #[test]
    fn missing_required_path_aborts_the_build() {
        let fixture = Fixture::new("queue_missing");
        let mut raw = fixture.raw.clone();
        raw.repo_root = fixture.root.join("gone").display().to_string();
        let err = build_job_queue(&[raw]).expect_err("must fail");
        let chain = format!("{:#}", err);
        assert!(chain.contains("repo_root does not exist"), "{}", chain);
    }
}
