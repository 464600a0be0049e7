//! Parallel test execution with one coverage database per test
//!
//! A test is a shell command. `%c` in the command is replaced by the
//! test's database path, which is also exported as
//! `VERILATOR_COVERAGE_FILE`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

pub const COVERAGE_FILE_ENV: &str = "VERILATOR_COVERAGE_FILE";
pub const PATH_PLACEHOLDER: &str = "%c";

/// `N/M`: run only tests whose command hashes to `N` modulo `M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: u64,
    pub count: u64,
}

impl Shard {
    pub fn contains(&self, command: &str) -> bool {
        let digest = md5::compute(command.as_bytes());
        u128::from_be_bytes(digest.0) % u128::from(self.count) == u128::from(self.index)
    }
}

impl FromStr for Shard {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (index, count) = s
            .split_once('/')
            .ok_or_else(|| format!("expected N/M, got '{s}'"))?;
        let index: u64 = index
            .trim()
            .parse()
            .map_err(|err| format!("bad hashset index '{index}': {err}"))?;
        let count: u64 = count
            .trim()
            .parse()
            .map_err(|err| format!("bad hashset count '{count}': {err}"))?;
        if count == 0 || index >= count {
            return Err(format!("hashset {index}/{count} selects nothing"));
        }
        Ok(Self { index, count })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestJob {
    pub command: String,
    pub dat_path: PathBuf,
}

impl TestJob {
    /// Command with the database path substituted.
    pub fn shell_command(&self) -> String {
        self.command
            .replace(PATH_PLACEHOLDER, &self.dat_path.display().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: TestJob,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl JobResult {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Database file name for a test: readable prefix plus a digest suffix.
fn dat_name(command: &str) -> String {
    let mut stem: String = command
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    stem.truncate(40);
    let digest = md5::compute(command.as_bytes());
    format!("{}_{:x}.dat", stem.trim_matches('_'), digest)
}

/// Select and place tests. Two tests landing on one database path is an
/// error since they would overwrite each other's coverage.
pub fn plan(commands: &[String], coverage_dir: &Path, shard: Option<Shard>) -> Result<Vec<TestJob>> {
    let mut by_path: BTreeMap<PathBuf, Vec<&str>> = BTreeMap::new();
    let mut jobs = Vec::new();
    for command in commands {
        let command = command.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        if let Some(set) = shard {
            if !set.contains(command) {
                debug!(command, "outside hashset");
                continue;
            }
        }
        let dat_path = coverage_dir.join(dat_name(command));
        by_path.entry(dat_path.clone()).or_default().push(command);
        jobs.push(TestJob {
            command: command.to_string(),
            dat_path,
        });
    }

    let duplicates: Vec<String> = by_path
        .iter()
        .filter(|(_, commands)| commands.len() > 1)
        .map(|(path, commands)| format!("{} <- {}", path.display(), commands.join(" | ")))
        .collect();
    if !duplicates.is_empty() {
        bail!(
            "Tests would overwrite the same coverage file:\n  {}",
            duplicates.join("\n  ")
        );
    }
    Ok(jobs)
}

pub fn read_tests_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tests file {}", path.display()))?;
    Ok(text.lines().map(str::to_string).collect())
}

fn run_one(job: &TestJob) -> JobResult {
    let start = Instant::now();
    let status = Command::new("sh")
        .arg("-c")
        .arg(job.shell_command())
        .env(COVERAGE_FILE_ENV, &job.dat_path)
        .status();
    let exit_code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(command = %job.command, error = %err, "failed to launch test");
            None
        }
    };
    JobResult {
        job: job.clone(),
        exit_code,
        elapsed: start.elapsed(),
    }
}

/// Run `jobs` on `workers` threads. Results come back in job order.
pub fn run_jobs(jobs: &[TestJob], workers: usize) -> Vec<JobResult> {
    let workers = workers.max(1).min(jobs.len().max(1));
    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<(usize, JobResult)>> = Mutex::new(Vec::with_capacity(jobs.len()));

    info!(tests = jobs.len(), workers, "running tests");
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(job) = jobs.get(idx) else {
                    break;
                };
                let result = run_one(job);
                println!(
                    "  [{}] {} ({:.2}s)",
                    if result.passed() { "PASS" } else { "FAIL" },
                    job.command,
                    result.elapsed.as_secs_f32()
                );
                if let Ok(mut done) = results.lock() {
                    done.push((idx, result));
                }
            });
        }
    });

    let mut done = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    done.sort_by_key(|(idx, _)| *idx);
    done.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn commands(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn shard__parse__then_bounds_checked() {
        assert_eq!("1/4".parse::<Shard>(), Ok(Shard { index: 1, count: 4 }));
        assert!("4/4".parse::<Shard>().is_err());
        assert!("0/0".parse::<Shard>().is_err());
        assert!("3".parse::<Shard>().is_err());
    }

    #[test]
    fn shard__all_shards__then_each_test_in_exactly_one() {
        let tests: Vec<String> = (0..50).map(|i| format!("t_case_{i} --seed {i}")).collect();
        for test in &tests {
            let hits = (0..3)
                .filter(|index| Shard { index: *index, count: 3 }.contains(test))
                .count();
            assert_eq!(hits, 1, "{test}");
        }
    }

    #[test]
    fn plan__distinct_tests__then_distinct_paths() {
        let jobs = plan(
            &commands(&["t_a.py", "t_b.py", "", "# comment"]),
            Path::new("cov"),
            None,
        )
        .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].dat_path, jobs[1].dat_path);
        assert!(jobs[0].dat_path.starts_with("cov"));
    }

    #[test]
    fn plan__same_test_twice__then_rejected() {
        let err = plan(&commands(&["t_a.py", "t_a.py"]), Path::new("cov"), None).unwrap_err();
        assert!(err.to_string().contains("overwrite the same coverage file"));
    }

    #[test]
    fn shell_command__placeholder__then_path_substituted() {
        let job = TestJob {
            command: "sim +cov=%c".to_string(),
            dat_path: PathBuf::from("cov/a.dat"),
        };
        assert_eq!(job.shell_command(), "sim +cov=cov/a.dat");
    }

    #[cfg(unix)]
    #[test]
    fn run_jobs__parallel__then_each_writes_own_file_and_failures_reported() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = plan(
            &commands(&[
                "echo one > %c",
                "echo two > \"$VERILATOR_COVERAGE_FILE\"",
                "exit 3",
            ]),
            dir.path(),
            None,
        )
        .unwrap();

        let results = run_jobs(&jobs, 4);
        assert_eq!(results.len(), 3);
        assert!(results[0].passed() && results[1].passed());
        assert_eq!(results[2].exit_code, Some(3));
        assert_eq!(fs::read_to_string(&jobs[0].dat_path).unwrap(), "one\n");
        assert_eq!(fs::read_to_string(&jobs[1].dat_path).unwrap(), "two\n");
    }
}
