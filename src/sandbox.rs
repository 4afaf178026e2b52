//! Sandbox execution using Docker
//!
//! Runs a single command inside an isolated container: no network, one CPU
//! share, a hard memory ceiling, and the prepared workspace bind-mounted
//! read/write at a fixed in-container path. The command is wrapped with an
//! in-container deadline (`timeout`) and, when requested, a measuring
//! wrapper (GNU `time`) whose metrics are parsed out of stderr and stripped
//! before the stream is surfaced to the caller.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code produced by the in-container deadline wrapper. Always maps to
/// `timed_out = true`, whether or not metrics parsing succeeded.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Marker the measuring wrapper prefixes to its metrics line on stderr.
const METER_MARKER: &str = "judge-meter:";

/// Grace added to the in-container deadline before the host kills the
/// whole `docker run` invocation as a backstop.
const HOST_DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// File name the input payload is written to inside the workspace.
pub const STDIN_FILE: &str = "input.txt";

/// Sandbox failure modes the pipeline needs to tell apart: the isolation
/// runtime being unavailable is a judge-internal error, not a property of
/// the user's command.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("isolation runtime unavailable: {0}")]
    Unavailable(#[source] std::io::Error),
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One sandboxed command invocation.
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    /// Toolchain image the command runs in
    pub image: String,
    /// Host directory holding the prepared workspace
    pub host_workdir: PathBuf,
    /// In-container mount point of the workspace; also the working directory
    pub sandbox_workdir: String,
    /// Command and arguments, passed as a structured argv (never a shell string)
    pub command: Vec<String>,
    /// Input payload; written to `STDIN_FILE` in the workspace and
    /// redirected as stdin from that file, never piped
    pub stdin: Option<String>,
    /// Wall-clock deadline for the command
    pub deadline: Duration,
    /// Hard memory ceiling (MB)
    pub memory_limit_mb: u64,
    /// Whether to capture wall time and peak memory via the measuring wrapper
    pub measure: bool,
}

/// Outcome of one sandboxed invocation. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub wall_time_ms: u64,
    pub peak_memory_kb: u64,
}

/// Execution seam the judging pipeline is written against.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, spec: &ExecutionSpec) -> Result<ExecutionResult, SandboxError>;
}

/// Sandbox backed by `docker run`, driven through structured argument lists.
pub struct DockerSandbox {
    output_cap_bytes: usize,
}

impl DockerSandbox {
    pub fn new(output_cap_bytes: usize) -> Self {
        Self { output_cap_bytes }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn execute(&self, spec: &ExecutionSpec) -> Result<ExecutionResult, SandboxError> {
        // Stdin goes through a file in the workspace so a slow-starting or
        // already-dead child can never produce a broken-pipe race.
        let stdin = match &spec.stdin {
            Some(input) => {
                let input_path = spec.host_workdir.join(STDIN_FILE);
                tokio::fs::write(&input_path, input).await?;
                Stdio::from(std::fs::File::open(&input_path)?)
            }
            None => Stdio::null(),
        };

        let args = build_docker_args(spec);
        debug!("Running docker with args: {:?}", args);

        let started = Instant::now();
        let child = Command::new("docker")
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Unavailable)?;

        // Backstop: if the in-container wrapper never returns, drop the
        // child (kill_on_drop) and report a timeout ourselves.
        let host_deadline = spec.deadline + HOST_DEADLINE_GRACE;
        let output = match tokio::time::timeout(host_deadline, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Sandboxed command exceeded host deadline of {:?}; killed",
                    host_deadline
                );
                return Ok(ExecutionResult {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                    wall_time_ms: started.elapsed().as_millis() as u64,
                    peak_memory_kb: 0,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let raw_stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let (stderr, metrics) = if spec.measure {
            parse_metrics(&raw_stderr)
        } else {
            (raw_stderr, None)
        };

        let (wall_time_ms, peak_memory_kb) = match metrics {
            Some(m) => (m.wall_time_ms, m.peak_memory_kb),
            None => (started.elapsed().as_millis() as u64, 0),
        };

        Ok(ExecutionResult {
            exit_code,
            stdout: truncate_output(&stdout, self.output_cap_bytes),
            stderr: truncate_output(&stderr, self.output_cap_bytes),
            timed_out: exit_code == TIMEOUT_EXIT_CODE,
            wall_time_ms,
            peak_memory_kb,
        })
    }
}

/// Metrics emitted by the measuring wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Metrics {
    wall_time_ms: u64,
    peak_memory_kb: u64,
}

/// Build the full `docker run` argument list for a spec.
///
/// Wrapper order matters: the measuring wrapper sits outside the deadline
/// wrapper so wall time and peak memory are captured even for runs the
/// deadline kills.
fn build_docker_args(spec: &ExecutionSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--network=none".to_string(),
        "--cpus=1".to_string(),
        format!("--memory={}m", spec.memory_limit_mb),
        format!("--memory-swap={}m", spec.memory_limit_mb),
        "--pids-limit=64".to_string(),
        "--security-opt=no-new-privileges".to_string(),
        "-v".to_string(),
        format!(
            "{}:{}",
            spec.host_workdir.display(),
            spec.sandbox_workdir
        ),
        "-w".to_string(),
        spec.sandbox_workdir.clone(),
    ];

    if spec.stdin.is_some() {
        args.push("-i".to_string());
    }

    args.push(spec.image.clone());

    if spec.measure {
        args.extend([
            "/usr/bin/time".to_string(),
            "-f".to_string(),
            format!("{} %e %M", METER_MARKER),
        ]);
    }

    args.extend([
        "timeout".to_string(),
        "--kill-after=1".to_string(),
        spec.deadline.as_secs().max(1).to_string(),
    ]);

    args.extend(spec.command.iter().cloned());
    args
}

/// Split the measuring wrapper's metrics out of a stderr stream.
///
/// Returns the stream with all marker lines removed, so user-visible
/// stderr never contains judge instrumentation, and the parsed metrics of
/// the last marker line if one parsed cleanly.
fn parse_metrics(stderr: &str) -> (String, Option<Metrics>) {
    let mut metrics = None;
    let mut kept = Vec::new();

    for line in stderr.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(METER_MARKER) {
            let mut fields = rest.split_whitespace();
            let wall = fields.next().and_then(|v| v.parse::<f64>().ok());
            let rss = fields.next().and_then(|v| v.parse::<u64>().ok());
            if let (Some(wall), Some(rss)) = (wall, rss) {
                metrics = Some(Metrics {
                    wall_time_ms: (wall * 1000.0) as u64,
                    peak_memory_kb: rss,
                });
            }
            continue;
        }
        kept.push(line);
    }

    (kept.join("\n"), metrics)
}

/// Cap captured output so pathological programs cannot grow judge memory
/// without bound.
fn truncate_output(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec(measure: bool, stdin: Option<&str>) -> ExecutionSpec {
        ExecutionSpec {
            image: "python:3.9-slim".into(),
            host_workdir: PathBuf::from("/tmp/judge-abc123"),
            sandbox_workdir: "/box".into(),
            command: vec!["python3".into(), "main.py".into()],
            stdin: stdin.map(|s| s.to_string()),
            deadline: Duration::from_secs(2),
            memory_limit_mb: 256,
            measure,
        }
    }

    #[test]
    fn test_docker_args_isolation_flags() {
        let args = build_docker_args(&sample_spec(false, None));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--cpus=1".to_string()));
        assert!(args.contains(&"--memory=256m".to_string()));
        assert!(args.contains(&"--memory-swap=256m".to_string()));
        assert!(args.contains(&"-w".to_string()));
        assert!(args.contains(&"/tmp/judge-abc123:/box".to_string()));
    }

    #[test]
    fn test_docker_args_deadline_wraps_command() {
        let args = build_docker_args(&sample_spec(false, None));
        let image_pos = args.iter().position(|a| a == "python:3.9-slim").unwrap();
        assert_eq!(args[image_pos + 1], "timeout");
        assert_eq!(args[image_pos + 2], "--kill-after=1");
        assert_eq!(args[image_pos + 3], "2");
        assert_eq!(
            args[image_pos + 4..].to_vec(),
            vec!["python3".to_string(), "main.py".to_string()]
        );
        // No measuring wrapper, no stdin forwarding
        assert!(!args.iter().any(|a| a == "/usr/bin/time"));
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_docker_args_measure_wraps_deadline() {
        let args = build_docker_args(&sample_spec(true, Some("1 2")));
        let image_pos = args.iter().position(|a| a == "python:3.9-slim").unwrap();
        assert_eq!(args[image_pos + 1], "/usr/bin/time");
        assert_eq!(args[image_pos + 4], "timeout");
        assert!(args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_parse_metrics_strips_marker_lines() {
        let stderr = "Traceback (most recent call last):\n  boom\njudge-meter: 0.42 15360";
        let (clean, metrics) = parse_metrics(stderr);
        assert_eq!(clean, "Traceback (most recent call last):\n  boom");
        assert_eq!(
            metrics,
            Some(Metrics {
                wall_time_ms: 420,
                peak_memory_kb: 15360,
            })
        );
    }

    #[test]
    fn test_parse_metrics_without_marker() {
        let (clean, metrics) = parse_metrics("segmentation fault");
        assert_eq!(clean, "segmentation fault");
        assert!(metrics.is_none());
    }

    #[test]
    fn test_parse_metrics_garbled_line_is_still_stripped() {
        let (clean, metrics) = parse_metrics("judge-meter: nonsense");
        assert_eq!(clean, "");
        assert!(metrics.is_none());
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 100), "short");
        let long = "x".repeat(200);
        let truncated = truncate_output(&long, 100);
        assert!(truncated.ends_with("[truncated]"));
        assert!(truncated.len() < long.len());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(10); // 2 bytes per char
        let truncated = truncate_output(&s, 5);
        assert!(truncated.starts_with("éé"));
    }
}
