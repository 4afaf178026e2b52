//! Judging pipeline for user submissions.
//!
//! Orchestrates one submission end-to-end: code templating, workspace
//! setup, compile phase, per-test-case execution, verdict derivation,
//! incremental persistence, owner notification, and cleanup. The pipeline
//! guarantees exactly one terminal status write per submission and never
//! lets a single submission crash the worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::languages::LanguageRegistry;
use crate::models::{
    FailedCase, ProgressPublisher, Submission, SubmissionResult, SubmissionStore, SubmissionUpdate,
};
use crate::sandbox::{ExecutionResult, ExecutionSpec, Sandbox};
use crate::verdict::Status;

/// Token a problem's code template must contain exactly once; the user's
/// code is substituted in its place before anything is compiled or run.
pub const CODE_PLACEHOLDER: &str = "{{USER_CODE}}";

/// Placeholder written in place of a hidden test case's input and expected
/// output in user-visible failure details.
pub const HIDDEN_PLACEHOLDER: &str = "[hidden]";

/// Memory ceiling for the compile phase (MB). Compilers legitimately need
/// far more than user programs are allowed at run time.
const COMPILE_MEMORY_LIMIT_MB: u64 = 2048;

/// Judging pipeline with its injected collaborators. Cheap to clone; one
/// instance is shared across all in-flight submissions.
#[derive(Clone)]
pub struct Judger {
    store: Arc<dyn SubmissionStore>,
    sandbox: Arc<dyn Sandbox>,
    publisher: Arc<dyn ProgressPublisher>,
    languages: Arc<LanguageRegistry>,
    config: WorkerConfig,
}

impl Judger {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        sandbox: Arc<dyn Sandbox>,
        publisher: Arc<dyn ProgressPublisher>,
        languages: Arc<LanguageRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            sandbox,
            publisher,
            languages,
            config,
        }
    }

    /// Judge one submission. Never returns an error: anything unexpected is
    /// caught, logged with full detail, and surfaced to the user only as a
    /// generic `JudgeInternalError`.
    pub async fn judge(&self, submission_id: &str) {
        let mut submission = match self.store.get_submission(submission_id).await {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                error!("Submission {} not found; dropping job", submission_id);
                return;
            }
            Err(e) => {
                error!("Failed to load submission {}: {:#}", submission_id, e);
                return;
            }
        };

        if let Err(e) = self.run_pipeline(&mut submission).await {
            error!(
                "Judge pipeline failed for submission {}: {:#}",
                submission.id, e
            );
            let result = SubmissionResult {
                error_detail: Some("internal judge error".to_string()),
                ..submission.result.clone()
            };
            let update = SubmissionUpdate::status(Status::JudgeInternalError).with_result(result);
            // Best effort: a failure to persist or notify here must never
            // crash the worker.
            if let Err(e) = self.persist_and_notify(&mut submission, &update).await {
                error!(
                    "Failed to record internal error for submission {}: {:#}",
                    submission.id, e
                );
            }
        }

        info!(
            "Judged submission {}: {} ({}/{} passed)",
            submission.id,
            submission.status,
            submission.result.passed_count,
            submission.result.total_count
        );
    }

    async fn run_pipeline(&self, submission: &mut Submission) -> Result<()> {
        // Re-queued ids restart from scratch: reset progress and usage.
        let update = SubmissionUpdate::status(Status::Running)
            .with_result(SubmissionResult::default())
            .with_usage(0, 0);
        self.persist_and_notify(submission, &update).await?;

        let problem = match self.store.get_problem(&submission.problem_id).await? {
            Some(problem) => problem,
            None => {
                return self
                    .finish_with_error(submission, "problem not found", 0)
                    .await;
            }
        };
        let total_count = problem.testcases.len() as u32;

        let profile = match self.languages.profile(&submission.language) {
            Some(profile) => profile.clone(),
            None => {
                let detail = format!("unsupported language: {}", submission.language);
                return self.finish_with_error(submission, &detail, total_count).await;
            }
        };

        let template = problem.code_templates.get(&submission.language);
        let source = match render_source(template.map(|s| s.as_str()), &submission.source_code) {
            Ok(source) => source,
            Err(_) => {
                return self
                    .finish_with_error(submission, "template misconfigured", total_count)
                    .await;
            }
        };

        // Single-use workspace; removed on drop no matter how we leave.
        let workspace = tempfile::Builder::new()
            .prefix("judge-")
            .tempdir()
            .context("Failed to create workspace")?;
        tokio::fs::write(workspace.path().join(&profile.source_file), &source)
            .await
            .context("Failed to write source file")?;

        if let Some(compile_command) = &profile.compile_command {
            let update = SubmissionUpdate::status(Status::Compiling);
            self.persist_and_notify(submission, &update).await?;

            let spec = ExecutionSpec {
                image: profile.image.clone(),
                host_workdir: workspace.path().to_path_buf(),
                sandbox_workdir: profile.work_dir.clone(),
                command: compile_command.clone(),
                stdin: None,
                deadline: self.config.compile_time_limit,
                memory_limit_mb: COMPILE_MEMORY_LIMIT_MB,
                measure: false,
            };
            let compile = self
                .sandbox
                .execute(&spec)
                .await
                .context("Compile step failed to execute")?;

            if compile.timed_out || compile.exit_code != 0 {
                let detail = if compile.stderr.is_empty() {
                    compile.stdout.clone()
                } else {
                    compile.stderr.clone()
                };
                let result = SubmissionResult {
                    passed_count: 0,
                    total_count,
                    failed_case: None,
                    error_detail: Some(detail),
                };
                let update =
                    SubmissionUpdate::status(Status::CompilationError).with_result(result);
                return self.finish(submission, update).await;
            }
        }

        let memory_limit_kb = self.config.memory_limit_mb * 1024;
        let mut passed_count = 0u32;
        let mut max_time_ms = 0u64;
        let mut max_memory_kb = 0u64;

        for testcase in &problem.testcases {
            let progress = SubmissionResult {
                passed_count,
                total_count,
                failed_case: None,
                error_detail: None,
            };
            let update = SubmissionUpdate::status(Status::Running).with_result(progress);
            self.persist_and_notify(submission, &update).await?;

            let spec = ExecutionSpec {
                image: profile.image.clone(),
                host_workdir: workspace.path().to_path_buf(),
                sandbox_workdir: profile.work_dir.clone(),
                command: profile.run_command.clone(),
                stdin: Some(testcase.input.clone()),
                deadline: Duration::from_secs(problem.time_limit_seconds),
                memory_limit_mb: self.config.memory_limit_mb,
                measure: true,
            };
            let run = self
                .sandbox
                .execute(&spec)
                .await
                .context("Test run failed to execute")?;

            // Worst case across test cases, not the sum.
            max_time_ms = max_time_ms.max(run.wall_time_ms);
            max_memory_kb = max_memory_kb.max(run.peak_memory_kb);

            match classify_run(
                &run,
                &testcase.expected_output,
                &testcase.input,
                testcase.is_hidden,
                memory_limit_kb,
            ) {
                CaseVerdict::Passed => {
                    passed_count += 1;
                }
                CaseVerdict::Terminal {
                    status,
                    failed_case,
                    error_detail,
                } => {
                    let result = SubmissionResult {
                        passed_count,
                        total_count,
                        failed_case,
                        error_detail,
                    };
                    let update = SubmissionUpdate::status(status)
                        .with_result(result)
                        .with_usage(max_time_ms, max_memory_kb);
                    return self.finish(submission, update).await;
                }
            }
        }

        let result = SubmissionResult {
            passed_count,
            total_count,
            failed_case: None,
            error_detail: None,
        };
        let update = SubmissionUpdate::status(Status::Accepted)
            .with_result(result)
            .with_usage(max_time_ms, max_memory_kb);
        self.finish(submission, update).await
    }

    /// Short-circuit with a configuration-style failure (missing problem,
    /// unknown language, broken template).
    async fn finish_with_error(
        &self,
        submission: &mut Submission,
        detail: &str,
        total_count: u32,
    ) -> Result<()> {
        let result = SubmissionResult {
            passed_count: 0,
            total_count,
            failed_case: None,
            error_detail: Some(detail.to_string()),
        };
        let update = SubmissionUpdate::status(Status::RuntimeError).with_result(result);
        self.finish(submission, update).await
    }

    /// Write a terminal verdict, notify the owner, and bump the problem's
    /// submission counters. The counter update is best-effort relative to
    /// the verdict write: a failure is logged, never retried, and never
    /// changes the recorded verdict.
    async fn finish(&self, submission: &mut Submission, update: SubmissionUpdate) -> Result<()> {
        self.persist_and_notify(submission, &update).await?;

        if submission.status.is_terminal() && submission.status != Status::JudgeInternalError {
            let accepted = submission.status == Status::Accepted;
            if let Err(e) = self
                .store
                .increment_problem_counters(&submission.problem_id, accepted)
                .await
            {
                warn!(
                    "Failed to increment counters for problem {}: {:#}",
                    submission.problem_id, e
                );
            }
        }
        Ok(())
    }

    /// Persist a partial update and publish the resulting snapshot to the
    /// submission's owner. Publish failures are logged, never fatal.
    async fn persist_and_notify(
        &self,
        submission: &mut Submission,
        update: &SubmissionUpdate,
    ) -> Result<()> {
        self.store.update_submission(&submission.id, update).await?;
        update.apply(submission);

        if let Err(e) = self.publisher.publish(&submission.user_id, submission).await {
            warn!(
                "Failed to publish progress for submission {}: {:#}",
                submission.id, e
            );
        }
        Ok(())
    }
}

/// Materialize the source the toolchain will see: the user's code
/// substituted into the problem's template for this language, or the code
/// verbatim when no template is defined.
pub fn render_source(template: Option<&str>, code: &str) -> Result<String, TemplateError> {
    match template {
        None => Ok(code.to_string()),
        Some(template) if template.contains(CODE_PLACEHOLDER) => {
            Ok(template.replacen(CODE_PLACEHOLDER, code, 1))
        }
        // A template without the placeholder is a problem-authoring defect.
        Some(_) => Err(TemplateError::MissingPlaceholder),
    }
}

#[derive(Debug, PartialEq)]
pub enum TemplateError {
    MissingPlaceholder,
}

/// Outcome of a single test case.
#[derive(Debug, PartialEq)]
enum CaseVerdict {
    Passed,
    Terminal {
        status: Status,
        failed_case: Option<FailedCase>,
        error_detail: Option<String>,
    },
}

/// Derive the verdict for one test run.
///
/// Precedence: deadline → memory ceiling → nonzero exit → output mismatch.
/// The memory check comes before the generic nonzero-exit check because an
/// out-of-memory kill usually also yields a nonzero or signal exit.
fn classify_run(
    run: &ExecutionResult,
    expected_output: &str,
    input: &str,
    is_hidden: bool,
    memory_limit_kb: u64,
) -> CaseVerdict {
    if run.timed_out {
        return CaseVerdict::Terminal {
            status: Status::TimeLimitExceeded,
            failed_case: None,
            error_detail: None,
        };
    }
    if run.peak_memory_kb > memory_limit_kb {
        return CaseVerdict::Terminal {
            status: Status::MemoryLimitExceeded,
            failed_case: None,
            error_detail: None,
        };
    }
    if run.exit_code != 0 {
        return CaseVerdict::Terminal {
            status: Status::RuntimeError,
            failed_case: None,
            error_detail: Some(run.stderr.clone()),
        };
    }
    if !outputs_match(&run.stdout, expected_output) {
        return CaseVerdict::Terminal {
            status: Status::WrongAnswer,
            failed_case: Some(failed_case(input, expected_output, &run.stdout, is_hidden)),
            error_detail: None,
        };
    }
    CaseVerdict::Passed
}

/// Compare program output with expected output: exact equality after
/// trimming leading/trailing whitespace of the whole stream (not per line).
fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

/// Failure detail for the first failing test case, with input and expected
/// output redacted when the test case is hidden.
fn failed_case(input: &str, expected: &str, actual: &str, is_hidden: bool) -> FailedCase {
    if is_hidden {
        FailedCase {
            input: HIDDEN_PLACEHOLDER.to_string(),
            expected_output: HIDDEN_PLACEHOLDER.to_string(),
            user_output: actual.trim().to_string(),
        }
    } else {
        FailedCase {
            input: input.to_string(),
            expected_output: expected.trim().to_string(),
            user_output: actual.trim().to_string(),
        }
    }
}
