//! Data model for submissions and problems, plus the collaborator traits
//! the judging pipeline is written against.
//!
//! The persistent store and the notification transport are external
//! collaborators; only their contracts live here. Concrete Redis-backed
//! implementations are in `store` and `notify`.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::Status;

/// A user submission. The judging pipeline is the sole mutator of
/// `status`/`result`/`runtime_ms`/`memory_kb` after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub problem_id: String,
    pub user_id: String,
    pub language: String,
    pub source_code: String,
    pub status: Status,
    #[serde(default)]
    pub result: SubmissionResult,
    /// Worst-case wall time observed across test cases (ms)
    #[serde(default)]
    pub runtime_ms: u64,
    /// Worst-case peak memory observed across test cases (KB)
    #[serde(default)]
    pub memory_kb: u64,
    pub created_at: DateTime<Utc>,
}

/// Incremental and final judging outcome attached to a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    #[serde(default)]
    pub passed_count: u32,
    #[serde(default)]
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_case: Option<FailedCase>,
    /// Compile error / runtime error message (truncated, non-leaking)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Details of the first failing test case.
///
/// `input` and `expected_output` are redacted for hidden test cases
/// before this ever reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCase {
    pub input: String,
    pub expected_output: String,
    pub user_output: String,
}

/// A problem as the judge sees it: test cases, limits, optional
/// per-language code templates. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub testcases: Vec<TestCase>,
    pub time_limit_seconds: u64,
    #[serde(default)]
    pub code_templates: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
}

/// Partial submission update. Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_kb: Option<u64>,
}

impl SubmissionUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: SubmissionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_usage(mut self, runtime_ms: u64, memory_kb: u64) -> Self {
        self.runtime_ms = Some(runtime_ms);
        self.memory_kb = Some(memory_kb);
        self
    }

    /// Apply this partial update to an in-memory submission.
    pub fn apply(&self, submission: &mut Submission) {
        if let Some(status) = self.status {
            submission.status = status;
        }
        if let Some(ref result) = self.result {
            submission.result = result.clone();
        }
        if let Some(runtime_ms) = self.runtime_ms {
            submission.runtime_ms = runtime_ms;
        }
        if let Some(memory_kb) = self.memory_kb {
            submission.memory_kb = memory_kb;
        }
    }
}

/// Persistence contract to the submission/problem store.
///
/// Submissions are only ever mutated by the one pipeline judging them, so
/// whole-document writes are safe; problem counters are shared across
/// pipelines and must be incremented atomically by the implementation.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: &str) -> Result<Option<Submission>>;
    async fn get_problem(&self, id: &str) -> Result<Option<Problem>>;
    async fn update_submission(&self, id: &str, update: &SubmissionUpdate) -> Result<()>;
    /// Increment the problem's total counter, and the accepted counter when
    /// `accepted` is set.
    async fn increment_problem_counters(&self, problem_id: &str, accepted: bool) -> Result<()>;
}

/// Notification contract: at-most-once, fire-and-forget delivery of a
/// submission snapshot to its owner. Failures must never abort judging;
/// the pipeline logs them and moves on.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, user_id: &str, submission: &Submission) -> Result<()>;
}
