//! Redis-backed submission/problem store.
//!
//! Submissions and problems live as JSON documents under namespaced keys;
//! per-problem submission counters live in a small hash updated with
//! `HINCRBY`, the one place that needs cross-pipeline atomicity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::models::{Problem, Submission, SubmissionStore, SubmissionUpdate};

/// Redis key layout
pub mod keys {
    /// Submission documents (JSON)
    pub const SUBMISSION_PREFIX: &str = "judge:submission:";
    /// Problem documents (JSON)
    pub const PROBLEM_PREFIX: &str = "judge:problem:";
    /// Per-problem counter hash with `total` and `accepted` fields
    pub const PROBLEM_STATS_PREFIX: &str = "judge:problem:stats:";
}

pub fn submission_key(id: &str) -> String {
    format!("{}{}", keys::SUBMISSION_PREFIX, id)
}

pub fn problem_key(id: &str) -> String {
    format!("{}{}", keys::PROBLEM_PREFIX, id)
}

pub fn problem_stats_key(id: &str) -> String {
    format!("{}{}", keys::PROBLEM_STATS_PREFIX, id)
}

/// Store backed by a shared auto-reconnecting Redis connection.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis store")?;
        info!("Connected to Redis store at {}", redis_url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(submission_key(id))
            .await
            .context("Failed to fetch submission")?;
        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| format!("Malformed submission {}", id))
        })
        .transpose()
    }

    async fn get_problem(&self, id: &str) -> Result<Option<Problem>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(problem_key(id))
            .await
            .context("Failed to fetch problem")?;
        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| format!("Malformed problem {}", id))
        })
        .transpose()
    }

    async fn update_submission(&self, id: &str, update: &SubmissionUpdate) -> Result<()> {
        // Read-modify-write is safe: only the one pipeline judging this
        // submission ever mutates it (§ concurrency model).
        let mut submission = self
            .get_submission(id)
            .await?
            .with_context(|| format!("Submission {} disappeared mid-judge", id))?;
        update.apply(&mut submission);

        let json = serde_json::to_string(&submission)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(submission_key(id), json)
            .await
            .context("Failed to write submission")?;
        Ok(())
    }

    async fn increment_problem_counters(&self, problem_id: &str, accepted: bool) -> Result<()> {
        let key = problem_stats_key(problem_id);
        let mut conn = self.conn.clone();
        conn.hincr::<_, _, _, ()>(&key, "total", 1)
            .await
            .context("Failed to increment total counter")?;
        if accepted {
            conn.hincr::<_, _, _, ()>(&key, "accepted", 1)
                .await
                .context("Failed to increment accepted counter")?;
        }
        Ok(())
    }
}
