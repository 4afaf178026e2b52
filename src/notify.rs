//! Progress publishing to the submission's owner.
//!
//! Fire-and-forget, at-most-once-per-call delivery over Redis pub/sub to a
//! per-user channel. The pipeline treats publish failures as non-critical.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::json;

use crate::models::{ProgressPublisher, Submission};

/// Per-user notification channel prefix.
pub const USER_CHANNEL_PREFIX: &str = "notify:user:";

pub fn user_channel(user_id: &str) -> String {
    format!("{}{}", USER_CHANNEL_PREFIX, user_id)
}

/// Serialize the notification event for a submission snapshot.
fn event_payload(submission: &Submission) -> Result<String> {
    let event = json!({
        "type": "submission_update",
        "submission": submission,
    });
    serde_json::to_string(&event).context("Failed to serialize submission event")
}

/// Publisher backed by Redis pub/sub.
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis publisher")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ProgressPublisher for RedisPublisher {
    async fn publish(&self, user_id: &str, submission: &Submission) -> Result<()> {
        let payload = event_payload(submission)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(user_channel(user_id), payload)
            .await
            .context("Failed to publish submission update")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionResult;
    use crate::verdict::Status;
    use chrono::Utc;

    #[test]
    fn test_event_payload_shape() {
        let submission = Submission {
            id: "s1".into(),
            problem_id: "p1".into(),
            user_id: "u1".into(),
            language: "python".into(),
            source_code: "print(1)".into(),
            status: Status::Running,
            result: SubmissionResult::default(),
            runtime_ms: 0,
            memory_kb: 0,
            created_at: Utc::now(),
        };

        let payload = event_payload(&submission).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "submission_update");
        assert_eq!(value["submission"]["id"], "s1");
        assert_eq!(value["submission"]["status"], "running");
    }

    #[test]
    fn test_user_channel() {
        assert_eq!(user_channel("u42"), "notify:user:u42");
    }
}
