//! FIFO submission work queue.
//!
//! The API layer pushes a submission id onto a Redis list after durably
//! creating the record with `status = Pending`; this side pops ids with
//! BLPOP, reconnecting on connection failure.

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Queue of pending submission ids.
pub const SUBMISSION_QUEUE: &str = "judge:queue";

/// Blocking-pop consumer over the submission queue. Holds a dedicated
/// connection: BLPOP would stall any commands multiplexed alongside it.
pub struct SubmissionQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl SubmissionQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = connect_with_retry(&client).await;
        Ok(Self { client, conn })
    }

    /// Block until the next submission id is available, in FIFO order.
    /// Connection errors trigger reconnect-and-retry rather than bubbling
    /// up: the consumer loop must survive Redis restarts.
    pub async fn pop(&mut self) -> String {
        loop {
            let result: Result<Option<(String, String)>, _> =
                self.conn.blpop(SUBMISSION_QUEUE, 0.0).await;

            match result {
                Ok(Some((_, submission_id))) => return submission_id,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                    self.conn = connect_with_retry(&self.client).await;
                }
            }
        }
    }
}

async fn connect_with_retry(client: &redis::Client) -> MultiplexedConnection {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("Failed to connect to Redis queue: {}. Retrying in 3 seconds...", e);
                sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
