mod config;
mod judger;
mod languages;
mod models;
mod notify;
mod queue;
mod sandbox;
mod store;
mod verdict;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::info;

use crate::config::WorkerConfig;
use crate::judger::Judger;
use crate::languages::LanguageRegistry;
use crate::models::{ProgressPublisher, SubmissionStore};
use crate::notify::RedisPublisher;
use crate::queue::SubmissionQueue;
use crate::sandbox::{DockerSandbox, Sandbox};
use crate::store::RedisStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_worker=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    let languages = Arc::new(LanguageRegistry::from_file(&config.languages_path)?);
    info!(
        "Loaded {} language profiles from {}",
        languages.supported_languages().len(),
        config.languages_path
    );

    info!("Starting judge worker...");

    let store: Arc<dyn SubmissionStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let publisher: Arc<dyn ProgressPublisher> =
        Arc::new(RedisPublisher::connect(&config.redis_url).await?);
    let sandbox: Arc<dyn Sandbox> = Arc::new(DockerSandbox::new(config.output_cap_bytes));
    let mut queue = SubmissionQueue::connect(&config.redis_url).await?;

    let max_inflight = config.max_inflight;
    let judger = Judger::new(store, sandbox, publisher, languages, config);

    // Dispatch is bounded: a permit is taken before the next pop, so the
    // queue itself provides backpressure while all slots are busy.
    let permits = Arc::new(Semaphore::new(max_inflight));

    info!(
        "Waiting for submissions (max {} in flight)...",
        max_inflight
    );

    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_signal() => break,
        };

        let submission_id = tokio::select! {
            id = queue.pop() => id,
            _ = shutdown_signal() => break,
        };

        info!("Dequeued submission {}", submission_id);

        let judger = judger.clone();
        tokio::spawn(async move {
            judger.judge(&submission_id).await;
            drop(permit);
        });
    }

    info!("Shutting down: draining in-flight submissions...");
    let _ = permits.acquire_many(max_inflight as u32).await;
    info!("Judge worker stopped");

    Ok(())
}

/// Resolve when the process is asked to stop (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
