//! Worker configuration loaded once at startup from the environment.

use std::time::Duration;

/// Immutable worker configuration. Built in `main` and passed by reference.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis connection URL (queue, store, pub/sub)
    pub redis_url: String,
    /// Path to the language profile table
    pub languages_path: String,
    /// Maximum number of concurrently in-flight judging pipelines
    pub max_inflight: usize,
    /// Fixed deadline for the compile phase
    pub compile_time_limit: Duration,
    /// Hard memory ceiling per sandboxed run (MB)
    pub memory_limit_mb: u64,
    /// Cap on captured stdout/stderr per sandboxed run (bytes)
    pub output_cap_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".into(),
            languages_path: "./files/languages.toml".into(),
            max_inflight: 4,
            compile_time_limit: Duration::from_secs(20),
            memory_limit_mb: 256,
            output_cap_bytes: 8192,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            languages_path: std::env::var("LANGUAGES_CONFIG").unwrap_or(defaults.languages_path),
            max_inflight: env_parse("MAX_INFLIGHT", defaults.max_inflight),
            compile_time_limit: Duration::from_secs(env_parse(
                "COMPILE_TIME_LIMIT_SECS",
                defaults.compile_time_limit.as_secs(),
            )),
            memory_limit_mb: env_parse("MEMORY_LIMIT_MB", defaults.memory_limit_mb),
            output_cap_bytes: env_parse("OUTPUT_CAP_BYTES", defaults.output_cap_bytes),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
