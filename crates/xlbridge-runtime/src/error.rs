use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to start scheduler thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("Scheduler thread exited before its runtime was ready")]
    StartupAborted,

    #[error("Scheduler has been shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum RtdError {
    #[error("Topic not found for id {0}")]
    UnknownTopicId(i64),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
