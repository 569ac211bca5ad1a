use std::path::PathBuf;

/// Errors from setting up or tearing down a streaming coordinator.
///
/// Nothing that happens inside a cycle surfaces here; cycle failures are
/// logged and counted in the [`CycleReport`](crate::CycleReport).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),
    #[error("coordinator task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
