use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to start {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Protocol(String),
    #[error("driver panicked: {0}")]
    Panic(String),
}
