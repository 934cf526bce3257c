use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    /// The page threw while running host code (e.g. `setOption` raised).
    #[error("Host error: {0}")]
    Host(String),

    /// A remote reference no longer resolves (navigation, GC, context teardown).
    #[error("Stale reference: {0}")]
    StaleReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleReference(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
