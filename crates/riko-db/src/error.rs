use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid stored JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("could not resolve a data directory for this platform")]
    NoProjectDirs,
}

pub type Result<T> = std::result::Result<T, DbError>;
