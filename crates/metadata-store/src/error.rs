use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("setup error: {0}")]
    Setup(String),
}

impl StoreError {
    /// Whether the caller may retry the operation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Sqlite(_) | StoreError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
