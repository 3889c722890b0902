use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid grid parameters: {reason}")]
    InvalidGrid { reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Grid has not been built")]
    GridNotBuilt,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
