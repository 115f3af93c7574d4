use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error in '{item}': {details}")]
    ConfigError { item: String, details: String },

    #[error("Unknown transaction type: {0}")]
    UnknownTransactionType(String),

    #[error("Embedding service error: {0}")]
    EmbeddingError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
